//! Shared infrastructure for the buildcache workspace
//!
//! This crate carries everything the storage tiers and the driver have in
//! common:
//! - A structured [`Error`] type and [`Result`] alias
//! - Layered [`config::Config`] loading (JSON snapshot + environment)
//! - The invocation [`digest`] (streaming XXH3-128 fingerprinting with
//!   archive-aware deterministic file hashing)
//! - Tool execution with output capture ([`sys`])
//! - The general worker [`pool`] and the deferred-close [`io_worker`]

pub mod config;
pub mod digest;
mod error;
pub mod io_worker;
pub mod pool;
pub mod sys;

pub use config::{Accuracy, Config};
pub use digest::{Digest, Fingerprint};
pub use error::{Error, Result};
pub use io_worker::DeferredCloser;
pub use pool::{PoolMode, ThreadPool};
pub use sys::RunResult;
