//! Local cache storage for buildcache
//!
//! This crate owns everything that touches the cache root on disk:
//! - The versioned binary [`entry`] codec for cached results
//! - The [`expected`] output-file model wrappers declare before a run
//! - The content-addressed [`local`] store with atomic inserts and
//!   size-bounded LRU eviction
//! - The global LRU [`manifest`] and persistent [`stats`] counters
//! - The artifact [`materialize`] routine (hardlink / copy / decompress)
//!
//! The driver borrows paths into the store for materialisation but never
//! mutates files under the root; the store owns its tree.

pub mod entry;
pub mod expected;
pub mod local;
pub mod manifest;
pub mod materialize;
pub mod stats;

pub use entry::{CacheEntry, CompressionMode, ENTRY_FILE_NAME, deserialize, serialize};
pub use expected::{ExpectedFile, ExpectedFileMap};
pub use local::LocalStore;
pub use manifest::{GlobalManifest, ManifestRecord};
pub use materialize::materialize;
pub use stats::{CacheStats, StatsFile};
