//! Cache configuration
//!
//! Settings come from two layers: an optional JSON snapshot (`cache.conf` in
//! the cache root) and `BUILDCACHE_*` environment variables, with the
//! environment taking precedence. The cache root itself is chosen by the
//! caller (typically `BUILDCACHE_DIR`), so the config is root-relative.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the optional JSON config snapshot inside the cache root.
pub const CONFIG_FILE_NAME: &str = "cache.conf";

/// Default local cache size cap: 5 GiB.
const DEFAULT_MAX_CACHE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// How aggressively wrappers strip volatile information before hashing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Accuracy {
    /// Strip volatile data (timestamps, line directives) where safe.
    #[default]
    Default,
    /// Keep data that debug/coverage builds depend on, at the cost of fewer hits.
    Strict,
}

impl Accuracy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "DEFAULT" => Some(Self::Default),
            "STRICT" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Configuration consumed by the caching core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Maximum total size of the local cache, in bytes.
    pub max_cache_size: u64,
    /// Allow hard links between the cache and build outputs.
    pub hard_links: bool,
    /// Compress artifact payloads on store.
    pub compress: bool,
    /// Remote cache endpoint (`redis://host:port`), if any.
    pub remote: Option<String>,
    /// On a miss, print the expected output paths and stop instead of
    /// running the tool.
    pub terminate_on_miss: bool,
    /// Accuracy mode applied by wrappers during preprocessing.
    pub accuracy: Accuracy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            hard_links: false,
            compress: false,
            remote: None,
            terminate_on_miss: false,
            accuracy: Accuracy::Default,
        }
    }
}

impl Config {
    /// Load the configuration for a cache root.
    ///
    /// Reads `<root>/cache.conf` when present, then applies environment
    /// overrides. An unreadable or malformed snapshot logs a warning and
    /// falls back to defaults rather than failing the invocation.
    pub fn load(root: &Path) -> Self {
        let snapshot = std::fs::read_to_string(root.join(CONFIG_FILE_NAME)).ok();
        let mut config = match snapshot.as_deref() {
            Some(text) => Self::from_snapshot(text).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %root.join(CONFIG_FILE_NAME).display(),
                    error = %e,
                    "Ignoring malformed config snapshot"
                );
                Self::default()
            }),
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Parse a JSON config snapshot.
    pub fn from_snapshot(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::config(format!("bad config snapshot: {e}")))
    }

    /// Apply `BUILDCACHE_*` environment overrides.
    ///
    /// The lookup function is injected so tests can exercise the override
    /// logic without mutating the process environment.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(value) = get("BUILDCACHE_MAX_CACHE_SIZE") {
            match value.trim().parse::<u64>() {
                Ok(bytes) => self.max_cache_size = bytes,
                Err(_) => {
                    tracing::warn!(value = %value, "Ignoring invalid BUILDCACHE_MAX_CACHE_SIZE")
                }
            }
        }
        if let Some(flag) = get("BUILDCACHE_HARD_LINKS").as_deref().and_then(parse_bool) {
            self.hard_links = flag;
        }
        if let Some(flag) = get("BUILDCACHE_COMPRESS").as_deref().and_then(parse_bool) {
            self.compress = flag;
        }
        if let Some(value) = get("BUILDCACHE_REMOTE") {
            let trimmed = value.trim();
            self.remote = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
        if let Some(flag) = get("BUILDCACHE_TERMINATE_ON_MISS")
            .as_deref()
            .and_then(parse_bool)
        {
            self.terminate_on_miss = flag;
        }
        if let Some(value) = get("BUILDCACHE_ACCURACY") {
            match Accuracy::parse(&value) {
                Some(accuracy) => self.accuracy = accuracy,
                None => tracing::warn!(value = %value, "Ignoring invalid BUILDCACHE_ACCURACY"),
            }
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!(value = %other, "Ignoring invalid boolean setting");
            None
        }
    }
}
