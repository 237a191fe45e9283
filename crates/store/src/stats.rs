//! Persistent cache statistics
//!
//! Counters live in a small JSON file at the cache root and are updated with
//! a locked read-modify-write so concurrent invocations do not lose
//! increments. Statistics are strictly best-effort: any failure is logged
//! and swallowed, because counters must never break a build.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Name of the statistics file inside the cache root.
pub const STATS_FILE_NAME: &str = "stats";

/// Lifetime counters for one cache root.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStats {
    /// Lookups served from the local store.
    pub local_hits: u64,
    /// Lookups served from the remote store.
    pub remote_hits: u64,
    /// Lookups that missed every tier.
    pub misses: u64,
    /// Entries inserted into the local store.
    pub entries_added: u64,
    /// Bytes reclaimed by eviction.
    pub bytes_evicted: u64,
}

/// Handle to the statistics file of one cache root.
#[derive(Debug, Clone)]
pub struct StatsFile {
    path: PathBuf,
}

impl StatsFile {
    /// Statistics handle for a cache root. The file is created lazily.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(STATS_FILE_NAME),
        }
    }

    /// Read the current counters. Missing or unreadable data reads as zeros.
    #[must_use]
    pub fn read(&self) -> CacheStats {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    /// Apply an increment under the file lock. Failures are logged, never
    /// returned.
    pub fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Err(e) = self.try_record(f) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to update cache stats");
        }
    }

    /// Reset every counter to zero.
    pub fn zero(&self) {
        self.record(|stats| *stats = CacheStats::default());
    }

    fn try_record(&self, f: impl FnOnce(&mut CacheStats)) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let mut stats: CacheStats = serde_json::from_str(&text).unwrap_or_default();

        f(&mut stats);

        let json = serde_json::to_string_pretty(&stats).unwrap_or_default();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(json.as_bytes())?;

        let _ = FileExt::unlock(&file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let stats = StatsFile::new(dir.path());
        assert_eq!(stats.read(), CacheStats::default());
    }

    #[test]
    fn record_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let stats = StatsFile::new(dir.path());
        stats.record(|s| s.local_hits += 1);
        stats.record(|s| {
            s.local_hits += 1;
            s.misses += 3;
        });

        let read = stats.read();
        assert_eq!(read.local_hits, 2);
        assert_eq!(read.misses, 3);
    }

    #[test]
    fn zero_resets_counters() {
        let dir = tempfile::tempdir().unwrap();
        let stats = StatsFile::new(dir.path());
        stats.record(|s| s.entries_added = 9);
        stats.zero();
        assert_eq!(stats.read(), CacheStats::default());
    }

    #[test]
    fn corrupt_file_reads_as_zeros_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATS_FILE_NAME), "{{not json").unwrap();
        let stats = StatsFile::new(dir.path());
        assert_eq!(stats.read(), CacheStats::default());

        stats.record(|s| s.remote_hits += 1);
        assert_eq!(stats.read().remote_hits, 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let stats = StatsFile::new(&root);
                    for _ in 0..10 {
                        stats.record(|s| s.misses += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(StatsFile::new(dir.path()).read().misses, 80);
    }
}
