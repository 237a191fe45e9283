//! Tiered cache orchestration
//!
//! Probes local before remote, serves hits by materialising every artifact
//! at its expected path, and writes remote hits through to the local store
//! so the next invocation hits locally. Serving failures (a vanished
//! artifact, a dying remote connection) degrade to a miss; the probe never
//! fails the invocation.

use crate::wrapper::Capabilities;
use buildcache_core::{Error, Fingerprint, Result};
use buildcache_remote::RemoteCache;
use buildcache_store::entry::CacheEntry;
use buildcache_store::expected::{ExpectedFile, ExpectedFileMap};
use buildcache_store::{CompressionMode, LocalStore};

/// Local store plus optional remote tier.
pub struct TieredCache {
    local: LocalStore,
    remote: RemoteCache,
}

impl TieredCache {
    /// Combine the tiers.
    #[must_use]
    pub fn new(local: LocalStore, remote: RemoteCache) -> Self {
        Self { local, remote }
    }

    /// The local tier.
    #[must_use]
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Probe the tiers and, on a hit, materialise every artifact at its
    /// expected path. Returns the served entry so the caller can replay the
    /// captured streams and exit code.
    pub fn lookup(
        &mut self,
        fp: &Fingerprint,
        expected: &ExpectedFileMap,
        allow_hard_links: bool,
        capabilities: Capabilities,
    ) -> Option<CacheEntry> {
        let create_dirs = capabilities.create_target_dirs;

        if let Some((entry, _)) = self.local.lookup(fp) {
            match self.serve_local(fp, &entry, expected, allow_hard_links, create_dirs) {
                Ok(()) => {
                    if let Err(e) = self.local.touch(fp) {
                        tracing::warn!(key = %fp, error = %e, "Failed to touch cache entry");
                    }
                    self.local.stats().record(|s| s.local_hits += 1);
                    tracing::debug!(key = %fp, "Local cache hit");
                    return Some(entry);
                }
                Err(e) => {
                    tracing::warn!(key = %fp, error = %e, "Failed to serve local hit; treating as a miss");
                    // The entry is unservable; drop it so a fresh insert
                    // can replace it.
                    if let Err(e) = self.local.remove(fp) {
                        tracing::warn!(key = %fp, error = %e, "Failed to drop unservable entry");
                    }
                }
            }
        }

        if let Some(entry) = self.remote.lookup(fp) {
            match self.serve_remote(fp, &entry, expected, allow_hard_links, create_dirs) {
                Ok(()) => {
                    self.local.stats().record(|s| s.remote_hits += 1);
                    tracing::debug!(key = %fp, "Remote cache hit");
                    return Some(entry);
                }
                Err(e) => {
                    tracing::warn!(key = %fp, error = %e, "Failed to serve remote hit; treating as a miss");
                }
            }
        }

        self.local.stats().record(|s| s.misses += 1);
        None
    }

    /// Insert a fresh result into the local tier and, when configured, the
    /// remote tier. The remote insert is best-effort.
    ///
    /// # Errors
    ///
    /// Returns an error when the local insert fails.
    pub fn add(
        &mut self,
        fp: &Fingerprint,
        entry: &CacheEntry,
        files: &ExpectedFileMap,
        allow_hard_links: bool,
    ) -> Result<()> {
        self.local.add(fp, entry, files, allow_hard_links)?;
        self.remote.add(fp, entry, files);
        Ok(())
    }

    fn serve_local(
        &self,
        fp: &Fingerprint,
        entry: &CacheEntry,
        expected: &ExpectedFileMap,
        allow_hard_links: bool,
        create_dirs: bool,
    ) -> Result<()> {
        let decompress = entry.compression() == CompressionMode::All;
        for id in entry.file_ids() {
            let expected_file = expected
                .get(id)
                .ok_or_else(|| Error::corrupt(format!("entry names unknown file ID {id:?}")))?;
            self.local.get_file(
                fp,
                id,
                expected_file.path(),
                decompress,
                allow_hard_links,
                create_dirs,
            )?;
        }
        Ok(())
    }

    /// Serve a remote hit: stage the artifacts, write the entry through to
    /// the local store, then materialise from there so hardlink policy and
    /// compression stay the local store's concern.
    fn serve_remote(
        &mut self,
        fp: &Fingerprint,
        entry: &CacheEntry,
        expected: &ExpectedFileMap,
        allow_hard_links: bool,
        create_dirs: bool,
    ) -> Result<()> {
        let staging = tempfile::tempdir().map_err(|e| Error::io_no_path(e, "tempdir"))?;
        let decompress = entry.compression() == CompressionMode::All;

        let mut staged = ExpectedFileMap::new();
        for id in entry.file_ids() {
            if id.contains('/') || id.contains('\\') {
                return Err(Error::corrupt(format!("invalid file ID {id:?}")));
            }
            let path = staging.path().join(id);
            self.remote.get_file(fp, id, &path, decompress)?;
            staged.insert(id.clone(), ExpectedFile::new(path, true));
        }

        self.local.add(fp, entry, &staged, false)?;

        match self.local.lookup(fp) {
            Some((local_entry, _)) => {
                self.serve_local(fp, &local_entry, expected, allow_hard_links, create_dirs)
            }
            None => Err(Error::corrupt("write-through entry vanished")),
        }
    }
}
