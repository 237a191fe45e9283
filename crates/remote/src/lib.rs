//! Remote cache tier for buildcache
//!
//! A [`RemoteCache`] fronts a pluggable key/value [`provider`]. The front
//! owns the protocol: entry-first lookup, entry-last insert, optional zstd
//! compression of artifact payloads (never of the serialized entry), and the
//! error policy — a misconfigured endpoint is reported once and the remote
//! is disabled; transient transport failures are logged, drop the
//! connection, and read as misses. The remote tier can never fail an
//! invocation.

pub mod memory;
pub mod provider;
pub mod redis;

use buildcache_core::{Error, Fingerprint, Result};
use buildcache_store::entry::{self, CacheEntry, CompressionMode};
use buildcache_store::expected::ExpectedFileMap;
use provider::{RemoteProvider, artifact_key, entry_key};
use std::path::Path;

pub use memory::{MemoryProvider, MemoryStore};
pub use redis::RedisProvider;

/// The remote tier of the cache.
pub struct RemoteCache {
    provider: Option<Box<dyn RemoteProvider>>,
}

impl RemoteCache {
    /// A remote tier that is never consulted.
    #[must_use]
    pub fn disabled() -> Self {
        Self { provider: None }
    }

    /// Build the remote tier from a configured endpoint.
    ///
    /// `None` or an empty endpoint disables the tier. A malformed endpoint
    /// or unsupported protocol is logged once and disables the tier, as
    /// does a failed connect: the invocation proceeds exactly as if no
    /// remote were configured.
    #[must_use]
    pub fn from_endpoint(endpoint: Option<&str>) -> Self {
        let Some(address) = endpoint.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::disabled();
        };
        let Some((protocol, host_description)) = address.split_once("://") else {
            tracing::error!(address = %address, "Invalid remote address");
            return Self::disabled();
        };
        let provider: Box<dyn RemoteProvider> = match protocol {
            "redis" => match RedisProvider::new(host_description) {
                Ok(provider) => Box::new(provider),
                Err(e) => {
                    tracing::error!(address = %address, error = %e, "Invalid remote address");
                    return Self::disabled();
                }
            },
            other => {
                tracing::error!(protocol = %other, "Unsupported remote protocol");
                return Self::disabled();
            }
        };
        Self::with_provider(provider)
    }

    /// Build the remote tier over an explicit provider and connect it.
    #[must_use]
    pub fn with_provider(mut provider: Box<dyn RemoteProvider>) -> Self {
        match provider.connect() {
            Ok(()) => Self {
                provider: Some(provider),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Remote cache unavailable");
                Self::disabled()
            }
        }
    }

    /// Whether a connected provider is attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.provider.is_some()
    }

    /// Look up an entry. Every failure mode reads as a miss.
    pub fn lookup(&mut self, fp: &Fingerprint) -> Option<CacheEntry> {
        let provider = self.provider.as_mut()?;
        let data = match provider.get(&entry_key(fp)) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                self.drop_connection(&e);
                return None;
            }
        };
        match entry::deserialize(&data) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(key = %fp, error = %e, "Corrupt remote entry; treating as a miss");
                None
            }
        }
    }

    /// Insert an entry: artifacts first, the serialized entry last, so any
    /// observer of the entry finds complete artifacts. Failures are logged
    /// and swallowed.
    pub fn add(&mut self, fp: &Fingerprint, entry: &CacheEntry, files: &ExpectedFileMap) {
        if self.provider.is_none() {
            return;
        }
        if let Err(e) = self.try_add(fp, entry, files) {
            // Only a transport failure condemns the connection; a local
            // read error or a bad file map is not the remote's fault.
            if matches!(e, Error::Remote { .. }) {
                self.drop_connection(&e);
            } else {
                tracing::warn!(key = %fp, error = %e, "Failed to populate remote cache");
            }
        }
    }

    fn try_add(
        &mut self,
        fp: &Fingerprint,
        entry: &CacheEntry,
        files: &ExpectedFileMap,
    ) -> Result<()> {
        let compress = entry.compression() == CompressionMode::All;
        for id in entry.file_ids() {
            let expected = files
                .get(id)
                .ok_or_else(|| Error::config(format!("no source path for file ID {id:?}")))?;
            let mut data = std::fs::read(expected.path())
                .map_err(|e| Error::io(e, expected.path(), "read"))?;
            if compress {
                data = zstd::encode_all(&data[..], 3)
                    .map_err(|e| Error::io(e, expected.path(), "compress"))?;
            }
            let provider = self.provider_mut()?;
            provider.put(&artifact_key(fp, id), &data)?;
        }
        let bytes = entry::serialize(entry);
        self.provider_mut()?.put(&entry_key(fp), &bytes)
    }

    /// Fetch one artifact to `target`, decompressing when asked.
    ///
    /// # Errors
    ///
    /// Returns a transient error on transport failure (dropping the
    /// connection), or a corruption error when the entry promises an
    /// artifact that is absent or undecodable (the connection survives);
    /// callers degrade to a miss either way.
    pub fn get_file(
        &mut self,
        fp: &Fingerprint,
        file_id: &str,
        target: &Path,
        decompress: bool,
    ) -> Result<()> {
        let result = self.try_get_file(fp, file_id, target, decompress);
        if let Err(e) = &result {
            if matches!(e, Error::Remote { .. }) {
                self.drop_connection(e);
            }
        }
        result
    }

    fn try_get_file(
        &mut self,
        fp: &Fingerprint,
        file_id: &str,
        target: &Path,
        decompress: bool,
    ) -> Result<()> {
        let key = artifact_key(fp, file_id);
        let provider = self.provider_mut()?;
        let mut data = provider.get(&key)?.ok_or_else(|| {
            Error::corrupt(format!("entry promises artifact {key} but it is absent"))
        })?;
        if decompress {
            data = zstd::decode_all(&data[..])
                .map_err(|e| Error::corrupt(format!("bad compressed payload for {key}: {e}")))?;
        }
        std::fs::write(target, &data).map_err(|e| Error::io(e, target, "write"))
    }

    fn provider_mut(&mut self) -> Result<&mut Box<dyn RemoteProvider>> {
        self.provider
            .as_mut()
            .ok_or_else(|| Error::remote("remote cache disabled"))
    }

    fn drop_connection(&mut self, error: &Error) {
        tracing::warn!(error = %error, "Remote cache failure; disabling for this invocation");
        if let Some(mut provider) = self.provider.take() {
            provider.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildcache_core::Digest;
    use buildcache_store::expected::ExpectedFile;
    use std::sync::Arc;

    fn fingerprint(tag: &str) -> Fingerprint {
        let mut digest = Digest::new();
        digest.update(tag.as_bytes());
        digest.finalize()
    }

    fn memory_cache(store: &MemoryStore) -> RemoteCache {
        RemoteCache::with_provider(Box::new(MemoryProvider::with_store(Arc::clone(store))))
    }

    fn outputs_in(dir: &Path, contents: &[u8]) -> ExpectedFileMap {
        let path = dir.join("a.o");
        std::fs::write(&path, contents).unwrap();
        let mut map = ExpectedFileMap::new();
        map.insert("object".into(), ExpectedFile::new(path, true));
        map
    }

    #[test]
    fn disabled_remote_never_hits() {
        let mut remote = RemoteCache::disabled();
        assert!(!remote.is_active());
        assert!(remote.lookup(&fingerprint("x")).is_none());
    }

    #[test]
    fn empty_endpoint_disables_the_tier() {
        assert!(!RemoteCache::from_endpoint(None).is_active());
        assert!(!RemoteCache::from_endpoint(Some("")).is_active());
        assert!(!RemoteCache::from_endpoint(Some("  ")).is_active());
    }

    #[test]
    fn malformed_endpoint_disables_the_tier() {
        assert!(!RemoteCache::from_endpoint(Some("no-protocol")).is_active());
        assert!(!RemoteCache::from_endpoint(Some("ftp://host:21")).is_active());
        assert!(!RemoteCache::from_endpoint(Some("redis://bad")).is_active());
    }

    #[test]
    fn unreachable_endpoint_disables_the_tier() {
        let mut remote = RemoteCache::from_endpoint(Some("redis://127.0.0.1:1"));
        assert!(!remote.is_active());
        assert!(remote.lookup(&fingerprint("x")).is_none());
    }

    #[test]
    fn add_then_lookup_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let mut remote = memory_cache(&store);
        let fp = fingerprint("roundtrip");
        let files = outputs_in(dir.path(), b"object code");
        let entry = CacheEntry::new(
            vec!["object".into()],
            CompressionMode::None,
            b"hello".to_vec(),
            Vec::new(),
            0,
        );

        remote.add(&fp, &entry, &files);

        let found = remote.lookup(&fp).unwrap();
        assert_eq!(found, entry);

        let target = dir.path().join("restored.o");
        remote.get_file(&fp, "object", &target, false).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"object code");
    }

    #[test]
    fn compressed_payloads_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let mut remote = memory_cache(&store);
        let fp = fingerprint("compressed");
        let payload = vec![b'z'; 4096];
        let files = outputs_in(dir.path(), &payload);
        let entry = CacheEntry::new(
            vec!["object".into()],
            CompressionMode::All,
            Vec::new(),
            Vec::new(),
            0,
        );

        remote.add(&fp, &entry, &files);

        // The stored payload is compressed, the entry itself is not.
        {
            let map = store.lock().unwrap();
            let stored = map.get(&provider::artifact_key(&fp, "object")).unwrap();
            assert!(stored.len() < payload.len());
            let raw_entry = map.get(&provider::entry_key(&fp)).unwrap();
            assert!(entry::deserialize(raw_entry).is_ok());
        }

        let target = dir.path().join("restored.o");
        remote.get_file(&fp, "object", &target, true).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), payload);
    }

    #[test]
    fn corrupt_remote_entry_reads_as_miss() {
        let store = MemoryStore::default();
        let fp = fingerprint("corrupt");
        store
            .lock()
            .unwrap()
            .insert(provider::entry_key(&fp), b"junk".to_vec());

        let mut remote = memory_cache(&store);
        assert!(remote.lookup(&fp).is_none());
        // Corruption is not a transport failure; the connection survives.
        assert!(remote.is_active());
    }

    #[test]
    fn missing_artifact_is_corruption_and_keeps_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let mut remote = memory_cache(&store);
        let target = dir.path().join("x");
        let result = remote.get_file(&fingerprint("absent"), "object", &target, false);
        assert!(matches!(result, Err(Error::Corrupt { .. })));
        assert!(!target.exists());
        // An inconsistent entry is not a transport failure.
        assert!(remote.is_active());
    }

    #[test]
    fn local_read_failure_during_add_keeps_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let mut remote = memory_cache(&store);
        let fp = fingerprint("local-trouble");

        // The declared source file does not exist.
        let mut files = ExpectedFileMap::new();
        files.insert(
            "object".into(),
            ExpectedFile::new(dir.path().join("never-produced.o"), true),
        );
        let entry = CacheEntry::new(
            vec!["object".into()],
            CompressionMode::None,
            Vec::new(),
            Vec::new(),
            0,
        );

        remote.add(&fp, &entry, &files);
        assert!(remote.is_active());
        // Nothing was stored: the entry key must not be visible.
        assert!(remote.lookup(&fp).is_none());
    }
}
