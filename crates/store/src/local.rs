//! Local cache store
//!
//! Entries live in a two-level tree under the cache root: the first two hex
//! characters of the fingerprint name a bucket directory, the remaining
//! thirty name the entry directory. Each entry directory holds one file per
//! artifact plus the serialized `.entry` manifest.
//!
//! Inserts are all-or-nothing: everything is staged in a uniquely named
//! temporary directory inside the bucket and atomically renamed into place.
//! Concurrent producers of the same fingerprint race on the rename; the
//! loser deletes its staging tree and defers to the winner. Eviction removes
//! a victim from the global manifest under the lock before its directory is
//! renamed aside and deleted, so a racing lookup sees the entry intact or
//! not at all.

use crate::entry::{self, CacheEntry, CompressionMode, ENTRY_FILE_NAME};
use crate::expected::ExpectedFileMap;
use crate::manifest::GlobalManifest;
use crate::materialize::materialize;
use crate::stats::StatsFile;
use buildcache_core::{DeferredCloser, Error, Fingerprint, Result, ThreadPool};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// zstd level used when compressing artifacts on store.
const COMPRESSION_LEVEL: i32 = 3;

/// Distinguishes rename-aside names when several evictions run in one process.
static EVICT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The local, size-bounded cache store.
pub struct LocalStore {
    root: PathBuf,
    max_size: u64,
    manifest: GlobalManifest,
    stats: StatsFile,
    pool: Arc<ThreadPool>,
    closer: Arc<DeferredCloser>,
}

impl LocalStore {
    /// Open (creating if needed) the store at `root` with the given size cap.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the root directory cannot be created.
    pub fn open(
        root: impl Into<PathBuf>,
        max_size: u64,
        pool: Arc<ThreadPool>,
        closer: Arc<DeferredCloser>,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(e, &root, "create_dir_all"))?;
        let manifest = GlobalManifest::new(&root);
        let stats = StatsFile::new(&root);
        Ok(Self {
            root,
            max_size,
            manifest,
            stats,
            pool,
            closer,
        })
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Counters for this root.
    #[must_use]
    pub fn stats(&self) -> &StatsFile {
        &self.stats
    }

    fn entry_dir(&self, fp: &Fingerprint) -> PathBuf {
        let key = fp.to_hex();
        self.root.join(&key[..2]).join(&key[2..])
    }

    /// Look up an entry.
    ///
    /// Returns the decoded entry together with its directory so artifacts
    /// can be read. Unreadable or undecodable entries log a warning and
    /// read as a miss; corruption never propagates to the driver.
    #[must_use]
    pub fn lookup(&self, fp: &Fingerprint) -> Option<(CacheEntry, PathBuf)> {
        let dir = self.entry_dir(fp);
        let manifest_path = dir.join(ENTRY_FILE_NAME);
        let data = match fs::read(&manifest_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(key = %fp, error = %e, "Failed to read cache entry; treating as a miss");
                return None;
            }
        };
        match entry::deserialize(&data) {
            Ok(entry) => Some((entry, dir)),
            Err(e) => {
                tracing::warn!(key = %fp, error = %e, "Corrupt cache entry; treating as a miss");
                // Drop the damaged entry so the next insert can replace it.
                if let Err(e) = self.remove(fp) {
                    tracing::warn!(key = %fp, error = %e, "Failed to drop corrupt cache entry");
                }
                None
            }
        }
    }

    /// Drop one entry from the manifest and from disk.
    ///
    /// Used when a stored entry turns out to be unservable (corrupt
    /// manifest, vanished artifact) so a later insert can replace it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the global manifest cannot be updated.
    pub fn remove(&self, fp: &Fingerprint) -> Result<()> {
        let key = fp.to_hex();
        self.manifest.locked(|records| records.retain(|r| r.key != key))?;
        self.remove_entry_dir(&key);
        Ok(())
    }

    /// Insert an entry.
    ///
    /// `files` maps each of the entry's file IDs to the produced file on
    /// disk. With `allow_hard_links` (and no compression) artifacts are
    /// linked into the cache instead of copied; a link failure degrades to a
    /// copy. After a successful insert the store is within its size cap.
    ///
    /// # Errors
    ///
    /// Returns an error when staging fails (missing source file, unwritable
    /// cache). Losing the insert race to another producer is not an error.
    pub fn add(
        &self,
        fp: &Fingerprint,
        entry: &CacheEntry,
        files: &ExpectedFileMap,
        allow_hard_links: bool,
    ) -> Result<()> {
        let key = fp.to_hex();
        let (bucket_name, rest) = key.split_at(2);
        let bucket = self.root.join(bucket_name);
        fs::create_dir_all(&bucket).map_err(|e| Error::io(e, &bucket, "create_dir_all"))?;

        let final_dir = bucket.join(rest);
        if final_dir.join(ENTRY_FILE_NAME).exists() {
            tracing::debug!(key = %key, "Entry already cached by another producer");
            return Ok(());
        }

        // Stage everything in a uniquely named directory; it is cleaned up
        // automatically if anything below fails.
        let staging = tempfile::Builder::new()
            .prefix(&format!("{rest}.tmp-"))
            .tempdir_in(&bucket)
            .map_err(|e| Error::io(e, &bucket, "tempdir"))?;

        let compress = entry.compression() == CompressionMode::All;
        for id in entry.file_ids() {
            if id == ENTRY_FILE_NAME || id.contains('/') || id.contains('\\') {
                return Err(Error::config(format!("invalid file ID {id:?}")));
            }
            let expected = files
                .get(id)
                .ok_or_else(|| Error::config(format!("no source path for file ID {id:?}")))?;
            let source = expected.path().to_path_buf();
            let dest = staging.path().join(id);
            let allow_link = allow_hard_links && !compress;
            let closer = Arc::clone(&self.closer);
            self.pool
                .enqueue(move || place_artifact(&source, &dest, allow_link, compress, &closer));
        }
        self.pool.wait()?;

        // The entry manifest goes in last: its presence implies complete
        // payloads once the directory is renamed into place.
        let manifest_path = staging.path().join(ENTRY_FILE_NAME);
        fs::write(&manifest_path, entry::serialize(entry))
            .map_err(|e| Error::io(e, &manifest_path, "write"))?;

        let size = dir_size(staging.path())?;

        let staging_path = staging.keep();
        if let Err(e) = fs::rename(&staging_path, &final_dir) {
            let _ = fs::remove_dir_all(&staging_path);
            if final_dir.join(ENTRY_FILE_NAME).exists() {
                tracing::debug!(key = %key, "Lost insert race; existing entry wins");
                return Ok(());
            }
            return Err(Error::io(e, &final_dir, "rename"));
        }

        self.manifest.upsert(&key, size)?;
        self.stats.record(|s| s.entries_added += 1);
        self.evict_to(self.max_size)?;
        Ok(())
    }

    /// Materialise one artifact of an entry at `target`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the artifact cannot be produced at the
    /// target path.
    pub fn get_file(
        &self,
        fp: &Fingerprint,
        file_id: &str,
        target: &Path,
        decompress: bool,
        allow_hard_links: bool,
        create_dirs: bool,
    ) -> Result<()> {
        let source = self.entry_dir(fp).join(file_id);
        materialize(&source, target, allow_hard_links, create_dirs, decompress)
    }

    /// Refresh an entry's access time after a hit.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the global manifest cannot be updated.
    pub fn touch(&self, fp: &Fingerprint) -> Result<()> {
        self.manifest.touch(&fp.to_hex())
    }

    /// Evict entries, oldest access first, until the total size is at most
    /// `max_bytes`.
    ///
    /// Victims leave the global manifest under the lock before their
    /// directories are removed, so no two processes evict the same entry
    /// and racing lookups see intact entries or misses.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the global manifest cannot be updated.
    pub fn evict_to(&self, max_bytes: u64) -> Result<()> {
        let victims: Vec<(String, u64)> = self.manifest.locked(|records| {
            let mut total: u64 = records.iter().map(|r| r.size).sum();
            if total <= max_bytes {
                return Vec::new();
            }
            let mut order: Vec<usize> = (0..records.len()).collect();
            order.sort_by_key(|&i| records[i].last_access);

            let mut victims = Vec::new();
            for i in order {
                if total <= max_bytes {
                    break;
                }
                total = total.saturating_sub(records[i].size);
                victims.push((records[i].key.clone(), records[i].size));
            }
            let doomed: BTreeSet<String> = victims.iter().map(|(k, _)| k.clone()).collect();
            records.retain(|r| !doomed.contains(&r.key));
            victims
        })?;

        if victims.is_empty() {
            return Ok(());
        }
        let mut freed = 0u64;
        for (key, size) in &victims {
            self.remove_entry_dir(key);
            freed += size;
            tracing::debug!(key = %key, size, "Evicted cache entry");
        }
        self.stats.record(|s| s.bytes_evicted += freed);
        Ok(())
    }

    /// Remove every entry and reset the global manifest.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the cache root cannot be traversed.
    pub fn clear(&self) -> Result<()> {
        // Manifest first: racers miss from this point on.
        self.manifest.locked(|records| records.clear())?;

        let read = fs::read_dir(&self.root).map_err(|e| Error::io(e, &self.root, "read_dir"))?;
        for dir_entry in read.flatten() {
            let path = dir_entry.path();
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            let is_bucket = path.is_dir()
                && name.len() == 2
                && name.chars().all(|c| c.is_ascii_hexdigit());
            if is_bucket {
                if let Err(e) = fs::remove_dir_all(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache bucket");
                }
            }
        }
        Ok(())
    }

    fn remove_entry_dir(&self, key: &str) {
        if key.len() < 3 {
            return;
        }
        let (bucket, rest) = key.split_at(2);
        let dir = self.root.join(bucket).join(rest);
        // Rename aside first so the directory disappears atomically; the
        // piecemeal delete then runs on a name no lookup can resolve.
        let aside = self.root.join(bucket).join(format!(
            "{rest}.del-{}-{}",
            std::process::id(),
            EVICT_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        match fs::rename(&dir, &aside) {
            Ok(()) => {
                let _ = fs::remove_dir_all(&aside);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to evict cache entry");
            }
        }
    }
}

/// Place one artifact into the staging directory.
fn place_artifact(
    source: &Path,
    dest: &Path,
    allow_hard_link: bool,
    compress: bool,
    closer: &DeferredCloser,
) -> Result<()> {
    if compress {
        let reader = fs::File::open(source).map_err(|e| Error::io(e, source, "open"))?;
        let mut writer = fs::File::create(dest).map_err(|e| Error::io(e, dest, "create"))?;
        zstd::stream::copy_encode(reader, &mut writer, COMPRESSION_LEVEL)
            .map_err(|e| Error::io(e, dest, "compress"))?;
        closer.enqueue(writer);
        return Ok(());
    }
    if allow_hard_link && fs::hard_link(source, dest).is_ok() {
        return Ok(());
    }
    let mut reader = fs::File::open(source).map_err(|e| Error::io(e, source, "open"))?;
    let mut writer = fs::File::create(dest).map_err(|e| Error::io(e, dest, "create"))?;
    std::io::copy(&mut reader, &mut writer).map_err(|e| Error::io(e, dest, "copy"))?;
    closer.enqueue(writer);
    Ok(())
}

fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0u64;
    for dir_entry in walkdir::WalkDir::new(path) {
        let dir_entry = dir_entry.map_err(|e| Error::io_no_path(e.into(), "walk"))?;
        if dir_entry.file_type().is_file() {
            total += dir_entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok(total)
}
