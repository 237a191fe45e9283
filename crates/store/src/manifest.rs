//! Global LRU manifest
//!
//! One binary file at the cache root lists every entry with its on-disk size
//! and last-access time. All mutation happens as a read-modify-write while
//! holding an exclusive file lock on the manifest itself; the lock is never
//! held across artifact I/O, so it cannot participate in a deadlock with
//! entry directories.
//!
//! Record format, repeated until EOF (integers little-endian):
//! `u32` key length, key bytes (32 hex chars in practice), `u64` size in
//! bytes, `u64` last-access unix millis. A crash mid-write can leave a
//! partial trailing record; readers drop it.

use buildcache_core::{Error, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the manifest file inside the cache root.
pub const MANIFEST_FILE_NAME: &str = "manifest";

/// One entry as tracked by the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// The entry's fingerprint in canonical hex form.
    pub key: String,
    /// Total on-disk size of the entry directory, in bytes.
    pub size: u64,
    /// Last lookup or insert time, unix milliseconds.
    pub last_access: u64,
}

/// Handle to the global manifest of one cache root.
#[derive(Debug, Clone)]
pub struct GlobalManifest {
    path: PathBuf,
}

impl GlobalManifest {
    /// Manifest handle for a cache root. The file is created lazily.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(MANIFEST_FILE_NAME),
        }
    }

    /// Run a read-modify-write transaction under the exclusive lock.
    ///
    /// The closure receives the current records and may mutate them; the
    /// result is written back in place before the lock is released.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the manifest cannot be opened, locked, read,
    /// or rewritten.
    pub fn locked<T>(&self, f: impl FnOnce(&mut Vec<ManifestRecord>) -> T) -> Result<T> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| Error::io(e, &self.path, "open"))?;
        file.lock_exclusive()
            .map_err(|e| Error::io(e, &self.path, "lock"))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| Error::io(e, &self.path, "read"))?;
        let mut records = decode_records(&buf);

        let out = f(&mut records);

        let bytes = encode_records(&records);
        file.set_len(0)
            .map_err(|e| Error::io(e, &self.path, "truncate"))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io(e, &self.path, "seek"))?;
        file.write_all(&bytes)
            .map_err(|e| Error::io(e, &self.path, "write"))?;
        file.sync_all()
            .map_err(|e| Error::io(e, &self.path, "sync"))?;

        let _ = FileExt::unlock(&file);
        Ok(out)
    }

    /// Insert or refresh a record, stamping the current time.
    pub fn upsert(&self, key: &str, size: u64) -> Result<()> {
        self.locked(|records| {
            let now = now_millis();
            match records.iter_mut().find(|r| r.key == key) {
                Some(record) => {
                    record.size = size;
                    record.last_access = now;
                }
                None => records.push(ManifestRecord {
                    key: key.to_string(),
                    size,
                    last_access: now,
                }),
            }
        })
    }

    /// Refresh the last-access time of a record, if it is still listed.
    pub fn touch(&self, key: &str) -> Result<()> {
        self.locked(|records| {
            if let Some(record) = records.iter_mut().find(|r| r.key == key) {
                record.last_access = now_millis();
            }
        })
    }
}

/// Current time as unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn decode_records(data: &[u8]) -> Vec<ManifestRecord> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    loop {
        let Some(len_end) = pos.checked_add(4).filter(|&e| e <= data.len()) else {
            break;
        };
        let key_len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
            as usize;
        let Some(record_end) = len_end.checked_add(key_len + 16).filter(|&e| e <= data.len())
        else {
            // Partial trailing record from an interrupted write; drop it.
            break;
        };
        let Ok(key) = std::str::from_utf8(&data[len_end..len_end + key_len]) else {
            break;
        };
        let size_start = len_end + key_len;
        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(&data[size_start..size_start + 8]);
        let mut access_bytes = [0u8; 8];
        access_bytes.copy_from_slice(&data[size_start + 8..size_start + 16]);
        records.push(ManifestRecord {
            key: key.to_string(),
            size: u64::from_le_bytes(size_bytes),
            last_access: u64::from_le_bytes(access_bytes),
        });
        pos = record_end;
    }
    records
}

fn encode_records(records: &[ManifestRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * 56);
    for record in records {
        out.extend_from_slice(&(record.key.len() as u32).to_le_bytes());
        out.extend_from_slice(record.key.as_bytes());
        out.extend_from_slice(&record.size.to_le_bytes());
        out.extend_from_slice(&record.last_access.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_in(dir: &Path) -> GlobalManifest {
        GlobalManifest::new(dir)
    }

    #[test]
    fn starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_in(dir.path());
        let count = manifest.locked(|records| records.len()).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn upsert_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_in(dir.path());
        manifest.upsert("aa00", 1234).unwrap();
        manifest.upsert("bb11", 5678).unwrap();

        let records = manifest.locked(|r| r.clone()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "aa00");
        assert_eq!(records[0].size, 1234);
        assert!(records[0].last_access > 0);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_in(dir.path());
        manifest.upsert("aa00", 100).unwrap();
        manifest.upsert("aa00", 200).unwrap();

        let records = manifest.locked(|r| r.clone()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size, 200);
    }

    #[test]
    fn touch_refreshes_access_time() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_in(dir.path());
        manifest.upsert("aa00", 100).unwrap();
        let before = manifest.locked(|r| r[0].last_access).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        manifest.touch("aa00").unwrap();
        let after = manifest.locked(|r| r[0].last_access).unwrap();
        assert!(after > before);
    }

    #[test]
    fn touch_of_missing_key_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_in(dir.path());
        manifest.touch("never-inserted").unwrap();
        assert_eq!(manifest.locked(|r| r.len()).unwrap(), 0);
    }

    #[test]
    fn partial_trailing_record_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_in(dir.path());
        manifest.upsert("aa00", 100).unwrap();
        manifest.upsert("bb11", 200).unwrap();

        // Simulate a crash mid-write of the second record.
        let path = dir.path().join(MANIFEST_FILE_NAME);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

        let records = manifest.locked(|r| r.clone()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "aa00");
    }

    #[test]
    fn concurrent_upserts_do_not_lose_records() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let manifest = GlobalManifest::new(&root);
                    manifest.upsert(&format!("key{i}"), i).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let manifest = manifest_in(dir.path());
        assert_eq!(manifest.locked(|r| r.len()).unwrap(), 8);
    }
}
