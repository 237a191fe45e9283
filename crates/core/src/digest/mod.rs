//! Invocation fingerprinting
//!
//! A [`Digest`] accumulates everything that makes a tool invocation unique —
//! preprocessed source bytes, filtered arguments, relevant environment
//! variables, the program identity — and finalizes into a 128-bit XXH3
//! [`Fingerprint`]. Two invocations with equal fingerprints are considered
//! equivalent and may share a cache entry.
//!
//! File hashing has a deterministic variant that understands the UNIX `ar`
//! archive format and skips per-member timestamps, so rebuilding a static
//! library an hour later still fingerprints identically.

mod ar;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

/// A 128-bit fingerprint identifying a logically equivalent invocation.
///
/// The canonical textual form is 32 lowercase hex characters; that string is
/// the cache key for every storage tier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// The canonical 32-character lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the canonical hex form back into a fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input is exactly 32 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| Error::corrupt(format!("bad fingerprint hex: {e}")))?;
        let data: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::corrupt(format!("fingerprint must be 32 hex chars, got {s:?}")))?;
        Ok(Self(data))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Streaming fingerprint builder over XXH3-128.
#[derive(Default)]
pub struct Digest {
    state: Xxh3,
}

impl Digest {
    /// Start a fresh digest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all accumulated input.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Feed raw bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Feed an ordered list, length-prefixing each element.
    ///
    /// The prefix keeps adjacent elements from colliding: `["ab", "c"]` and
    /// `["a", "bc"]` digest differently.
    pub fn update_list<S: AsRef<str>>(&mut self, items: &[S]) {
        for item in items {
            let bytes = item.as_ref().as_bytes();
            self.state.update(&(bytes.len() as u64).to_le_bytes());
            self.state.update(bytes);
        }
    }

    /// Feed a key/value map in sorted key order.
    ///
    /// `BTreeMap` iteration is already byte-ordered by key, so insertion
    /// order cannot influence the result. Keys and values are each
    /// length-prefixed for the same reason as [`Self::update_list`].
    pub fn update_map(&mut self, map: &BTreeMap<String, String>) {
        for (key, value) in map {
            self.state.update(&(key.len() as u64).to_le_bytes());
            self.state.update(key.as_bytes());
            self.state.update(&(value.len() as u64).to_le_bytes());
            self.state.update(value.as_bytes());
        }
    }

    /// Feed the contents of a file.
    ///
    /// # Errors
    ///
    /// Returns a retriable I/O error if the file cannot be read.
    pub fn update_from_file(&mut self, path: &Path) -> Result<()> {
        let mut file =
            std::fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
        let mut buf = [0u8; 1024 * 64];
        loop {
            let n = file.read(&mut buf).map_err(|e| Error::io(e, path, "read"))?;
            if n == 0 {
                break;
            }
            self.state.update(&buf[..n]);
        }
        Ok(())
    }

    /// Feed the contents of a file, stripping format-specific volatile data.
    ///
    /// UNIX `ar` archives are hashed member by member, omitting the mtime,
    /// uid, gid, and mode header fields; only member names, sizes, and
    /// contents contribute. Any other file format falls back to raw hashing.
    ///
    /// # Errors
    ///
    /// Returns a retriable I/O error if the file cannot be read.
    pub fn update_from_file_deterministic(&mut self, path: &Path) -> Result<()> {
        let data = std::fs::read(path).map_err(|e| Error::io(e, path, "read"))?;
        if ar::is_archive(&data) {
            ar::update_from_archive(self, &data);
        } else {
            self.update(&data);
        }
        Ok(())
    }

    /// Finish the digest. Consuming `self` makes a second finalize
    /// unrepresentable.
    #[must_use]
    pub fn finalize(self) -> Fingerprint {
        Fingerprint(self.state.digest128().to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_of(f: impl FnOnce(&mut Digest)) -> Fingerprint {
        let mut digest = Digest::new();
        f(&mut digest);
        digest.finalize()
    }

    #[test]
    fn stable_across_runs() {
        let a = digest_of(|d| d.update(b"int main(){return 0;}"));
        let b = digest_of(|d| d.update(b"int main(){return 0;}"));
        assert_eq!(a, b);
    }

    #[test]
    fn sensitive_to_input() {
        let a = digest_of(|d| d.update(b"aaa"));
        let b = digest_of(|d| d.update(b"aab"));
        assert_ne!(a, b);
    }

    #[test]
    fn hex_form_is_32_lowercase_chars() {
        let fp = digest_of(|d| d.update(b"x"));
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hex_roundtrip() {
        let fp = digest_of(|d| d.update(b"roundtrip"));
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
        assert!(Fingerprint::from_hex("zz").is_err());
        assert!(Fingerprint::from_hex("abcd").is_err());
    }

    #[test]
    fn map_order_is_irrelevant() {
        let mut forward = BTreeMap::new();
        forward.insert("CL".to_string(), "/W4".to_string());
        forward.insert("INCLUDE".to_string(), "/usr/include".to_string());

        let mut reversed = BTreeMap::new();
        reversed.insert("INCLUDE".to_string(), "/usr/include".to_string());
        reversed.insert("CL".to_string(), "/W4".to_string());

        let a = digest_of(|d| d.update_map(&forward));
        let b = digest_of(|d| d.update_map(&reversed));
        assert_eq!(a, b);
    }

    #[test]
    fn map_fields_cannot_bleed_into_each_other() {
        let mut split = BTreeMap::new();
        split.insert("a".to_string(), "1b".to_string());
        split.insert("b".to_string(), "2".to_string());

        let mut joined = BTreeMap::new();
        joined.insert("a".to_string(), "1".to_string());
        joined.insert("b2".to_string(), String::new());

        let a = digest_of(|d| d.update_map(&split));
        let b = digest_of(|d| d.update_map(&joined));
        assert_ne!(a, b);
    }

    #[test]
    fn list_elements_cannot_shift() {
        let a = digest_of(|d| d.update_list(&["ab", "c"]));
        let b = digest_of(|d| d.update_list(&["a", "bc"]));
        assert_ne!(a, b);
    }

    #[test]
    fn reset_clears_state() {
        let mut digest = Digest::new();
        digest.update(b"stale");
        digest.reset();
        digest.update(b"fresh");
        assert_eq!(digest.finalize(), digest_of(|d| d.update(b"fresh")));
    }

    #[test]
    fn file_hash_matches_bytes_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.c");
        std::fs::write(&path, b"int x = 1;").unwrap();

        let from_file = digest_of(|d| d.update_from_file(&path).unwrap());
        let from_bytes = digest_of(|d| d.update(b"int x = 1;"));
        assert_eq!(from_file, from_bytes);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut digest = Digest::new();
        let err = digest
            .update_from_file(Path::new("/nonexistent/input.c"))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Io { .. }));
    }
}
