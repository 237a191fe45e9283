//! Remote provider contract
//!
//! A provider is a key/value transport. Keys are namespaced byte strings,
//! values are opaque payloads; everything about entries, compression, and
//! ordering guarantees is decided above the trait so a new backend only has
//! to move bytes.

use buildcache_core::{Fingerprint, Result};
use buildcache_store::ENTRY_FILE_NAME;

/// Namespace prefix for every remote key.
const KEY_PREFIX: &str = "buildcache";

/// Key for one artifact of one entry: `buildcache_<32-hex>_<file_id>`.
#[must_use]
pub fn artifact_key(fp: &Fingerprint, file_id: &str) -> String {
    format!("{KEY_PREFIX}_{}_{file_id}", fp.to_hex())
}

/// Key for the serialized entry itself: `buildcache_<32-hex>_.entry`.
///
/// On lookup this key is fetched first; on insert it is stored last. A
/// client that observes the entry is therefore guaranteed the artifacts are
/// already present.
#[must_use]
pub fn entry_key(fp: &Fingerprint) -> String {
    artifact_key(fp, ENTRY_FILE_NAME)
}

/// A synchronous key/value transport.
pub trait RemoteProvider: Send {
    /// Establish the connection.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the endpoint cannot be reached.
    fn connect(&mut self) -> Result<()>;

    /// Whether the provider currently holds a usable connection.
    fn is_connected(&self) -> bool;

    /// Fetch a value. `Ok(None)` is an ordinary miss.
    ///
    /// # Errors
    ///
    /// Returns a transient error on transport failure; the provider drops
    /// its connection before returning.
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value.
    ///
    /// # Errors
    ///
    /// Returns a transient error on transport failure; the provider drops
    /// its connection before returning.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Tear the connection down.
    fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildcache_core::Digest;

    fn fingerprint() -> Fingerprint {
        let mut digest = Digest::new();
        digest.update(b"key scheme");
        digest.finalize()
    }

    #[test]
    fn artifact_key_shape() {
        let fp = fingerprint();
        let key = artifact_key(&fp, "object");
        assert_eq!(key, format!("buildcache_{}_object", fp.to_hex()));
    }

    #[test]
    fn entry_key_uses_the_entry_file_name() {
        let fp = fingerprint();
        assert_eq!(entry_key(&fp), format!("buildcache_{}_.entry", fp.to_hex()));
    }
}
