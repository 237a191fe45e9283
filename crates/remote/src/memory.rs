//! In-process provider
//!
//! A provider backed by a shared map. Used by the test suites to exercise
//! write-through and transparency behaviour without a network, and handy as
//! a template for new backends: it is the smallest possible implementation
//! of the provider contract.

use crate::provider::RemoteProvider;
use buildcache_core::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared backing storage for [`MemoryProvider`] instances.
pub type MemoryStore = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Provider over an in-process map.
pub struct MemoryProvider {
    store: MemoryStore,
    connected: bool,
}

impl MemoryProvider {
    /// A provider with its own private storage.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(MemoryStore::default())
    }

    /// A provider sharing `store` with other instances, as separate
    /// invocations share one real remote.
    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            connected: false,
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteProvider for MemoryProvider {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.connected {
            return Err(Error::remote("not connected"));
        }
        let store = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(store.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::remote("not connected"));
        }
        let mut store = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        store.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_put_roundtrip() {
        let mut provider = MemoryProvider::new();
        provider.connect().unwrap();
        assert_eq!(provider.get("k").unwrap(), None);
        provider.put("k", b"v").unwrap();
        assert_eq!(provider.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn storage_is_shared_between_instances() {
        let store = MemoryStore::default();
        let mut a = MemoryProvider::with_store(Arc::clone(&store));
        let mut b = MemoryProvider::with_store(store);
        a.connect().unwrap();
        b.connect().unwrap();

        a.put("k", b"v").unwrap();
        assert_eq!(b.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn disconnected_provider_errors() {
        let mut provider = MemoryProvider::new();
        assert!(provider.get("k").is_err());
        provider.connect().unwrap();
        provider.disconnect();
        assert!(provider.put("k", b"v").is_err());
    }
}
