//! Redis transport
//!
//! The synchronous request/response provider. One connection per
//! invocation; any transport failure drops the connection so the rest of
//! the invocation reads as a chain of misses instead of repeated timeouts.

use crate::provider::RemoteProvider;
use buildcache_core::{Error, Result};
use std::time::Duration;

/// Timeout for establishing the connection.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Redis-backed remote provider.
pub struct RedisProvider {
    url: String,
    connection: Option<redis::Connection>,
}

impl RedisProvider {
    /// Build a provider from the host description, e.g. `"cache.local:6379"`.
    ///
    /// # Errors
    ///
    /// Returns a config error when the description is not `host:port`.
    pub fn new(host_description: &str) -> Result<Self> {
        let (host, port) = host_description
            .split_once(':')
            .ok_or_else(|| Error::config(format!("invalid remote address {host_description:?}")))?;
        if host.is_empty() {
            return Err(Error::config(format!(
                "invalid remote host in {host_description:?}"
            )));
        }
        let port: u16 = port.parse().map_err(|_| {
            Error::config(format!("invalid remote port in {host_description:?}"))
        })?;
        Ok(Self {
            url: format!("redis://{host}:{port}"),
            connection: None,
        })
    }

    fn connection(&mut self) -> Result<&mut redis::Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| Error::remote("not connected"))
    }
}

impl RemoteProvider for RedisProvider {
    fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| Error::remote(format!("bad redis endpoint: {e}")))?;
        let connection = client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|e| Error::remote(format!("connect failed: {e}")))?;
        self.connection = Some(connection);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let connection = self.connection()?;
        match redis::cmd("GET")
            .arg(key)
            .query::<Option<Vec<u8>>>(connection)
        {
            Ok(Some(data)) => {
                tracing::debug!(key = %key, bytes = data.len(), "Downloaded from remote cache");
                Ok(Some(data))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.disconnect();
                Err(Error::remote(format!("GET failed: {e}")))
            }
        }
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let connection = self.connection()?;
        match redis::cmd("SET").arg(key).arg(value).query::<()>(connection) {
            Ok(()) => {
                tracing::debug!(key = %key, bytes = value.len(), "Uploaded to remote cache");
                Ok(())
            }
            Err(e) => {
                self.disconnect();
                Err(Error::remote(format!("SET failed: {e}")))
            }
        }
    }

    fn disconnect(&mut self) {
        self.connection = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let provider = RedisProvider::new("cache.local:6379").unwrap();
        assert_eq!(provider.url, "redis://cache.local:6379");
        assert!(!provider.is_connected());
    }

    #[test]
    fn rejects_malformed_descriptions() {
        assert!(RedisProvider::new("no-port").is_err());
        assert!(RedisProvider::new(":6379").is_err());
        assert!(RedisProvider::new("host:not-a-port").is_err());
    }

    #[test]
    fn operations_without_a_connection_are_remote_errors() {
        let mut provider = RedisProvider::new("localhost:6379").unwrap();
        assert!(matches!(provider.get("k"), Err(Error::Remote { .. })));
        assert!(matches!(provider.put("k", b"v"), Err(Error::Remote { .. })));
    }

    #[test]
    fn connecting_to_a_dead_endpoint_fails_fast() {
        // Port 1 is never a Redis server.
        let mut provider = RedisProvider::new("127.0.0.1:1").unwrap();
        assert!(provider.connect().is_err());
        assert!(!provider.is_connected());
    }
}
