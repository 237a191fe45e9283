//! Error types shared by every buildcache crate

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations.
///
/// A cache miss is not an error: lookup paths return `Option` instead. The
/// variants here cover the failures that can actually stop an operation.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(buildcache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Configuration or validation error
    #[error("configuration error: {message}")]
    #[diagnostic(code(buildcache::config))]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Stored cache data that cannot be decoded.
    ///
    /// Callers on the lookup path log this and degrade to a miss; it never
    /// reaches the driver as a hard failure.
    #[error("corrupt cache data: {message}")]
    #[diagnostic(code(buildcache::corrupt))]
    Corrupt {
        /// What was wrong with the data
        message: String,
    },

    /// Transient remote-cache failure (network, protocol)
    #[error("remote cache error: {message}")]
    #[diagnostic(
        code(buildcache::remote),
        help("The remote cache is treated as missing until the next invocation")
    )]
    Remote {
        /// Transport-level error description
        message: String,
    },

    /// The wrapper cannot produce a canonical input for this command line.
    ///
    /// Only `preprocess_source` may raise this; the driver reacts by passing
    /// the command through to the tool uncached.
    #[error("unsupported command: {message}")]
    #[diagnostic(code(buildcache::unsupported))]
    Unsupported {
        /// Why the command cannot be cached
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a corrupt-data error
    #[must_use]
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt {
            message: msg.into(),
        }
    }

    /// Create a transient remote error
    #[must_use]
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote {
            message: msg.into(),
        }
    }

    /// Create an unsupported-command error
    #[must_use]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_message_includes_path() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "/tmp/x",
            "read",
        );
        let msg = err.to_string();
        assert!(msg.contains("read"));
        assert!(msg.contains("/tmp/x"));
    }

    #[test]
    fn io_error_without_path() {
        let err = Error::io_no_path(
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
            "spawn",
        );
        assert_eq!(err.to_string(), "I/O spawn failed");
    }

    #[test]
    fn constructor_helpers() {
        assert!(matches!(Error::config("x"), Error::Config { .. }));
        assert!(matches!(Error::corrupt("x"), Error::Corrupt { .. }));
        assert!(matches!(Error::remote("x"), Error::Remote { .. }));
        assert!(matches!(Error::unsupported("x"), Error::Unsupported { .. }));
    }
}
