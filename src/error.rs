//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::key::InvocationShape;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// A missing or expired entry is not an error: the store reports it as `None`
/// and the engine recomputes.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A value could not be represented, not even through the opaque fallback
    #[error("Encode failure: {0}")]
    Encode(String),

    /// Stored bytes are not valid wire format
    #[error("Decode failure: {0}")]
    Decode(String),

    /// The exclusive lock of an entry could not be acquired
    #[error("Failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Filesystem access on a namespace directory or entry file failed
    #[error("Storage error during {operation} on {}: {source}", .path.display())]
    Storage {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Call arguments cannot be bound against the callable descriptor
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handle was invoked through a shape its descriptor does not declare
    #[error("Shape mismatch: descriptor declares {declared:?}, invoked as {invoked:?}")]
    ShapeMismatch {
        declared: InvocationShape,
        invoked: InvocationShape,
    },

    /// The caller's compute function failed; nothing was stored
    #[error(transparent)]
    Compute(#[from] anyhow::Error),

    /// Internal error (e.g. a blocking task panicked)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Builds a [`CacheError::Storage`] for the given operation and path.
    pub fn storage(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Storage {
            operation,
            path: path.into(),
            source,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_names_path_and_operation() {
        let err = CacheError::storage(
            "remove",
            "/tmp/ns/abc.msgpack",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.contains("remove"));
        assert!(message.contains("/tmp/ns/abc.msgpack"));
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_compute_error_is_transparent() {
        let err: CacheError = anyhow::anyhow!("upstream timed out").into();
        assert!(matches!(err, CacheError::Compute(_)));
        assert_eq!(err.to_string(), "upstream timed out");
    }
}
