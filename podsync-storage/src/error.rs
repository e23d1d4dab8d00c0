//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
///
/// All of these are treated as transient by the engine: permission may be
/// re-granted, the network may come back. None are fatal.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store refused access (revoked permission, auth expiry).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backing store is unreachable (offline, unmounted).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Any other I/O failure.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(e.to_string()),
            std::io::ErrorKind::NotConnected | std::io::ErrorKind::TimedOut => {
                Self::Unavailable(e.to_string())
            }
            _ => Self::Io(e.to_string()),
        }
    }
}
