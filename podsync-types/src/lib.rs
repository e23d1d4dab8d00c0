//! Core type definitions for podsync.
//!
//! This crate defines the fundamental, domain-agnostic types shared by the
//! sync engine:
//! - Tenant, record and entity-type identifiers
//! - The versioned `Snapshot` envelope (records + deletion tombstones)
//! - The on-disk `PodFile` container (plaintext or encrypted)
//!
//! Domain-specific record schemas (accounts, transactions, todos, …) belong
//! to the stores that own them, not here: the engine only ever needs a
//! record's `id` and `updatedAt`.

mod envelope;
mod ids;
mod snapshot;

pub use envelope::{EncryptedPod, PodFile};
pub use ids::{EntityType, RecordId, TenantId};
pub use snapshot::{FormatVersion, Record, Snapshot, Tombstone, CURRENT_FORMAT_VERSION};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The file declares a format version this build does not understand.
    /// Nothing past the version field is parsed in that case.
    #[error("unsupported snapshot format version: {0}")]
    UnsupportedVersion(String),
}
