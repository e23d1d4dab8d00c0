//! Storage provider abstraction for podsync.
//!
//! A provider is a named slot for one binary blob — the pod file — in some
//! backing store: a local filesystem path today, a cloud drive behind the
//! same trait tomorrow. The engine only ever needs three operations: read
//! the blob, replace it, and stat its last-modified time (the cheap probe
//! the change detector polls).

mod error;
mod local;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::{StorageError, StorageResult};
pub use local::LocalFileProvider;
pub use memory::MemoryProvider;

/// A named slot for the pod blob in a backing store.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Human-readable name of the target (shown in sync status).
    fn name(&self) -> &str;

    /// Reads the full blob, or `None` if it does not exist yet.
    async fn read(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the blob atomically: a crashed write must never leave a
    /// torn pod behind.
    async fn write(&self, bytes: &[u8]) -> StorageResult<()>;

    /// Stats the blob's last-modified time, or `None` if it does not
    /// exist. Must not read the blob's content.
    async fn last_modified(&self) -> StorageResult<Option<DateTime<Utc>>>;
}
