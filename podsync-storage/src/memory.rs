//! In-memory provider for tests and ephemeral pods.

use crate::error::{StorageError, StorageResult};
use crate::StorageProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Slot {
    bytes: Option<Vec<u8>>,
    modified_at: Option<DateTime<Utc>>,
}

/// Holds the pod blob in memory.
///
/// Counts every read, write and stat so tests can assert properties such
/// as "five mutations produced exactly one write" and "a refused save
/// wrote zero bytes". `fail_writes`/`fail_reads` simulate a revoked or
/// offline backing store.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    slot: Mutex<Slot>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    stats: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plants a blob as if another device had written it at `modified_at`.
    pub fn plant(&self, bytes: Vec<u8>, modified_at: DateTime<Utc>) {
        let mut slot = self.slot.lock().expect("memory provider poisoned");
        slot.bytes = Some(bytes);
        slot.modified_at = Some(modified_at);
    }

    /// Overrides the last-modified time without touching the blob.
    pub fn set_last_modified(&self, modified_at: DateTime<Utc>) {
        self.slot
            .lock()
            .expect("memory provider poisoned")
            .modified_at = Some(modified_at);
    }

    /// Makes subsequent reads fail as unavailable.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent writes fail as unavailable.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful or attempted reads.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write attempts (failed writes count; nothing is stored).
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of last-modified stats.
    #[must_use]
    pub fn stat_count(&self) -> usize {
        self.stats.load(Ordering::SeqCst)
    }

    /// Returns a copy of the stored blob, bypassing counters.
    #[must_use]
    pub fn stored(&self) -> Option<Vec<u8>> {
        self.slot
            .lock()
            .expect("memory provider poisoned")
            .bytes
            .clone()
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self) -> StorageResult<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated read failure".into()));
        }
        Ok(self.stored())
    }

    async fn write(&self, bytes: &[u8]) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated write failure".into()));
        }
        let mut slot = self.slot.lock().expect("memory provider poisoned");
        slot.bytes = Some(bytes.to_vec());
        slot.modified_at = Some(Utc::now());
        Ok(())
    }

    async fn last_modified(&self) -> StorageResult<Option<DateTime<Utc>>> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated stat failure".into()));
        }
        Ok(self
            .slot
            .lock()
            .expect("memory provider poisoned")
            .modified_at)
    }
}
