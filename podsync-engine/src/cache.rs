//! The local cache seam.
//!
//! Domain stores own the materialized records; the engine only needs two
//! operations per entity type (`get_all` for building snapshots,
//! `replace_all` for publishing merge results) plus a change notification
//! it can turn into a debounced write. [`LocalCache`] is the in-process
//! implementation the host wires one of per entity type; anything else
//! implementing [`DomainStore`] works the same.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podsync_types::{EntityType, Record, RecordId, Tombstone};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// One entity type's slice of the local cache.
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// The entity type this store owns.
    fn entity_type(&self) -> EntityType;

    /// All current records, sorted by id.
    async fn get_all(&self) -> Vec<Record>;

    /// Replaces the store's content with a merged result.
    async fn replace_all(&self, records: Vec<Record>);
}

/// Sends change notifications from domain stores to the orchestrator.
pub type ChangeSender = mpsc::UnboundedSender<EntityType>;

/// Receives change notifications; handed to
/// [`SyncService::attach_changes`](crate::SyncService::attach_changes).
pub type ChangeReceiver = mpsc::UnboundedReceiver<EntityType>;

/// Creates a change-notification channel.
#[must_use]
pub fn change_channel() -> (ChangeSender, ChangeReceiver) {
    mpsc::unbounded_channel()
}

/// The shared deletion log: one tombstone per domain delete, consumed when
/// snapshots are built and rewritten when a merge result is published.
#[derive(Debug, Default)]
pub struct DeletionLog {
    tombstones: RwLock<Vec<Tombstone>>,
}

impl DeletionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tombstone.
    pub fn record(&self, tombstone: Tombstone) {
        self.tombstones
            .write()
            .expect("deletion log poisoned")
            .push(tombstone);
    }

    /// Returns all tombstones in canonical (entity type, id) order.
    #[must_use]
    pub fn all(&self) -> Vec<Tombstone> {
        let mut tombstones = self
            .tombstones
            .read()
            .expect("deletion log poisoned")
            .clone();
        tombstones.sort_by(|a, b| (&a.entity_type, &a.id).cmp(&(&b.entity_type, &b.id)));
        tombstones
    }

    /// Replaces the log with a merge result.
    pub fn replace(&self, tombstones: Vec<Tombstone>) {
        *self.tombstones.write().expect("deletion log poisoned") = tombstones;
    }
}

/// In-process domain store for one entity type.
pub struct LocalCache {
    entity_type: EntityType,
    records: RwLock<BTreeMap<RecordId, Record>>,
    deletions: Arc<DeletionLog>,
    changes: ChangeSender,
}

impl LocalCache {
    /// Creates a cache for one entity type, wired to the shared deletion
    /// log and change channel.
    pub fn new(
        entity_type: impl Into<EntityType>,
        deletions: Arc<DeletionLog>,
        changes: ChangeSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            entity_type: entity_type.into(),
            records: RwLock::new(BTreeMap::new()),
            deletions,
            changes,
        })
    }

    /// Inserts or updates a record and notifies the orchestrator. The
    /// caller owns `updatedAt` and must advance it on every mutation.
    pub fn upsert(&self, record: Record) {
        self.records
            .write()
            .expect("local cache poisoned")
            .insert(record.id.clone(), record);
        self.notify();
    }

    /// Deletes a record: drops it from the cache, appends a tombstone and
    /// notifies the orchestrator.
    pub fn delete(&self, id: &RecordId, deleted_at: DateTime<Utc>) {
        let removed = self
            .records
            .write()
            .expect("local cache poisoned")
            .remove(id)
            .is_some();
        if removed {
            self.deletions.record(Tombstone::new(
                id.clone(),
                self.entity_type.clone(),
                deleted_at,
            ));
            self.notify();
        }
    }

    /// Returns a record by id.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.records
            .read()
            .expect("local cache poisoned")
            .get(id)
            .cloned()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().expect("local cache poisoned").len()
    }

    /// True if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self) {
        // The receiver side is the orchestrator; if it is gone there is
        // nothing to debounce.
        let _ = self.changes.send(self.entity_type.clone());
    }
}

#[async_trait]
impl DomainStore for LocalCache {
    fn entity_type(&self) -> EntityType {
        self.entity_type.clone()
    }

    async fn get_all(&self) -> Vec<Record> {
        self.records
            .read()
            .expect("local cache poisoned")
            .values()
            .cloned()
            .collect()
    }

    async fn replace_all(&self, records: Vec<Record>) {
        let mut map = BTreeMap::new();
        for record in records {
            map.insert(record.id.clone(), record);
        }
        *self.records.write().expect("local cache poisoned") = map;
    }
}
