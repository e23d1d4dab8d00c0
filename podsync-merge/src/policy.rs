//! The entity-type → merge-strategy table.
//!
//! Collections (accounts, transactions, todos, …) merge per record.
//! Singleton configuration objects (settings) merge as one whole object by
//! last-write-wins on the object's own `updatedAt`, never field-by-field —
//! two devices may have minted different ids for "the settings record", so
//! id-based merging would duplicate it.

use podsync_types::EntityType;
use std::collections::BTreeSet;

/// How records of an entity type are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Per-record last-write-wins with tombstones.
    Collection,
    /// The whole collection collapses to the single most recently updated
    /// object.
    Singleton,
}

/// Lookup table mapping entity types to merge strategies.
///
/// Every type defaults to [`MergeStrategy::Collection`]; singletons are
/// registered explicitly.
#[derive(Debug, Clone, Default)]
pub struct MergePolicy {
    singletons: BTreeSet<EntityType>,
}

impl MergePolicy {
    /// Creates a policy where every entity type is a collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type as a singleton (builder style).
    #[must_use]
    pub fn with_singleton(mut self, entity_type: impl Into<EntityType>) -> Self {
        self.singletons.insert(entity_type.into());
        self
    }

    /// Returns the strategy for an entity type.
    #[must_use]
    pub fn strategy_for(&self, entity_type: &EntityType) -> MergeStrategy {
        if self.singletons.contains(entity_type) {
            MergeStrategy::Singleton
        } else {
            MergeStrategy::Collection
        }
    }
}
