//! The merge algorithm.

use crate::policy::{MergePolicy, MergeStrategy};
use chrono::{DateTime, Duration, Utc};
use podsync_types::{EntityType, Record, RecordId, Snapshot, Tombstone};
use std::collections::{BTreeMap, BTreeSet};

/// Tombstones older than this are dropped from the merged output after
/// being applied. A device offline longer than the window may resurrect a
/// deleted record; that is the documented trade-off for a bounded log.
pub const TOMBSTONE_RETENTION_DAYS: i64 = 30;

/// Merges two snapshots of the same pod.
///
/// The caller has already verified both snapshots belong to the same
/// tenant and are at the current format version (legacy snapshots are
/// upgraded before merge logic runs). `now` anchors tombstone retention.
///
/// Output records are sorted by id within each entity type, which is the
/// canonical order snapshots are built in.
#[must_use]
pub fn merge_snapshots(
    local: &Snapshot,
    remote: &Snapshot,
    policy: &MergePolicy,
    now: DateTime<Utc>,
) -> Snapshot {
    debug_assert_eq!(
        local.tenant_id, remote.tenant_id,
        "cross-tenant merge must be refused before reaching the merge engine"
    );

    let tombstones = union_tombstones(&local.deletions, &remote.deletions);

    let entity_types: BTreeSet<&EntityType> =
        local.data.keys().chain(remote.data.keys()).collect();

    let mut merged = Snapshot {
        format_version: podsync_types::CURRENT_FORMAT_VERSION,
        tenant_id: local.tenant_id.clone(),
        tenant_name: later_tenant_name(local, remote),
        encrypted: local.encrypted || remote.encrypted,
        exported_at: local.exported_at.max(remote.exported_at),
        data: BTreeMap::new(),
        deletions: Vec::new(),
    };

    for entity_type in entity_types {
        let records = match policy.strategy_for(entity_type) {
            MergeStrategy::Collection => merge_collection(
                local.records(entity_type),
                remote.records(entity_type),
                entity_type,
                &tombstones,
            ),
            MergeStrategy::Singleton => {
                merge_singleton(local.records(entity_type), remote.records(entity_type))
            }
        };
        merged.data.insert(entity_type.clone(), records);
    }

    let horizon = now - Duration::days(TOMBSTONE_RETENTION_DAYS);
    merged.deletions = tombstones
        .into_values()
        .filter(|t| t.deleted_at >= horizon)
        .collect();

    merged
}

/// Unions both deletion logs; for an id tombstoned on both sides the later
/// `deletedAt` wins. Keyed by (entity type, id) so the same id in two
/// collections stays independent.
fn union_tombstones(
    local: &[Tombstone],
    remote: &[Tombstone],
) -> BTreeMap<(EntityType, RecordId), Tombstone> {
    let mut union: BTreeMap<(EntityType, RecordId), Tombstone> = BTreeMap::new();
    for tombstone in local.iter().chain(remote.iter()) {
        let key = (tombstone.entity_type.clone(), tombstone.id.clone());
        match union.get(&key) {
            Some(existing) if existing.deleted_at >= tombstone.deleted_at => {}
            _ => {
                union.insert(key, tombstone.clone());
            }
        }
    }
    union
}

/// Per-record merge for a collection entity type.
fn merge_collection(
    local: &[Record],
    remote: &[Record],
    entity_type: &EntityType,
    tombstones: &BTreeMap<(EntityType, RecordId), Tombstone>,
) -> Vec<Record> {
    let local_by_id: BTreeMap<&RecordId, &Record> = local.iter().map(|r| (&r.id, r)).collect();
    let remote_by_id: BTreeMap<&RecordId, &Record> = remote.iter().map(|r| (&r.id, r)).collect();

    let candidate_ids: BTreeSet<&RecordId> =
        local_by_id.keys().chain(remote_by_id.keys()).copied().collect();

    let mut kept = Vec::new();
    for id in candidate_ids {
        let winner = match (local_by_id.get(id), remote_by_id.get(id)) {
            (Some(l), Some(r)) => later_record(l, r),
            (Some(l), None) => *l,
            (None, Some(r)) => *r,
            (None, None) => unreachable!("candidate id without a record"),
        };

        // A tombstone at or after the surviving record's updatedAt keeps
        // the record deleted; an edit strictly after the deletion revives it.
        let deleted = tombstones
            .get(&(entity_type.clone(), id.clone()))
            .is_some_and(|t| t.deleted_at >= winner.updated_at);

        if !deleted {
            kept.push(winner.clone());
        }
    }

    kept
}

/// Whole-object last-write-wins for a singleton entity type. The two sides
/// may carry different ids for the same logical object, so the comparison
/// ignores ids except as the deterministic tie-breaker.
fn merge_singleton(local: &[Record], remote: &[Record]) -> Vec<Record> {
    local
        .iter()
        .chain(remote.iter())
        .reduce(|a, b| later_record(a, b))
        .cloned()
        .into_iter()
        .collect()
}

/// LWW comparison: greater `updatedAt` wins; exact ties go to the greater
/// id (direction-independent). Equal id and timestamp means the record was
/// not modified on either side, so either copy is the same record.
fn later_record<'a>(a: &'a Record, b: &'a Record) -> &'a Record {
    match a.updated_at.cmp(&b.updated_at) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Equal => {
            if b.id > a.id {
                b
            } else {
                a
            }
        }
    }
}

/// The display name travels with whichever side exported later; a tie
/// falls back to the lexicographically greater name so the choice stays
/// direction-independent.
fn later_tenant_name(local: &Snapshot, remote: &Snapshot) -> String {
    match local.exported_at.cmp(&remote.exported_at) {
        std::cmp::Ordering::Greater => local.tenant_name.clone(),
        std::cmp::Ordering::Less => remote.tenant_name.clone(),
        std::cmp::Ordering::Equal => {
            std::cmp::max(local.tenant_name.clone(), remote.tenant_name.clone())
        }
    }
}
