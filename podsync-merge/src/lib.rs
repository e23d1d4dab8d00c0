//! Snapshot reconciliation for podsync.
//!
//! Reconciles two snapshots of the same pod record-by-record using
//! last-write-wins timestamps and deletion tombstones. The merge is
//! commutative and idempotent — `merge(a, b) == merge(b, a)` and
//! `merge(a, a) == a` — so two devices that exchange snapshots in either
//! order converge on the same state, and a third device merging the result
//! again changes nothing.
//!
//! # Ordering rules
//!
//! - Between two records with the same id, the greater `updatedAt` wins.
//! - A tombstone's `deletedAt` is compared with the same rule, as a
//!   virtual edit. On an exact tombstone-vs-record tie the tombstone wins.
//! - On an exact record-vs-record tie the lexicographically greater id
//!   wins; with equal ids the records are identical (`updatedAt` strictly
//!   advances on every mutation), so the choice is unobservable.
//!
//! All three rules are direction-independent, which is what makes the
//! merge commutative.

mod engine;
mod policy;

pub use engine::{merge_snapshots, TOMBSTONE_RETENTION_DAYS};
pub use policy::{MergePolicy, MergeStrategy};
