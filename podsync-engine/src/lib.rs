//! Local-first encrypted pod synchronization engine.
//!
//! Keeps a single encrypted data file (a "pod") consistent across
//! independent devices, each holding its own local cache, with no
//! server-mediated coordination. Concurrent offline edits are reconciled
//! record-by-record with last-write-wins timestamps and deletion
//! tombstones; remote changes are picked up opportunistically by polling
//! the pod's mtime; and a write is refused outright rather than ever
//! persisting plaintext when encryption is mandatory.
//!
//! # Components
//!
//! - **SyncService**: the orchestrator — state machine, debounced writes,
//!   save/reload sequencing, status stream
//! - **ChangeDetector**: mtime polling plus foreground/background hooks
//! - **TenantGuard**: binds each pod handle to one tenant, fails closed
//! - **DomainStore / LocalCache**: the seam to the domain-owned cache
//! - crates `podsync-merge`, `podsync-crypto`, `podsync-storage` supply
//!   the merge algebra, the crypto gate and the storage providers
//!
//! # Example
//!
//! ```no_run
//! use podsync_engine::{change_channel, LocalCache, SyncConfig, SyncService};
//! use podsync_merge::MergePolicy;
//! use podsync_storage::LocalFileProvider;
//! use podsync_types::TenantId;
//! use std::sync::Arc;
//!
//! # async fn run() -> podsync_engine::SyncResult<()> {
//! let service = SyncService::new(
//!     SyncConfig::default(),
//!     TenantId::new(),
//!     "Family",
//!     MergePolicy::new().with_singleton("settings"),
//! );
//!
//! let (changes_tx, changes_rx) = change_channel();
//! let accounts = LocalCache::new("accounts", service.deletion_log(), changes_tx);
//! service.register_store(accounts.clone());
//! service.attach_changes(changes_rx);
//!
//! service.configure(Arc::new(LocalFileProvider::new("family.pod")))?;
//! service.reload(false).await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod detector;
mod error;
mod service;
mod session;
mod tenant;

pub use cache::{
    change_channel, ChangeReceiver, ChangeSender, DeletionLog, DomainStore, LocalCache,
};
pub use detector::ChangeDetector;
pub use error::{SyncError, SyncResult};
pub use service::{SyncConfig, SyncService};
pub use session::{SyncPhase, SyncStatus};
pub use tenant::TenantGuard;
