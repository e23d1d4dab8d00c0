//! Session state and the observable sync status.

use chrono::{DateTime, Utc};

/// Where the engine currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No storage target bound. The only phase `reset()` returns to.
    #[default]
    Uninitialized,
    /// Bound and idle; mutations are being debounced.
    Configured,
    /// A save is in flight.
    Saving,
    /// A remote snapshot is being read and merged (transient sub-phase of
    /// `Configured`).
    Reloading,
    /// The last save or reload failed; retried on the next mutation or
    /// poll tick. Never fatal.
    Error,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Configured => "configured",
            Self::Saving => "saving",
            Self::Reloading => "reloading",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// The status stream payload consumed by UI indicators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    /// Current lifecycle phase.
    pub phase: SyncPhase,
    /// Name of the bound pod file, when configured.
    pub file_name: Option<String>,
    /// Last failure, for the "not yet saved, retrying" indicator. Cleared
    /// on the next successful save or reload.
    pub last_error: Option<String>,
}

/// Mutable per-session bookkeeping. Created when a pod is configured,
/// reset to defaults on sign-out or tenant switch.
#[derive(Debug, Default)]
pub(crate) struct SyncSession {
    pub phase: SyncPhase,
    /// Newest remote mtime this session has itself written or consumed.
    /// The poll path only reloads for mtimes strictly newer than this,
    /// which is what makes one remote change trigger exactly one reload.
    pub remote_watermark: Option<DateTime<Utc>>,
    /// When this session last wrote the pod.
    pub last_local_save: Option<DateTime<Utc>>,
    /// Unsaved local mutations exist.
    pub dirty: bool,
    /// Last failure, surfaced through the status stream.
    pub last_error: Option<String>,
}
