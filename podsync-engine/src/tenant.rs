//! Tenant binding for pod handles.
//!
//! A pod belongs to exactly one tenant. The guard remembers which tenant a
//! handle was first opened under and refuses any later load or save for a
//! different tenant — failing closed is always preferable to a
//! cross-tenant merge.

use crate::error::{SyncError, SyncResult};
use podsync_types::TenantId;
use std::collections::HashMap;
use std::sync::RwLock;

/// Records which tenant each storage handle belongs to.
#[derive(Debug, Default)]
pub struct TenantGuard {
    bindings: RwLock<HashMap<String, TenantId>>,
}

impl TenantGuard {
    /// Creates an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the tenant a handle belongs to on first open/create.
    /// Binding the same pair again is a no-op; binding a different tenant
    /// is refused like any other mismatch.
    pub fn bind(&self, handle: &str, tenant: &TenantId) -> SyncResult<()> {
        let mut bindings = self.bindings.write().expect("tenant guard poisoned");
        match bindings.get(handle) {
            None => {
                bindings.insert(handle.to_string(), tenant.clone());
                Ok(())
            }
            Some(bound) if bound == tenant => Ok(()),
            Some(bound) => Err(SyncError::TenantMismatch {
                bound: bound.clone(),
                active: tenant.clone(),
            }),
        }
    }

    /// Verifies a handle is either unbound or bound to the active tenant.
    /// Called before every load and save.
    pub fn assert_match(&self, handle: &str, active: &TenantId) -> SyncResult<()> {
        let bindings = self.bindings.read().expect("tenant guard poisoned");
        match bindings.get(handle) {
            None => Ok(()),
            Some(bound) if bound == active => Ok(()),
            Some(bound) => Err(SyncError::TenantMismatch {
                bound: bound.clone(),
                active: active.clone(),
            }),
        }
    }

    /// Forgets all bindings (sign-out / tenant switch).
    pub fn reset(&self) {
        self.bindings.write().expect("tenant guard poisoned").clear();
    }
}
