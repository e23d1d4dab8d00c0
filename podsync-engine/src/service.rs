//! The sync orchestrator.
//!
//! `SyncService` owns the state machine: it debounces outbound writes,
//! sequences saves against reloads, and runs every byte through the
//! crypto and tenant gates before it reaches the storage provider.
//!
//! Outbound: domain mutation → `request_write()` (debounced) → build
//! snapshot → encrypt (when required) → tenant check → provider write.
//! Inbound: poll notices a newer remote mtime → `reload(merge)` → read →
//! decrypt → merge into the local cache → write the merged result back so
//! a third device sees the resolved state instead of racing two writers.
//!
//! Saves and reloads share one suspending mutex: whichever starts second
//! queues behind the first. There are no OS-thread locks on the hot path —
//! the runtime is cooperative and every I/O or crypto step is an `.await`.

use crate::cache::{ChangeReceiver, DeletionLog, DomainStore};
use crate::error::{SyncError, SyncResult};
use crate::session::{SyncPhase, SyncSession, SyncStatus};
use crate::tenant::TenantGuard;
use chrono::Utc;
use podsync_crypto::{
    open_pod, seal_pod, CipherPayload, KdfParams, Salt, SecretGate, UnlockSecret,
};
use podsync_merge::{merge_snapshots, MergePolicy};
use podsync_storage::StorageProvider;
use podsync_types::{EncryptedPod, EntityType, PodFile, Record, Snapshot, TenantId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period after the last mutation before a save fires.
    pub debounce: Duration,
    /// How often the change detector polls the remote mtime.
    pub poll_interval: Duration,
    /// When true, `save()` refuses to write without an unlock secret.
    pub encryption_required: bool,
    /// Key-derivation parameters for sealing/opening pods.
    pub kdf: KdfParams,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            poll_interval: Duration::from_secs(10),
            encryption_required: true,
            kdf: KdfParams::default(),
        }
    }
}

/// The sync orchestrator. One per active tenant session; cheap to share
/// behind an `Arc`.
pub struct SyncService {
    config: SyncConfig,
    tenant_id: TenantId,
    tenant_name: String,
    policy: MergePolicy,
    gate: SecretGate,
    guard: TenantGuard,
    deletions: Arc<DeletionLog>,
    stores: RwLock<Vec<Arc<dyn DomainStore>>>,
    /// Entity types present in the pod but without a registered store are
    /// carried through saves untouched, so an older client never drops
    /// data it does not understand.
    passthrough: RwLock<BTreeMap<EntityType, Vec<Record>>>,
    provider: RwLock<Option<Arc<dyn StorageProvider>>>,
    session: RwLock<SyncSession>,
    /// Serializes saves against reloads; suspending, never blocking.
    io_gate: Mutex<()>,
    debounce_task: StdMutex<Option<JoinHandle<()>>>,
    aux_tasks: StdMutex<Vec<JoinHandle<()>>>,
    status_tx: watch::Sender<SyncStatus>,
}

impl SyncService {
    /// Creates an unconfigured engine for the given tenant session.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        tenant_id: TenantId,
        tenant_name: impl Into<String>,
        policy: MergePolicy,
    ) -> Arc<Self> {
        let (status_tx, _status_rx) = watch::channel(SyncStatus::default());
        Arc::new(Self {
            config,
            tenant_id,
            tenant_name: tenant_name.into(),
            policy,
            gate: SecretGate::new(),
            guard: TenantGuard::new(),
            deletions: Arc::new(DeletionLog::new()),
            stores: RwLock::new(Vec::new()),
            passthrough: RwLock::new(BTreeMap::new()),
            provider: RwLock::new(None),
            session: RwLock::new(SyncSession::default()),
            io_gate: Mutex::new(()),
            debounce_task: StdMutex::new(None),
            aux_tasks: StdMutex::new(Vec::new()),
            status_tx,
        })
    }

    /// The configured poll interval, used by the change detector.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// The shared deletion log domain caches append tombstones to.
    #[must_use]
    pub fn deletion_log(&self) -> Arc<DeletionLog> {
        self.deletions.clone()
    }

    /// Registers a domain store for one entity type.
    pub fn register_store(&self, store: Arc<dyn DomainStore>) {
        self.stores.write().expect("stores poisoned").push(store);
    }

    /// Subscribes the engine to a change-notification stream: every
    /// notification becomes a (debounced) `request_write()`.
    pub fn attach_changes(self: &Arc<Self>, mut changes: ChangeReceiver) {
        let service = self.clone();
        let task = tokio::spawn(async move {
            while let Some(entity_type) = changes.recv().await {
                debug!(%entity_type, "domain mutation observed");
                service.request_write();
            }
        });
        self.aux_tasks.lock().expect("aux tasks poisoned").push(task);
    }

    /// Tracks a background task (the change detector's poll loop) so
    /// `reset()` can stop it.
    pub(crate) fn adopt_task(&self, task: JoinHandle<()>) {
        self.aux_tasks.lock().expect("aux tasks poisoned").push(task);
    }

    // ── Status stream ────────────────────────────────────────────

    /// Subscribes to the observable status stream.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    fn publish(&self) {
        let session = self.session.read().expect("session poisoned");
        let file_name = self
            .provider
            .read()
            .expect("provider poisoned")
            .as_ref()
            .map(|p| p.name().to_string());
        self.status_tx.send_replace(SyncStatus {
            phase: session.phase,
            file_name,
            last_error: session.last_error.clone(),
        });
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.session.write().expect("session poisoned").phase = phase;
        self.publish();
    }

    // ── Secret handling ──────────────────────────────────────────

    /// Stores the unlock secret supplied by the unlock flow. If a write
    /// was refused for lack of a secret, it is retried now.
    pub fn set_secret(self: &Arc<Self>, secret: UnlockSecret) {
        self.gate.set(secret);
        let dirty = self.session.read().expect("session poisoned").dirty;
        if dirty && self.is_configured() {
            debug!("secret appeared with unsaved changes, rescheduling write");
            self.request_write();
        }
    }

    /// Clears and zeroizes the unlock secret.
    pub fn clear_secret(&self) {
        self.gate.clear();
    }

    /// True if an unlock secret is currently held.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.gate.is_unlocked()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Binds a storage target and moves to `Configured`. The handle is
    /// bound to the active tenant on first configure; a handle previously
    /// bound to another tenant is refused.
    pub fn configure(self: &Arc<Self>, provider: Arc<dyn StorageProvider>) -> SyncResult<()> {
        self.guard.bind(provider.name(), &self.tenant_id)?;
        info!(provider = provider.name(), tenant = %self.tenant_id, "pod configured");
        *self.provider.write().expect("provider poisoned") = Some(provider);
        self.set_phase(SyncPhase::Configured);
        Ok(())
    }

    /// True once a storage target is bound.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.provider.read().expect("provider poisoned").is_some()
    }

    fn provider(&self) -> SyncResult<Arc<dyn StorageProvider>> {
        self.provider
            .read()
            .expect("provider poisoned")
            .clone()
            .ok_or(SyncError::NotConfigured)
    }

    /// Stops polling and pending writes, zeroizes the secret and clears
    /// the file binding. Domain stores keep their in-memory records; the
    /// next `configure()` starts a fresh session.
    pub fn reset(&self) {
        if let Some(task) = self.debounce_task.lock().expect("debounce poisoned").take() {
            task.abort();
        }
        for task in self.aux_tasks.lock().expect("aux tasks poisoned").drain(..) {
            task.abort();
        }
        self.gate.clear();
        self.guard.reset();
        *self.provider.write().expect("provider poisoned") = None;
        *self.session.write().expect("session poisoned") = SyncSession::default();
        self.passthrough.write().expect("passthrough poisoned").clear();
        self.deletions.replace(Vec::new());
        info!("sync session reset");
        self.publish();
    }

    // ── Outbound path ────────────────────────────────────────────

    /// Notes a domain mutation and (re)starts the debounce timer. Never
    /// writes synchronously; safe to call at any rate.
    pub fn request_write(self: &Arc<Self>) {
        self.session.write().expect("session poisoned").dirty = true;
        if !self.is_configured() {
            return;
        }

        let service = self.clone();
        let delay = self.config.debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = service.save(false).await {
                debug!(error = %e, "debounced save failed, will retry");
            }
        });

        let mut slot = self.debounce_task.lock().expect("debounce poisoned");
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Cancels the debounce timer and writes buffered edits now. Used
    /// before the host surface is torn down or backgrounded.
    pub async fn flush(&self) -> SyncResult<()> {
        if let Some(task) = self.debounce_task.lock().expect("debounce poisoned").take() {
            task.abort();
        }
        self.save(false).await
    }

    /// Builds a snapshot from the local cache and writes it to the pod.
    /// With `force` false the save is skipped when nothing changed.
    ///
    /// Refusal paths — no secret while encryption is mandatory, tenant
    /// mismatch — return before a single byte is written.
    pub async fn save(&self, force: bool) -> SyncResult<()> {
        let _io = self.io_gate.lock().await;
        let result = self.save_locked(force).await;
        self.conclude(result)
    }

    async fn save_locked(&self, force: bool) -> SyncResult<()> {
        let provider = self.provider()?;
        if !force && !self.session.read().expect("session poisoned").dirty {
            return Ok(());
        }
        self.guard.assert_match(provider.name(), &self.tenant_id)?;
        self.set_phase(SyncPhase::Saving);

        let snapshot = self.build_snapshot().await;
        let record_count = snapshot.record_count();
        let bytes = self.encode_pod(snapshot).await?;
        provider.write(&bytes).await?;

        let written_at = provider.last_modified().await.ok().flatten();
        {
            let mut session = self.session.write().expect("session poisoned");
            session.dirty = false;
            session.last_local_save = Some(Utc::now());
            session.remote_watermark = written_at;
        }
        info!(records = record_count, bytes = bytes.len(), "pod saved");
        Ok(())
    }

    // ── Inbound path ─────────────────────────────────────────────

    /// Cheap remote-change probe: stats the pod's last-modified time and
    /// reloads (merging) only when it is strictly newer than the last
    /// mtime this session wrote or consumed. Returns whether a reload ran.
    pub async fn check_for_remote_change(&self) -> SyncResult<bool> {
        let provider = self.provider()?;
        let mtime = match provider.last_modified().await {
            Ok(m) => m,
            Err(e) => return Err(self.note_failure(e.into())),
        };

        let newer = {
            let session = self.session.read().expect("session poisoned");
            match (mtime, session.remote_watermark) {
                (Some(m), Some(watermark)) => m > watermark,
                (Some(_), None) => true,
                (None, _) => false,
            }
        };

        if !newer {
            return Ok(false);
        }
        debug!(?mtime, "remote pod changed, reloading");
        self.reload(true).await?;
        Ok(true)
    }

    /// Reads and decrypts the remote snapshot. With `merge` false (first
    /// load, explicit open) the local cache is replaced wholesale; with
    /// `merge` true the remote is reconciled into the cache and the merged
    /// result written straight back.
    pub async fn reload(&self, merge: bool) -> SyncResult<()> {
        let _io = self.io_gate.lock().await;
        let result = self.reload_locked(merge).await;
        self.conclude(result)
    }

    async fn reload_locked(&self, merge: bool) -> SyncResult<()> {
        let provider = self.provider()?;
        self.guard.assert_match(provider.name(), &self.tenant_id)?;
        self.set_phase(SyncPhase::Reloading);

        let Some(bytes) = provider.read().await? else {
            debug!("no remote pod yet");
            return Ok(());
        };
        let remote_mtime = provider.last_modified().await.ok().flatten();

        let mut remote = self.decode_pod(&bytes).await?;
        if remote.tenant_id.is_empty() {
            // Legacy v1 pods predate tenants; adopt them on load.
            remote.tenant_id = self.tenant_id.clone();
        }
        if remote.tenant_id != self.tenant_id {
            return Err(SyncError::TenantMismatch {
                bound: remote.tenant_id,
                active: self.tenant_id.clone(),
            });
        }

        if merge {
            let local = self.build_snapshot().await;
            let merged = merge_snapshots(&local, &remote, &self.policy, Utc::now());
            info!(
                records = merged.record_count(),
                tombstones = merged.deletions.len(),
                "merged remote pod into local cache"
            );
            self.publish_snapshot(&merged).await;
            {
                let mut session = self.session.write().expect("session poisoned");
                session.remote_watermark = remote_mtime;
                session.dirty = true;
            }

            // Write the resolved state back so a third device merges one
            // snapshot, not two racing ones.
            let bytes = self.encode_pod(merged).await?;
            provider.write(&bytes).await?;
            let written_at = provider.last_modified().await.ok().flatten();
            let mut session = self.session.write().expect("session poisoned");
            session.dirty = false;
            session.last_local_save = Some(Utc::now());
            session.remote_watermark = written_at;
        } else {
            info!(records = remote.record_count(), "loaded remote pod");
            self.publish_snapshot(&remote).await;
            let mut session = self.session.write().expect("session poisoned");
            session.dirty = false;
            session.remote_watermark = remote_mtime;
        }

        Ok(())
    }

    // ── Snapshot plumbing ────────────────────────────────────────

    /// Materializes the current local state: every registered store's
    /// records (id-sorted), carried-through foreign entity types, and the
    /// accumulated deletion log.
    async fn build_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new(
            self.tenant_id.clone(),
            self.tenant_name.clone(),
            self.config.encryption_required,
        );

        let stores: Vec<Arc<dyn DomainStore>> =
            self.stores.read().expect("stores poisoned").clone();
        for store in stores {
            let mut records = store.get_all().await;
            records.sort_by(|a, b| a.id.cmp(&b.id));
            snapshot.set_records(store.entity_type(), records);
        }

        for (entity_type, records) in self.passthrough.read().expect("passthrough poisoned").iter()
        {
            if !snapshot.data.contains_key(entity_type) {
                snapshot.set_records(entity_type.clone(), records.clone());
            }
        }

        snapshot.deletions = self.deletions.all();
        snapshot
    }

    /// Publishes a loaded or merged snapshot to the local cache: each
    /// registered store is replaced, unknown entity types go to the
    /// passthrough buffer, and the deletion log is rewritten.
    async fn publish_snapshot(&self, snapshot: &Snapshot) {
        let stores: Vec<Arc<dyn DomainStore>> =
            self.stores.read().expect("stores poisoned").clone();
        let mut known: Vec<EntityType> = Vec::with_capacity(stores.len());
        for store in stores {
            let entity_type = store.entity_type();
            store
                .replace_all(snapshot.records(&entity_type).to_vec())
                .await;
            known.push(entity_type);
        }

        let mut passthrough = self.passthrough.write().expect("passthrough poisoned");
        passthrough.clear();
        for (entity_type, records) in &snapshot.data {
            if !known.contains(entity_type) {
                passthrough.insert(entity_type.clone(), records.clone());
            }
        }
        drop(passthrough);

        self.deletions.replace(snapshot.deletions.clone());
    }

    async fn encode_pod(&self, snapshot: Snapshot) -> SyncResult<Vec<u8>> {
        if !self.config.encryption_required {
            return Ok(PodFile::Plain(snapshot).encode()?);
        }

        let secret = self.gate.require()?;
        let kdf = self.config.kdf.clone();
        let plaintext = snapshot.encode()?;
        let (salt, payload) =
            tokio::task::spawn_blocking(move || seal_pod(&secret, &kdf, &plaintext))
                .await
                .map_err(|e| SyncError::Crypto(e.to_string()))??;

        let (nonce, ciphertext) = payload.to_base64_parts();
        let pod = EncryptedPod::new(salt.to_base64(), nonce, ciphertext);
        Ok(PodFile::Encrypted(pod).encode()?)
    }

    async fn decode_pod(&self, bytes: &[u8]) -> SyncResult<Snapshot> {
        match PodFile::decode(bytes)? {
            PodFile::Plain(snapshot) => Ok(snapshot.upgraded()),
            PodFile::Encrypted(pod) => {
                let secret = self.gate.require()?;
                let salt = Salt::from_base64(&pod.salt)?;
                let payload = CipherPayload::from_base64_parts(&pod.nonce, &pod.ciphertext)?;
                let kdf = self.config.kdf.clone();
                let plaintext =
                    tokio::task::spawn_blocking(move || open_pod(&secret, &kdf, &salt, &payload))
                        .await
                        .map_err(|e| SyncError::Crypto(e.to_string()))??;
                Ok(Snapshot::decode(&plaintext)?.upgraded())
            }
        }
    }

    // ── Failure bookkeeping ──────────────────────────────────────

    /// Settles phase and status after a save or reload: success returns
    /// to `Configured`, failure moves to `Error` with the cause surfaced
    /// on the status stream (and the retry path left alive).
    fn conclude<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        match &result {
            Ok(_) => {
                let mut session = self.session.write().expect("session poisoned");
                session.phase = SyncPhase::Configured;
                session.last_error = None;
            }
            Err(SyncError::NotConfigured) => {}
            Err(e) => {
                warn!(error = %e, "sync operation failed");
                let mut session = self.session.write().expect("session poisoned");
                session.phase = SyncPhase::Error;
                session.last_error = Some(e.to_string());
            }
        }
        self.publish();
        result
    }

    fn note_failure(&self, error: SyncError) -> SyncError {
        warn!(error = %error, "remote probe failed");
        {
            let mut session = self.session.write().expect("session poisoned");
            session.phase = SyncPhase::Error;
            session.last_error = Some(error.to_string());
        }
        self.publish();
        error
    }
}
