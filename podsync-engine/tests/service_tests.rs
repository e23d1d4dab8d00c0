use chrono::{DateTime, Duration as ChronoDuration, Utc};
use podsync_crypto::{KdfParams, UnlockSecret};
use podsync_engine::{
    change_channel, LocalCache, SyncConfig, SyncError, SyncPhase, SyncService,
};
use podsync_merge::MergePolicy;
use podsync_storage::MemoryProvider;
use podsync_types::{EntityType, PodFile, Record, RecordId, Snapshot, TenantId, Tombstone};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn plain_config() -> SyncConfig {
    SyncConfig {
        debounce: Duration::from_secs(2),
        poll_interval: Duration::from_secs(10),
        encryption_required: false,
        kdf: KdfParams::fast_insecure(),
    }
}

fn encrypted_config() -> SyncConfig {
    SyncConfig {
        encryption_required: true,
        kdf: KdfParams::fast_insecure(),
        ..plain_config()
    }
}

fn tenant() -> TenantId {
    TenantId::from_string("tenant-1")
}

/// A service with one registered "items" cache on a shared provider.
fn setup(
    config: SyncConfig,
    tenant_id: TenantId,
    provider: Arc<MemoryProvider>,
) -> (Arc<SyncService>, Arc<LocalCache>) {
    let service = SyncService::new(config, tenant_id, "Family", MergePolicy::new());
    let (tx, rx) = change_channel();
    let cache = LocalCache::new("items", service.deletion_log(), tx);
    service.register_store(cache.clone());
    service.attach_changes(rx);
    service.configure(provider).unwrap();
    (service, cache)
}

fn record(id: &str, at: DateTime<Utc>) -> Record {
    Record::new(RecordId::from_string(id), at).with_field("name", json!(id))
}

fn minutes_ago(m: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(m)
}

// ── No-plaintext-write ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn locked_save_writes_zero_bytes() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(encrypted_config(), tenant(), provider.clone());
    cache.upsert(record("r1", minutes_ago(5)));

    let err = service.save(true).await.unwrap_err();
    assert!(matches!(err, SyncError::EncryptionRequired));
    assert_eq!(provider.write_count(), 0);
    assert!(provider.stored().is_none());
    assert_eq!(service.status().phase, SyncPhase::Error);
}

#[tokio::test(start_paused = true)]
async fn refused_write_retries_once_secret_appears() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(encrypted_config(), tenant(), provider.clone());

    cache.upsert(record("r1", minutes_ago(5)));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(provider.write_count(), 0);
    assert_eq!(service.status().phase, SyncPhase::Error);

    service.set_secret(UnlockSecret::from_passphrase("pw"));
    // Key derivation runs on a blocking thread the paused clock cannot see;
    // wait for the rescheduled write to land instead of a fixed sleep.
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if provider.write_count() == 1 {
            break;
        }
    }
    assert_eq!(provider.write_count(), 1);
    assert_eq!(service.status().phase, SyncPhase::Configured);

    // What landed on disk is the encrypted container, not plaintext.
    let stored = provider.stored().unwrap();
    assert!(matches!(
        PodFile::decode(&stored).unwrap(),
        PodFile::Encrypted(_)
    ));
}

// ── Debounce coalescing ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn burst_of_mutations_coalesces_into_one_write() {
    let provider = Arc::new(MemoryProvider::new());
    let (_service, cache) = setup(plain_config(), tenant(), provider.clone());

    for i in 0..5 {
        cache.upsert(record(&format!("r{i}"), minutes_ago(5 - i as i64)));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(provider.write_count(), 1);
    let stored = provider.stored().unwrap();
    let snapshot = Snapshot::decode(&stored).unwrap();
    assert_eq!(snapshot.record_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn flush_cancels_debounce_and_writes_now() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());

    cache.upsert(record("r1", minutes_ago(5)));
    tokio::task::yield_now().await;
    service.flush().await.unwrap();
    assert_eq!(provider.write_count(), 1);

    // The cancelled timer never fires a second write.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(provider.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn clean_flush_skips_the_write() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, _cache) = setup(plain_config(), tenant(), provider.clone());

    service.flush().await.unwrap();
    assert_eq!(provider.write_count(), 0);
}

// ── Poll / reload ────────────────────────────────────────────────

fn plant_snapshot(provider: &MemoryProvider, snapshot: &Snapshot, mtime: DateTime<Utc>) {
    provider.plant(snapshot.encode().unwrap(), mtime);
}

#[tokio::test]
async fn remote_change_triggers_exactly_one_reload() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());
    cache.upsert(record("r1", minutes_ago(30)));
    service.save(true).await.unwrap();

    // Another device writes a newer pod.
    let mut remote = Snapshot::new(tenant(), "Family", false);
    remote.set_records(EntityType::from("items"), vec![record("r2", minutes_ago(10))]);
    plant_snapshot(&provider, &remote, Utc::now() + ChronoDuration::hours(1));

    let reads_before = provider.read_count();
    assert!(service.check_for_remote_change().await.unwrap());
    assert_eq!(provider.read_count(), reads_before + 1);
    assert_eq!(cache.len(), 2, "remote record merged in");

    // The change is consumed: subsequent polls stay quiet.
    assert!(!service.check_for_remote_change().await.unwrap());
    assert!(!service.check_for_remote_change().await.unwrap());
    assert_eq!(provider.read_count(), reads_before + 1);
}

#[tokio::test]
async fn merge_reload_writes_resolved_state_back() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());
    cache.upsert(record("r1", minutes_ago(30)));
    service.save(true).await.unwrap();
    let writes_after_save = provider.write_count();

    let mut remote = Snapshot::new(tenant(), "Family", false);
    remote.set_records(EntityType::from("items"), vec![record("r2", minutes_ago(10))]);
    plant_snapshot(&provider, &remote, Utc::now() + ChronoDuration::hours(1));

    service.check_for_remote_change().await.unwrap();
    assert_eq!(provider.write_count(), writes_after_save + 1);

    // A third device now sees the resolved state, not a racing writer.
    let stored = Snapshot::decode(&provider.stored().unwrap()).unwrap();
    assert_eq!(stored.record_count(), 2);
}

#[tokio::test]
async fn offline_divergence_converges_without_loss() {
    let provider = Arc::new(MemoryProvider::new());
    let (service_a, cache_a) = setup(plain_config(), tenant(), provider.clone());

    cache_a.upsert(record("r1", minutes_ago(60)));
    cache_a.upsert(record("r2", minutes_ago(50)));
    service_a.save(true).await.unwrap();

    // Device B opens the same pod, deletes r1 and adds r3.
    let (service_b, cache_b) = setup(plain_config(), tenant(), provider.clone());
    service_b.reload(false).await.unwrap();
    assert_eq!(cache_b.len(), 2);
    cache_b.delete(&RecordId::from_string("r1"), minutes_ago(20));
    cache_b.upsert(record("r3", minutes_ago(10)));
    service_b.save(true).await.unwrap();
    provider.set_last_modified(Utc::now() + ChronoDuration::hours(1));

    // Device A polls and converges.
    assert!(service_a.check_for_remote_change().await.unwrap());
    assert!(cache_a.get(&RecordId::from_string("r1")).is_none(), "deletion propagated");
    assert!(cache_a.get(&RecordId::from_string("r2")).is_some());
    assert!(cache_a.get(&RecordId::from_string("r3")).is_some());
}

#[tokio::test]
async fn reload_of_missing_pod_is_a_no_op() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());

    service.reload(false).await.unwrap();
    assert!(cache.is_empty());
    assert_eq!(service.status().phase, SyncPhase::Configured);
}

// ── Tenant isolation ─────────────────────────────────────────────

#[tokio::test]
async fn foreign_tenant_pod_never_touches_the_cache() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());

    let mut foreign = Snapshot::new(TenantId::from_string("someone-else"), "Other", false);
    foreign.set_records(EntityType::from("items"), vec![record("x", minutes_ago(5))]);
    plant_snapshot(&provider, &foreign, Utc::now());

    let err = service.reload(false).await.unwrap_err();
    assert!(matches!(err, SyncError::TenantMismatch { .. }));
    assert!(cache.is_empty(), "foreign data must not be loaded");
    assert_eq!(service.status().phase, SyncPhase::Error);

    // And the merge path fails closed the same way.
    let err = service.reload(true).await.unwrap_err();
    assert!(matches!(err, SyncError::TenantMismatch { .. }));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn legacy_v1_pod_is_adopted_by_the_active_tenant() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());

    let bytes = serde_json::to_vec(&json!({
        "formatVersion": "1.0",
        "exportedAt": "2024-01-01T00:00:00Z",
        "data": { "items": [ { "id": "old", "updatedAt": "2024-01-01T00:00:00Z" } ] }
    }))
    .unwrap();
    provider.plant(bytes, Utc::now());

    service.reload(false).await.unwrap();
    assert_eq!(cache.len(), 1);

    service.save(true).await.unwrap();
    let stored = Snapshot::decode(&provider.stored().unwrap()).unwrap();
    assert_eq!(stored.tenant_id, tenant());
}

// ── Format gating ────────────────────────────────────────────────

#[tokio::test]
async fn v2_pod_loads_and_upgrades_to_v3_on_save() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());

    let bytes = serde_json::to_vec(&json!({
        "formatVersion": "2.0",
        "tenantId": "tenant-1",
        "tenantName": "Family",
        "exportedAt": "2025-01-01T00:00:00Z",
        "data": { "items": [ { "id": "r1", "updatedAt": "2025-01-01T00:00:00Z" } ] }
    }))
    .unwrap();
    provider.plant(bytes, Utc::now());

    service.reload(false).await.unwrap();
    assert_eq!(cache.len(), 1);

    service.save(true).await.unwrap();
    let text = String::from_utf8(provider.stored().unwrap()).unwrap();
    assert!(text.contains("\"formatVersion\":\"3.0\""));
    assert!(text.contains("\"deletions\":[]"));
}

#[tokio::test]
async fn unknown_format_version_is_refused() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());

    let bytes = serde_json::to_vec(&json!({
        "formatVersion": "9.9",
        "exportedAt": "2025-01-01T00:00:00Z",
        "data": {}
    }))
    .unwrap();
    provider.plant(bytes, Utc::now());

    let err = service.reload(false).await.unwrap_err();
    assert!(matches!(err, SyncError::FormatUnsupported(v) if v == "9.9"));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn unregistered_entity_types_survive_a_save_cycle() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());

    let mut remote = Snapshot::new(tenant(), "Family", false);
    remote.set_records(EntityType::from("gadgets"), vec![record("g1", minutes_ago(5))]);
    plant_snapshot(&provider, &remote, Utc::now());

    service.reload(false).await.unwrap();
    cache.upsert(record("r1", minutes_ago(1)));
    service.save(true).await.unwrap();

    let stored = Snapshot::decode(&provider.stored().unwrap()).unwrap();
    assert_eq!(stored.records(&EntityType::from("gadgets")).len(), 1);
    assert_eq!(stored.records(&EntityType::from("items")).len(), 1);
}

// ── Crypto integration ───────────────────────────────────────────

#[tokio::test]
async fn wrong_secret_fails_without_partial_apply() {
    let provider = Arc::new(MemoryProvider::new());

    let (writer, cache_w) = setup(encrypted_config(), tenant(), provider.clone());
    writer.set_secret(UnlockSecret::from_passphrase("right"));
    cache_w.upsert(record("r1", minutes_ago(5)));
    writer.save(true).await.unwrap();

    let (reader, cache_r) = setup(encrypted_config(), tenant(), provider.clone());
    reader.set_secret(UnlockSecret::from_passphrase("wrong"));
    let err = reader.reload(false).await.unwrap_err();
    assert!(matches!(err, SyncError::Authentication));
    assert!(cache_r.is_empty(), "failed decrypt must not partially apply");
}

#[tokio::test]
async fn missing_secret_on_load_is_distinct_from_wrong_secret() {
    let provider = Arc::new(MemoryProvider::new());

    let (writer, cache_w) = setup(encrypted_config(), tenant(), provider.clone());
    writer.set_secret(UnlockSecret::from_passphrase("pw"));
    cache_w.upsert(record("r1", minutes_ago(5)));
    writer.save(true).await.unwrap();

    let (reader, _cache) = setup(encrypted_config(), tenant(), provider.clone());
    let err = reader.reload(false).await.unwrap_err();
    assert!(matches!(err, SyncError::EncryptionRequired));
}

#[tokio::test]
async fn encrypted_pod_round_trips_between_devices() {
    let provider = Arc::new(MemoryProvider::new());

    let (writer, cache_w) = setup(encrypted_config(), tenant(), provider.clone());
    writer.set_secret(UnlockSecret::from_passphrase("pw"));
    cache_w.upsert(record("r1", minutes_ago(5)));
    cache_w.delete(&RecordId::from_string("gone"), minutes_ago(3));
    writer.save(true).await.unwrap();

    let (reader, cache_r) = setup(encrypted_config(), tenant(), provider.clone());
    reader.set_secret(UnlockSecret::from_passphrase("pw"));
    reader.reload(false).await.unwrap();
    assert_eq!(cache_r.len(), 1);
    assert!(cache_r.get(&RecordId::from_string("r1")).is_some());
}

// ── Storage failures ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn storage_failure_degrades_and_recovers() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());

    provider.fail_writes(true);
    cache.upsert(record("r1", minutes_ago(5)));
    tokio::task::yield_now().await;
    let err = service.flush().await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));
    assert_eq!(service.status().phase, SyncPhase::Error);
    assert!(service.status().last_error.is_some());
    assert!(provider.stored().is_none());

    // The next mutation retries and succeeds.
    provider.fail_writes(false);
    cache.upsert(record("r2", minutes_ago(4)));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(provider.stored().is_some());
    assert_eq!(service.status().phase, SyncPhase::Configured);
    assert_eq!(service.status().last_error, None);
}

// ── Deletion log & tombstones ────────────────────────────────────

#[tokio::test]
async fn domain_delete_lands_in_the_saved_pod() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());

    cache.upsert(record("r1", minutes_ago(10)));
    cache.delete(&RecordId::from_string("r1"), minutes_ago(5));
    service.save(true).await.unwrap();

    let stored = Snapshot::decode(&provider.stored().unwrap()).unwrap();
    assert_eq!(stored.record_count(), 0);
    assert_eq!(stored.deletions.len(), 1);
    assert_eq!(stored.deletions[0].id.as_str(), "r1");
}

#[tokio::test]
async fn deletion_vs_edit_resolves_by_timestamp_not_direction() {
    // Device A edited after device B's delete: the edit survives.
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());
    cache.upsert(record("r1", minutes_ago(10)));
    service.save(true).await.unwrap();

    let mut remote = Snapshot::new(tenant(), "Family", false);
    remote.deletions.push(Tombstone::new(
        RecordId::from_string("r1"),
        EntityType::from("items"),
        minutes_ago(20),
    ));
    remote.set_records(EntityType::from("items"), Vec::new());
    plant_snapshot(&provider, &remote, Utc::now() + ChronoDuration::hours(1));

    service.check_for_remote_change().await.unwrap();
    assert!(cache.get(&RecordId::from_string("r1")).is_some());
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn save_before_configure_is_a_contract_error() {
    let service = SyncService::new(plain_config(), tenant(), "Family", MergePolicy::new());
    let err = service.save(true).await.unwrap_err();
    assert!(matches!(err, SyncError::NotConfigured));
    assert_eq!(service.status().phase, SyncPhase::Uninitialized);
}

#[tokio::test]
async fn reset_clears_secret_and_binding() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, _cache) = setup(encrypted_config(), tenant(), provider.clone());
    service.set_secret(UnlockSecret::from_passphrase("pw"));
    assert!(service.is_unlocked());

    service.reset();
    assert!(!service.is_unlocked());
    assert!(!service.is_configured());
    assert_eq!(service.status().phase, SyncPhase::Uninitialized);
    assert!(matches!(
        service.save(true).await.unwrap_err(),
        SyncError::NotConfigured
    ));
}

#[tokio::test]
async fn status_stream_tracks_phases() {
    let provider = Arc::new(MemoryProvider::new());
    let (service, cache) = setup(plain_config(), tenant(), provider.clone());
    let mut status = service.subscribe();

    assert_eq!(status.borrow_and_update().phase, SyncPhase::Configured);
    assert_eq!(
        status.borrow_and_update().file_name.as_deref(),
        Some("memory")
    );

    cache.upsert(record("r1", minutes_ago(5)));
    service.save(true).await.unwrap();
    assert_eq!(service.status().phase, SyncPhase::Configured);
    assert_eq!(service.status().last_error, None);
}
