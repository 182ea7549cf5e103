use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

use super::*;
use crate::models::{ConflictType, DeviceType};
use crate::storage::MemoryStorage;
use crate::transport::LoopbackTransport;

struct Harness {
    engine: SyncEngine,
    storage: Arc<MemoryStorage>,
    transport: Arc<LoopbackTransport>,
}

impl Harness {
    fn new(config: SyncConfig) -> Self {
        Self::with_merge(config, None)
    }

    fn with_merge(config: SyncConfig, merge: Option<(&str, MergeFn)>) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let transport = Arc::new(LoopbackTransport::new());
        let mut builder = SyncEngine::builder(
            LocalDevice::new("phone", "Phone", DeviceType::Phone),
            storage.clone(),
            transport.clone(),
        )
        .config(config)
        .network(Arc::new(NetworkMonitor::new(NetworkStatus::WiFi)));
        if let Some((entity_type, merge)) = merge {
            builder = builder.merge_fn(entity_type, merge);
        }

        Self {
            engine: builder.build().unwrap(),
            storage,
            transport,
        }
    }

    fn add_peer(&self, id: &str, device_type: DeviceType) {
        self.engine.upsert_device(ConnectedDevice::new(
            id,
            id,
            device_type,
            unix_timestamp_ms(),
        ));
        self.transport.add_peer(id);
    }

    fn record(&self, entity_id: &str, operation: ChangeOperation, payload: &str) -> SyncChange {
        self.engine
            .record_change(
                "workout",
                entity_id,
                operation,
                payload,
                ChangePriority::Normal,
            )
            .unwrap()
    }

    fn pending_ids(&self) -> Vec<ChangeId> {
        self.engine
            .pending_changes()
            .into_iter()
            .map(|change| change.id)
            .collect()
    }
}

fn remote(device: &str, entity_id: &str, operation: ChangeOperation, payload: &str) -> SyncChange {
    SyncChange::new(
        "workout",
        entity_id,
        operation,
        DeviceId::new(device),
        payload,
    )
}

fn concat_merge() -> MergeFn {
    Arc::new(|local, remote| {
        Some(Payload::from(format!(
            "{}+{}",
            local.payload.to_text_lossy(),
            remote.payload.to_text_lossy()
        )))
    })
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<SyncEvent>,
    matches: impl Fn(&SyncEvent) -> bool,
) {
    loop {
        let event = events.recv().await.unwrap();
        if matches(&event) {
            return;
        }
    }
}

async fn wait_for_state(engine: &SyncEngine, state: SyncState) {
    let mut status = engine.subscribe_status();
    status.wait_for(|current| *current == state).await.unwrap();
}

#[tokio::test]
async fn duplicate_create_resolved_by_merge() {
    let harness = Harness::with_merge(SyncConfig::default(), Some(("workout", concat_merge())));
    harness.add_peer("watch", DeviceType::Watch);
    harness.record("workout-1", ChangeOperation::Create, "P1");
    harness.transport.queue(
        "watch",
        remote("watch", "workout-1", ChangeOperation::Create, "P2"),
    );

    let report = harness.engine.start_sync().await.unwrap().unwrap();
    assert_eq!(report.detected_conflicts, 1);
    assert_eq!(report.applied_changes, 0);

    let conflicts = harness.engine.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::DuplicateCreate);
    assert_eq!(conflicts[0].entity_id, "workout-1");
    assert!(harness.storage.applied().is_empty());

    let merged = harness
        .engine
        .resolve_conflict(&conflicts[0].id, ConflictResolution::Merge)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(merged.payload.to_text_lossy(), "P1+P2");

    let applied = harness.storage.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].payload.to_text_lossy(), "P1+P2");
    assert!(harness.engine.conflicts().is_empty());
    assert_eq!(harness.pending_ids(), vec![merged.id]);

    // The peer still offers its create; it must not resurface as a new conflict.
    let report = harness.engine.start_sync().await.unwrap().unwrap();
    assert_eq!(report.detected_conflicts, 0);
    assert_eq!(harness.storage.applied().len(), 1);
    assert!(harness.engine.pending_changes().is_empty());
    assert_eq!(harness.engine.conflict_history().len(), 1);
}

#[tokio::test]
async fn default_policy_resolves_automatically() {
    let config = SyncConfig::default()
        .with_policy(ConflictType::ConcurrentUpdate, ConflictResolution::UseRemote);
    let harness = Harness::new(config);
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.record("w1", ChangeOperation::Update, "mine");
    let theirs = remote("tablet", "w1", ChangeOperation::Update, "theirs");
    harness.transport.queue("tablet", theirs.clone());

    let mut events = harness.engine.subscribe_events();
    let report = harness.engine.start_sync().await.unwrap().unwrap();

    assert_eq!(report.detected_conflicts, 1);
    assert_eq!(report.auto_resolved_conflicts, 1);
    assert_eq!(harness.storage.applied(), vec![theirs]);
    assert!(harness.engine.conflicts().is_empty());
    wait_for_event(&mut events, |event| {
        matches!(
            event,
            SyncEvent::ConflictResolved {
                resolution: ConflictResolution::UseRemote,
                ..
            }
        )
    })
    .await;
}

#[tokio::test]
async fn conflicts_without_policy_are_surfaced() {
    let config = SyncConfig::default()
        .with_policy(ConflictType::UpdateDeleteRace, ConflictResolution::Manual);
    let harness = Harness::new(config);
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.record("w1", ChangeOperation::Update, "mine");
    harness
        .transport
        .queue("tablet", remote("tablet", "w1", ChangeOperation::Delete, ""));

    let report = harness.engine.start_sync().await.unwrap().unwrap();

    assert_eq!(report.auto_resolved_conflicts, 0);
    let open = harness.engine.conflicts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].conflict_type, ConflictType::UpdateDeleteRace);
    assert!(harness.storage.applied().is_empty());
    assert_eq!(harness.engine.statistics().pending_conflicts, 1);
}

#[tokio::test]
async fn clean_remote_changes_are_applied_once() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("watch", DeviceType::Watch);
    let incoming = remote("watch", "w9", ChangeOperation::Create, "{}");
    harness.transport.queue("watch", incoming.clone());

    let report = harness.engine.start_sync().await.unwrap().unwrap();
    assert_eq!(report.applied_changes, 1);
    harness.engine.start_sync().await.unwrap().unwrap();

    assert_eq!(harness.storage.applied(), vec![incoming]);
}

#[tokio::test]
async fn earlier_remote_edits_do_not_raise_a_second_conflict() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.record("w1", ChangeOperation::Update, "mine");
    let now = unix_timestamp_ms();
    harness.transport.queue(
        "tablet",
        remote("tablet", "w1", ChangeOperation::Update, "r1").with_timestamp(now - 2_000),
    );
    harness.transport.queue(
        "tablet",
        remote("tablet", "w1", ChangeOperation::Update, "r2").with_timestamp(now - 1_000),
    );

    let first = harness.engine.start_sync().await.unwrap().unwrap();
    assert_eq!(first.detected_conflicts, 1);
    let second = harness.engine.start_sync().await.unwrap().unwrap();
    assert_eq!(second.detected_conflicts, 0);

    let open = harness.engine.conflicts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].remote_change.payload.to_text_lossy(), "r2");
    assert!(harness.storage.applied().is_empty());
}

#[tokio::test]
async fn storage_failure_skips_only_that_change() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("watch", DeviceType::Watch);
    let local = harness.record("w1", ChangeOperation::Create, "{}");
    let now = unix_timestamp_ms();
    let rejected = remote("watch", "w2", ChangeOperation::Create, "{}").with_timestamp(now - 2_000);
    let accepted = remote("watch", "w3", ChangeOperation::Create, "{}").with_timestamp(now - 1_000);
    harness.transport.queue("watch", rejected.clone());
    harness.transport.queue("watch", accepted.clone());
    harness.storage.fail_next_apply("disk full");

    let mut events = harness.engine.subscribe_events();
    let report = harness.engine.start_sync().await.unwrap().unwrap();
    assert_eq!(report.failed_applies, 1);
    assert_eq!(report.applied_changes, 1);
    assert_eq!(report.acknowledged_changes, 1);
    assert_eq!(harness.storage.applied(), vec![accepted.clone()]);
    assert!(!harness.pending_ids().contains(&local.id));
    wait_for_event(&mut events, |event| {
        matches!(event, SyncEvent::CycleCompleted { .. })
    })
    .await;

    let retry = harness.engine.start_sync().await.unwrap().unwrap();
    assert_eq!(retry.failed_applies, 0);
    assert_eq!(retry.applied_changes, 1);
    assert_eq!(harness.storage.applied(), vec![accepted, rejected]);
}

#[tokio::test]
async fn maintenance_forgets_seen_changes_after_retention() {
    let config = SyncConfig {
        retention_window_secs: 60,
        ..SyncConfig::default()
    };
    let harness = Harness::new(config);
    harness.add_peer("watch", DeviceType::Watch);
    let incoming = remote("watch", "w9", ChangeOperation::Create, "{}");
    harness.transport.queue("watch", incoming.clone());

    harness.engine.start_sync().await.unwrap().unwrap();
    let seen = &harness.engine.inner.seen_remote;
    assert!(seen.contains(&incoming.id));

    harness.engine.run_maintenance(unix_timestamp_ms() + 30_000);
    assert!(seen.contains(&incoming.id));
    harness.engine.run_maintenance(unix_timestamp_ms() + 120_000);
    assert!(!seen.contains(&incoming.id));
}

#[tokio::test]
async fn three_devices_two_reachable() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.add_peer("watch", DeviceType::Watch);
    harness.add_peer("desktop", DeviceType::Desktop);
    harness
        .transport
        .queue("desktop", remote("desktop", "w5", ChangeOperation::Create, "{}"));
    harness
        .engine
        .mark_device_offline(&DeviceId::new("desktop"))
        .unwrap();
    let local = harness.record("w1", ChangeOperation::Create, "{}");

    let report = harness.engine.start_sync().await.unwrap().unwrap();

    assert_eq!(report.reachable_devices, 2);
    assert_eq!(report.progress, 1.0);
    assert_eq!(harness.engine.progress(), 1.0);
    assert_eq!(harness.engine.status(), SyncState::Idle);

    let desktop = harness
        .engine
        .registry()
        .get(&DeviceId::new("desktop"))
        .unwrap();
    assert!(!desktop.is_online);
    assert_eq!(desktop.sync_status, DeviceSyncStatus::Idle);
    assert_eq!(
        harness.transport.exchange_count(&DeviceId::new("desktop")),
        0
    );
    assert!(harness.storage.applied().is_empty());

    assert_eq!(
        harness.transport.received(&DeviceId::new("tablet")),
        vec![local.clone()]
    );
    assert_eq!(
        harness.transport.received(&DeviceId::new("watch")),
        vec![local]
    );
    assert!(harness.engine.pending_changes().is_empty());
}

#[tokio::test]
async fn failed_device_does_not_block_others() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.add_peer("watch", DeviceType::Watch);
    harness.transport.set_failure("watch", Some("bluetooth off"));
    harness.record("w1", ChangeOperation::Create, "{}");

    let report = harness.engine.start_sync().await.unwrap().unwrap();

    assert_eq!(report.synced_devices, vec![DeviceId::new("tablet")]);
    assert_eq!(report.failed_devices.len(), 1);
    assert_eq!(report.failed_devices[0].0, DeviceId::new("watch"));
    assert_eq!(report.progress, 1.0);

    let registry = harness.engine.registry();
    assert_eq!(
        registry.get(&DeviceId::new("watch")).unwrap().sync_status,
        DeviceSyncStatus::Failed
    );
    assert!(registry.get(&DeviceId::new("watch")).unwrap().is_online);
    assert_eq!(
        registry.get(&DeviceId::new("tablet")).unwrap().sync_status,
        DeviceSyncStatus::Synced
    );
}

#[tokio::test]
async fn all_devices_failing_keeps_changes_pending() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("watch", DeviceType::Watch);
    harness.transport.set_failure("watch", Some("refused"));
    let local = harness.record("w1", ChangeOperation::Create, "{}");

    let report = harness.engine.start_sync().await.unwrap().unwrap();
    assert_eq!(report.acknowledged_changes, 0);
    assert_eq!(harness.pending_ids(), vec![local.id]);

    harness.transport.set_failure("watch", None);
    let report = harness.engine.start_sync().await.unwrap().unwrap();
    assert_eq!(report.acknowledged_changes, 1);
    assert!(harness.engine.pending_changes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_device_times_out_alone() {
    let config = SyncConfig::default().with_exchange_timeout(Duration::from_secs(5));
    let harness = Harness::new(config);
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.add_peer("watch", DeviceType::Watch);
    harness
        .transport
        .set_delay("watch", Some(Duration::from_secs(60)));
    harness.record("w1", ChangeOperation::Create, "{}");

    let report = harness.engine.start_sync().await.unwrap().unwrap();

    assert_eq!(report.synced_devices, vec![DeviceId::new("tablet")]);
    assert_eq!(report.failed_devices.len(), 1);
    assert!(report.failed_devices[0].1.contains("timed out"));
    assert_eq!(report.progress, 1.0);
    assert_eq!(harness.transport.exchange_count(&DeviceId::new("watch")), 0);
}

#[tokio::test]
async fn gated_network_aborts_to_idle() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("tablet", DeviceType::Tablet);
    let local = harness.record("w1", ChangeOperation::Create, "{}");

    for status in [NetworkStatus::Disconnected, NetworkStatus::Unknown] {
        harness.engine.network().set_status(status);
        let error = harness.engine.start_sync().await.unwrap_err();
        assert!(matches!(error, Error::NetworkUnavailable(s) if s == status));
        assert_eq!(harness.engine.status(), SyncState::Idle);
        assert_eq!(harness.pending_ids(), vec![local.id]);
    }
    assert_eq!(
        harness.transport.exchange_count(&DeviceId::new("tablet")),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn start_while_syncing_is_a_noop() {
    let harness = Harness::new(SyncConfig::default().with_exchange_timeout(Duration::from_secs(600)));
    harness.add_peer("watch", DeviceType::Watch);
    harness
        .transport
        .set_delay("watch", Some(Duration::from_secs(60)));
    harness.record("w1", ChangeOperation::Create, "{}");

    let engine = harness.engine.clone();
    let running = tokio::spawn(async move { engine.start_sync().await });
    wait_for_state(&harness.engine, SyncState::Syncing).await;

    assert_eq!(harness.engine.start_sync().await.unwrap(), None);

    let report = running.await.unwrap().unwrap().unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(harness.transport.exchange_count(&DeviceId::new("watch")), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_commits_only_finished_exchanges() {
    let harness = Harness::new(SyncConfig::default().with_exchange_timeout(Duration::from_secs(600)));
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.add_peer("watch", DeviceType::Watch);
    harness
        .transport
        .set_delay("watch", Some(Duration::from_secs(60)));
    let incoming = remote("tablet", "w7", ChangeOperation::Create, "{}");
    harness.transport.queue("tablet", incoming.clone());
    harness.record("w1", ChangeOperation::Create, "{}");

    let mut events = harness.engine.subscribe_events();
    let engine = harness.engine.clone();
    let running = tokio::spawn(async move { engine.start_sync().await });
    wait_for_event(&mut events, |event| {
        matches!(event, SyncEvent::DeviceSynced { device_id, .. } if device_id.as_str() == "tablet")
    })
    .await;

    assert!(harness.engine.pause_sync());
    let report = running.await.unwrap().unwrap().unwrap();

    assert_eq!(report.outcome, CycleOutcome::Paused);
    assert_eq!(report.synced_devices, vec![DeviceId::new("tablet")]);
    assert_eq!(harness.engine.status(), SyncState::Paused);
    assert_eq!(harness.storage.applied(), vec![incoming]);
    assert!(harness.engine.pending_changes().is_empty());
    assert!(harness.transport.received(&DeviceId::new("watch")).is_empty());
    assert_eq!(harness.engine.progress(), 0.5);

    harness.transport.set_delay("watch", None);
    let report = harness.engine.resume_sync().await.unwrap().unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(harness.engine.status(), SyncState::Idle);
    assert_eq!(harness.transport.exchange_count(&DeviceId::new("watch")), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_before_any_exchange_finishes_keeps_everything_pending() {
    let harness = Harness::new(SyncConfig::default().with_exchange_timeout(Duration::from_secs(600)));
    harness.add_peer("watch", DeviceType::Watch);
    harness
        .transport
        .set_delay("watch", Some(Duration::from_secs(60)));
    let before = vec![
        harness.record("w1", ChangeOperation::Create, "{}").id,
        harness.record("w2", ChangeOperation::Create, "{}").id,
    ];

    let engine = harness.engine.clone();
    let running = tokio::spawn(async move { engine.start_sync().await });
    wait_for_state(&harness.engine, SyncState::Syncing).await;
    assert!(harness.engine.pause_sync());
    assert!(!harness.engine.pause_sync());

    let report = running.await.unwrap().unwrap().unwrap();
    assert_eq!(report.outcome, CycleOutcome::Paused);
    assert_eq!(report.acknowledged_changes, 0);
    assert_eq!(harness.pending_ids(), before);
    assert_eq!(harness.engine.status(), SyncState::Paused);
}

#[tokio::test(start_paused = true)]
async fn network_loss_discards_the_whole_cycle() {
    let harness = Harness::new(SyncConfig::default().with_exchange_timeout(Duration::from_secs(600)));
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.add_peer("watch", DeviceType::Watch);
    harness
        .transport
        .set_delay("watch", Some(Duration::from_secs(60)));
    harness
        .transport
        .queue("tablet", remote("tablet", "w7", ChangeOperation::Create, "{}"));
    let before = vec![harness.record("w1", ChangeOperation::Create, "{}").id];

    let mut events = harness.engine.subscribe_events();
    let engine = harness.engine.clone();
    let running = tokio::spawn(async move { engine.start_sync().await });
    wait_for_event(&mut events, |event| {
        matches!(event, SyncEvent::DeviceSynced { .. })
    })
    .await;

    harness
        .engine
        .network()
        .set_status(NetworkStatus::Disconnected);
    let error = running.await.unwrap().unwrap_err();

    assert!(matches!(
        error,
        Error::NetworkUnavailable(NetworkStatus::Disconnected)
    ));
    assert_eq!(harness.engine.status(), SyncState::Idle);
    assert_eq!(harness.pending_ids(), before);
    assert!(harness.storage.applied().is_empty());
    assert!(harness.engine.last_sync_at().is_none());
}

#[tokio::test(start_paused = true)]
async fn unknown_status_does_not_abort_in_flight_cycle() {
    let harness = Harness::new(SyncConfig::default().with_exchange_timeout(Duration::from_secs(600)));
    harness.add_peer("watch", DeviceType::Watch);
    harness
        .transport
        .set_delay("watch", Some(Duration::from_secs(10)));
    harness.record("w1", ChangeOperation::Create, "{}");

    let engine = harness.engine.clone();
    let running = tokio::spawn(async move { engine.start_sync().await });
    wait_for_state(&harness.engine, SyncState::Syncing).await;
    harness.engine.network().set_status(NetworkStatus::Unknown);

    let report = running.await.unwrap().unwrap().unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert!(harness.engine.pending_changes().is_empty());
}

#[tokio::test]
async fn resolve_conflict_is_idempotent() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.record("w1", ChangeOperation::Update, "mine");
    let theirs = remote("tablet", "w1", ChangeOperation::Update, "theirs");
    harness.transport.queue("tablet", theirs.clone());
    harness.engine.start_sync().await.unwrap();
    let id = harness.engine.conflicts()[0].id;

    let first = harness
        .engine
        .resolve_conflict(&id, ConflictResolution::UseRemote)
        .await
        .unwrap();
    let second = harness
        .engine
        .resolve_conflict(&id, ConflictResolution::UseRemote)
        .await
        .unwrap();
    assert_eq!(first, Some(theirs.clone()));
    assert_eq!(first, second);
    assert_eq!(harness.storage.applied(), vec![theirs]);

    let error = harness
        .engine
        .resolve_conflict(&id, ConflictResolution::UseLocal)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::AlreadyResolved { .. }));

    let late_merge = harness
        .engine
        .resolve_conflict(&id, ConflictResolution::Merge)
        .await;
    assert!(matches!(late_merge, Err(Error::AlreadyResolved { .. })));
}

#[tokio::test]
async fn forget_device_requires_an_empty_pending_set() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.record("w1", ChangeOperation::Create, "{}");
    let tablet = DeviceId::new("tablet");

    assert!(matches!(
        harness.engine.forget_device(&tablet),
        Err(Error::DeviceHasPendingChanges(_))
    ));
    harness.engine.start_sync().await.unwrap();
    assert_eq!(harness.engine.forget_device(&tablet).unwrap().device_id, tablet);
    assert!(matches!(
        harness.engine.forget_device(&tablet),
        Err(Error::DeviceNotFound(_))
    ));
}

#[tokio::test]
async fn forget_device_keeps_peers_with_open_conflicts() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.record("w1", ChangeOperation::Update, "mine");
    harness
        .transport
        .queue("tablet", remote("tablet", "w1", ChangeOperation::Update, "theirs"));
    let tablet = DeviceId::new("tablet");

    harness.engine.start_sync().await.unwrap().unwrap();
    assert!(harness.engine.pending_changes().is_empty());
    assert!(matches!(
        harness.engine.forget_device(&tablet),
        Err(Error::DeviceHasOpenConflicts(_))
    ));

    let id = harness.engine.conflicts()[0].id;
    harness
        .engine
        .resolve_conflict(&id, ConflictResolution::UseLocal)
        .await
        .unwrap();
    assert_eq!(harness.engine.forget_device(&tablet).unwrap().device_id, tablet);
}

#[tokio::test]
async fn reconnect_triggers_a_cycle_when_changes_are_pending() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("tablet", DeviceType::Tablet);
    harness
        .engine
        .network()
        .set_status(NetworkStatus::Disconnected);
    harness.record("w1", ChangeOperation::Create, "{}");

    let mut events = harness.engine.subscribe_events();
    let watcher = harness.engine.spawn_network_watcher();
    tokio::task::yield_now().await;
    harness.engine.network().set_status(NetworkStatus::Cellular);

    tokio::time::timeout(
        Duration::from_secs(5),
        wait_for_event(&mut events, |event| {
            matches!(event, SyncEvent::CycleCompleted { .. })
        }),
    )
    .await
    .expect("reconnect should start a cycle");
    assert!(harness.engine.pending_changes().is_empty());

    harness.engine.shutdown();
    watcher.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn urgent_change_wakes_the_scheduler() {
    let harness = Harness::new(SyncConfig::default().with_sync_interval(Duration::from_secs(3600)));
    harness.add_peer("watch", DeviceType::Watch);

    let mut events = harness.engine.subscribe_events();
    let scheduler = harness.engine.spawn_scheduler();
    // The first tick fires immediately.
    wait_for_event(&mut events, |event| {
        matches!(event, SyncEvent::CycleCompleted { .. })
    })
    .await;

    harness
        .engine
        .record_change(
            "medication",
            "insulin-dose",
            ChangeOperation::Create,
            "8u",
            ChangePriority::Critical,
        )
        .unwrap();
    wait_for_event(&mut events, |event| {
        matches!(event, SyncEvent::CycleCompleted { report } if report.acknowledged_changes == 1)
    })
    .await;
    assert!(harness.engine.pending_changes().is_empty());

    harness.engine.shutdown();
    scheduler.await.unwrap();
}

#[tokio::test]
async fn statistics_and_snapshot_reflect_engine_state() {
    let harness = Harness::new(SyncConfig::default());
    harness.add_peer("tablet", DeviceType::Tablet);
    harness.record("w1", ChangeOperation::Create, "{}");
    harness.record("w2", ChangeOperation::Create, "{}");

    let stats = harness.engine.statistics();
    assert_eq!(stats.total_changes, 2);
    assert_eq!(stats.pending_changes, 2);
    assert_eq!(stats.connected_devices, 1);

    harness.engine.start_sync().await.unwrap();
    let snapshot = harness.engine.snapshot();
    assert_eq!(snapshot.state, SyncState::Idle);
    assert_eq!(snapshot.network, NetworkStatus::WiFi);
    assert_eq!(snapshot.statistics.pending_changes, 0);
    assert_eq!(snapshot.statistics.total_changes, 2);
    assert_eq!(snapshot.statistics.sync_progress, 1.0);
    assert!(snapshot.last_sync_at.is_some());
}

#[tokio::test]
async fn journaled_engine_keeps_pending_changes_and_conflicts() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let transport = Arc::new(LoopbackTransport::new());
    transport.add_peer("tablet");
    transport.queue("tablet", remote("tablet", "w1", ChangeOperation::Update, "theirs"));

    let build = || {
        let engine = SyncEngine::builder(
            LocalDevice::new("phone", "Phone", DeviceType::Phone),
            Arc::new(MemoryStorage::new()),
            transport.clone(),
        )
        .network(Arc::new(NetworkMonitor::new(NetworkStatus::WiFi)))
        .journal(Arc::clone(&db))
        .build()
        .unwrap();
        engine.upsert_device(ConnectedDevice::new("tablet", "Tablet", DeviceType::Tablet, 1));
        engine
    };

    let engine = build();
    engine
        .record_change("workout", "w1", ChangeOperation::Update, "mine", ChangePriority::Normal)
        .unwrap();
    engine
        .record_change("workout", "w2", ChangeOperation::Create, "{}", ChangePriority::Low)
        .unwrap();
    transport.set_failure("tablet", Some("offline"));
    engine.start_sync().await.unwrap();
    assert_eq!(engine.pending_changes().len(), 2);

    let reopened = build();
    assert_eq!(reopened.pending_changes().len(), 2);
    transport.set_failure("tablet", None);
    reopened.start_sync().await.unwrap();
    assert_eq!(reopened.conflicts().len(), 1);

    let again = build();
    assert_eq!(again.conflicts().len(), 1);
    assert_eq!(again.statistics().total_changes, 2);
    assert!(again.pending_changes().is_empty());
}

#[tokio::test]
async fn handled_remote_changes_stay_settled_after_restart() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let storage = Arc::new(MemoryStorage::new());
    let transport = Arc::new(LoopbackTransport::new());
    transport.add_peer("watch");
    transport.queue("watch", remote("watch", "workout-1", ChangeOperation::Create, "P2"));
    transport.queue("watch", remote("watch", "workout-2", ChangeOperation::Create, "{}"));

    let build = || {
        let engine = SyncEngine::builder(
            LocalDevice::new("phone", "Phone", DeviceType::Phone),
            storage.clone(),
            transport.clone(),
        )
        .network(Arc::new(NetworkMonitor::new(NetworkStatus::WiFi)))
        .journal(Arc::clone(&db))
        .merge_fn("workout", concat_merge())
        .build()
        .unwrap();
        engine.upsert_device(ConnectedDevice::new("watch", "Watch", DeviceType::Watch, 1));
        engine
    };

    let engine = build();
    engine
        .record_change("workout", "workout-1", ChangeOperation::Create, "P1", ChangePriority::Normal)
        .unwrap();
    let report = engine.start_sync().await.unwrap().unwrap();
    assert_eq!(report.detected_conflicts, 1);
    assert_eq!(report.applied_changes, 1);
    let id = engine.conflicts()[0].id;
    engine
        .resolve_conflict(&id, ConflictResolution::Merge)
        .await
        .unwrap();
    engine.start_sync().await.unwrap().unwrap();
    assert!(engine.conflicts().is_empty());
    drop(engine);

    let reopened = build();
    let report = reopened.start_sync().await.unwrap().unwrap();
    assert_eq!(report.detected_conflicts, 0);
    assert_eq!(report.applied_changes, 0);
    assert!(reopened.conflicts().is_empty());
    assert_eq!(reopened.conflict_history().len(), 1);
}
