use std::sync::Arc;

use serde::Serialize;
use tandem_core::resolver::MergeFn;
use tandem_core::stats::SyncSnapshot;
use tandem_core::{
    ChangeOperation, ChangePriority, ConflictResolution, ConflictType, ConnectedDevice, DeviceId,
    DeviceType, LocalDevice, LoopbackTransport, MemoryStorage, NetworkMonitor, NetworkStatus,
    Payload, SyncChange, SyncConfig, SyncEngine, SyncEvent, SyncReport,
};

use crate::commands::common::{format_conflict_lines, now_ms, CliContext};
use crate::error::CliError;

const PEER_TYPES: [DeviceType; 3] = [DeviceType::Watch, DeviceType::Tablet, DeviceType::Desktop];

/// What one simulated cycle did
#[derive(Debug, Serialize)]
pub struct SimulationOutcome {
    pub report: SyncReport,
    pub events: Vec<SyncEvent>,
    pub snapshot: SyncSnapshot,
    /// Changes the in-memory storage accepted, in order
    pub applied: Vec<SyncChange>,
}

/// Run one cycle from `local_id` against `peers` loopback devices.
///
/// The first peer created the same workout independently, so the cycle always
/// detects one duplicate create. The last `offline` peers are unreachable.
pub async fn simulate_cycle(
    config: SyncConfig,
    local_id: &str,
    peers: usize,
    offline: usize,
    auto_merge: bool,
) -> Result<SimulationOutcome, CliError> {
    if peers == 0 {
        return Err(CliError::NoPeers);
    }

    let storage = Arc::new(MemoryStorage::new());
    let transport = Arc::new(LoopbackTransport::new());
    let mut builder = SyncEngine::builder(
        LocalDevice::new(local_id, local_id, DeviceType::Phone),
        storage.clone(),
        transport.clone(),
    )
    .network(Arc::new(NetworkMonitor::new(NetworkStatus::WiFi)));
    if auto_merge {
        let merge: MergeFn = Arc::new(merge_json_objects);
        builder = builder
            .config(config.with_policy(ConflictType::DuplicateCreate, ConflictResolution::Merge))
            .merge_fn("workout", merge);
    } else {
        builder = builder.config(config);
    }
    let engine = builder.build()?;
    let mut events = engine.subscribe_events();

    engine.record_change(
        "workout",
        "workout-1",
        ChangeOperation::Create,
        format!(r#"{{"source":"{local_id}","km":5}}"#),
        ChangePriority::Normal,
    )?;
    engine.record_change(
        "medication",
        "insulin",
        ChangeOperation::Update,
        r#"{"units":8}"#,
        ChangePriority::Critical,
    )?;

    let now = now_ms();
    let online = peers.saturating_sub(offline);
    for index in 0..peers {
        let peer_id = format!("peer-{}", index + 1);
        let device_type = PEER_TYPES[index % PEER_TYPES.len()];
        engine.upsert_device(ConnectedDevice::new(
            peer_id.as_str(),
            peer_id.as_str(),
            device_type,
            now,
        ));
        transport.add_peer(peer_id.as_str());
        transport.queue(
            peer_id.as_str(),
            SyncChange::new(
                "heart_rate",
                format!("hr-{}", index + 1),
                ChangeOperation::Create,
                DeviceId::new(peer_id.as_str()),
                r#"{"bpm":72}"#,
            ),
        );
        if index == 0 {
            transport.queue(
                peer_id.as_str(),
                SyncChange::new(
                    "workout",
                    "workout-1",
                    ChangeOperation::Create,
                    DeviceId::new(peer_id.as_str()),
                    format!(r#"{{"source":"{peer_id}","minutes":30}}"#),
                ),
            );
        }
        if index >= online {
            engine.mark_device_offline(&DeviceId::new(peer_id))?;
        }
    }

    let report = engine.start_sync().await?.ok_or(CliError::CycleSkipped)?;

    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }

    Ok(SimulationOutcome {
        report,
        events: collected,
        snapshot: engine.snapshot(),
        applied: storage.applied(),
    })
}

/// Shallow merge of two JSON objects; local keys win
pub fn merge_json_objects(local: &SyncChange, remote: &SyncChange) -> Option<Payload> {
    let serde_json::Value::Object(mut merged) =
        serde_json::from_slice::<serde_json::Value>(remote.payload.as_bytes()).ok()?
    else {
        return None;
    };
    let serde_json::Value::Object(local) =
        serde_json::from_slice::<serde_json::Value>(local.payload.as_bytes()).ok()?
    else {
        return None;
    };
    merged.extend(local);
    serde_json::to_vec(&serde_json::Value::Object(merged))
        .ok()
        .map(Payload::from)
}

/// One line per event worth showing; progress ticks are skipped
pub fn describe_event(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::StatusChanged { state } => Some(format!("state -> {state}")),
        SyncEvent::ProgressUpdated { .. } => None,
        SyncEvent::DeviceSynced {
            device_id,
            received,
        } => Some(format!("synced {device_id}, received {received} changes")),
        SyncEvent::DeviceFailed { device_id, reason } => {
            Some(format!("failed {device_id}: {reason}"))
        }
        SyncEvent::ConflictDetected { conflict } => Some(format!(
            "conflict {} on {}",
            conflict.conflict_type,
            conflict.entity_key()
        )),
        SyncEvent::ConflictResolved {
            conflict_id,
            resolution,
        } => Some(format!("resolved {conflict_id} with {resolution}")),
        SyncEvent::CycleCompleted { report } => Some(format!(
            "cycle done: {}/{} devices, {} acknowledged, {} applied",
            report.synced_devices.len(),
            report.reachable_devices,
            report.acknowledged_changes,
            report.applied_changes
        )),
        SyncEvent::CycleAborted { reason } => Some(format!("cycle aborted: {reason}")),
    }
}

pub async fn run_simulate(
    context: &CliContext,
    peers: usize,
    offline: usize,
    auto_merge: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let outcome = simulate_cycle(
        context.load_config()?,
        &context.device_id,
        peers,
        offline,
        auto_merge,
    )
    .await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    for line in outcome.events.iter().filter_map(describe_event) {
        println!("{line}");
    }
    println!("{}", outcome.snapshot.headline());
    for line in format_conflict_lines(&outcome.snapshot.open_conflicts) {
        println!("open: {line}");
    }
    Ok(())
}
