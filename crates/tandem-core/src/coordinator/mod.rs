//! Sync coordinator: the engine state machine and its triggers.
//!
//! A cycle runs in two phases. Exchanges with every reachable device run
//! concurrently and only stage what they receive; the local commit phase then
//! detects conflicts, applies accepted changes and acknowledges the outgoing
//! batch. Losing the network discards the staged results, pausing commits the
//! exchanges that already finished.

mod cycle;
#[cfg(test)]
mod tests;

pub use cycle::{CycleOutcome, SyncReport};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use self::cycle::{exchange_with, network_lost, ActiveCycle, ExchangeOutcome, StopReason};
use crate::changelog::{ChangeLog, SeenRemote};
use crate::config::SyncConfig;
use crate::db::Database;
use crate::detector::{ConflictDetector, SchemaCheck};
use crate::error::{Error, Result};
use crate::events::SyncEvent;
use crate::models::{
    ChangeId, ChangeOperation, ChangePriority, ConflictId, ConflictResolution, ConnectedDevice,
    DeviceId, DeviceSyncStatus, EntityKey, LocalDevice, Payload, SyncChange, SyncConflict,
    SyncStatistics,
};
use crate::network::{NetworkMonitor, NetworkStatus};
use crate::registry::{DeviceRegistry, UpsertOutcome};
use crate::resolver::{ConflictResolver, ConflictStore, MergeFn};
use crate::stats::{collect_statistics, SyncSnapshot};
use crate::storage::SyncStorage;
use crate::transport::PeerTransport;
use crate::util::unix_timestamp_ms;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine-level sync state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Paused,
}

impl SyncState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    local: LocalDevice,
    config: SyncConfig,
    storage: Arc<dyn SyncStorage>,
    transport: Arc<dyn PeerTransport>,
    network: Option<Arc<NetworkMonitor>>,
    journal: Option<Arc<Database>>,
    merge_fns: Vec<(String, MergeFn)>,
}

impl SyncEngineBuilder {
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a network monitor; by default the engine owns one starting at `Unknown`
    #[must_use]
    pub fn network(mut self, network: Arc<NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    /// Persist the change log and conflict history
    #[must_use]
    pub fn journal(mut self, journal: Arc<Database>) -> Self {
        self.journal = Some(journal);
        self
    }

    #[must_use]
    pub fn merge_fn(mut self, entity_type: impl Into<String>, merge: MergeFn) -> Self {
        self.merge_fns.push((entity_type.into(), merge));
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        self.config.validate()?;

        let (change_log, conflicts, seen_remote) = match &self.journal {
            Some(journal) => (
                ChangeLog::open(&self.config, Arc::clone(journal))?,
                ConflictStore::open(Arc::clone(journal))?,
                SeenRemote::open(&self.config, Arc::clone(journal))?,
            ),
            None => (
                ChangeLog::new(&self.config),
                ConflictStore::new(),
                SeenRemote::new(&self.config),
            ),
        };

        let schema_storage = Arc::clone(&self.storage);
        let schema_check: SchemaCheck =
            Arc::new(move |local: &SyncChange, remote: &SyncChange| {
                schema_storage.validate_schema(local, remote)
            });
        let detector = ConflictDetector::new(self.local.device_id.clone())
            .with_schema_check(schema_check)
            .with_concurrency_window(self.config.concurrency_window_ms);

        let resolver = ConflictResolver::with_storage(Arc::clone(&self.storage));
        for (entity_type, merge) in self.merge_fns {
            resolver.register_merge(entity_type, merge);
        }

        let (state, _) = watch::channel(SyncState::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            "Sync engine ready for {} ({} pending changes)",
            self.local.device_id,
            change_log.pending_count()
        );

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                local: self.local,
                config: self.config,
                change_log,
                registry: DeviceRegistry::new(),
                network: self.network.unwrap_or_default(),
                detector,
                resolver,
                conflicts,
                storage: self.storage,
                transport: self.transport,
                state,
                events,
                cycles: Mutex::new(CycleSlot::default()),
                run_lock: tokio::sync::Mutex::new(()),
                progress: Mutex::new(0.0),
                last_sync_at: Mutex::new(None),
                seen_remote,
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

#[derive(Debug, Default)]
struct CycleSlot {
    active: Option<ActiveCycle>,
    generation: u64,
}

struct EngineInner {
    local: LocalDevice,
    config: SyncConfig,
    change_log: ChangeLog,
    registry: DeviceRegistry,
    network: Arc<NetworkMonitor>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    conflicts: ConflictStore,
    storage: Arc<dyn SyncStorage>,
    transport: Arc<dyn PeerTransport>,
    state: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    cycles: Mutex<CycleSlot>,
    /// Held for the whole of a cycle so a resumed cycle waits for the paused one to commit
    run_lock: tokio::sync::Mutex<()>,
    progress: Mutex<f64>,
    last_sync_at: Mutex<Option<i64>>,
    seen_remote: SeenRemote,
    wake: Notify,
    shutdown: CancellationToken,
}

/// Device-local sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("local", &self.inner.local.device_id)
            .field("state", &self.status())
            .field("network", &self.inner.network.status())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn builder(
        local: LocalDevice,
        storage: Arc<dyn SyncStorage>,
        transport: Arc<dyn PeerTransport>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            local,
            config: SyncConfig::default(),
            storage,
            transport,
            network: None,
            journal: None,
            merge_fns: Vec::new(),
        }
    }

    // --- Sync control ---

    /// Run one sync cycle.
    ///
    /// Returns `Ok(None)` without doing anything when a cycle is already
    /// running. Fails with [`Error::NetworkUnavailable`] when the network gate
    /// is closed or drops mid-cycle; pending changes are untouched in both cases.
    pub async fn start_sync(&self) -> Result<Option<SyncReport>> {
        let Some(cycle) = self.begin_cycle() else {
            tracing::debug!("Sync already running, ignoring start request");
            return Ok(None);
        };

        let _running = self.inner.run_lock.lock().await;
        let result = self.run_cycle(&cycle).await;
        self.finish_cycle(&cycle, &result);
        result.map(Some)
    }

    /// Stop the running cycle. Exchanges that already finished are committed.
    ///
    /// Returns `false` when no cycle was running.
    pub fn pause_sync(&self) -> bool {
        let slot = self.inner.cycles.lock();
        if self.status() != SyncState::Syncing {
            return false;
        }
        if let Some(active) = &slot.active {
            active.stop(StopReason::Paused);
        }
        self.set_state(SyncState::Paused);
        tracing::info!("Sync paused");
        true
    }

    /// Restart from the current pending set after a pause
    pub async fn resume_sync(&self) -> Result<Option<SyncReport>> {
        if self.status() != SyncState::Paused {
            return Ok(None);
        }
        tracing::info!("Resuming sync");
        self.start_sync().await
    }

    fn begin_cycle(&self) -> Option<ActiveCycle> {
        let mut slot = self.inner.cycles.lock();
        if self.status() == SyncState::Syncing {
            return None;
        }
        slot.generation += 1;
        let cycle = ActiveCycle::new(slot.generation);
        slot.active = Some(cycle.clone());
        self.set_state(SyncState::Syncing);
        Some(cycle)
    }

    fn finish_cycle(&self, cycle: &ActiveCycle, result: &Result<SyncReport>) {
        let mut slot = self.inner.cycles.lock();
        let current = slot
            .active
            .as_ref()
            .is_some_and(|active| active.generation == cycle.generation);
        if current {
            slot.active = None;
            if self.status() == SyncState::Syncing {
                self.set_state(SyncState::Idle);
            }
        }
        drop(slot);

        match result {
            Ok(report) => {
                tracing::info!(
                    "Sync cycle {} {:?}: {}/{} devices synced, {} acknowledged, {} applied, {} conflicts",
                    cycle.generation,
                    report.outcome,
                    report.synced_devices.len(),
                    report.reachable_devices,
                    report.acknowledged_changes,
                    report.applied_changes,
                    report.detected_conflicts
                );
                self.emit(SyncEvent::CycleCompleted {
                    report: report.clone(),
                });
            }
            Err(error) => {
                tracing::warn!("Sync cycle {} aborted: {}", cycle.generation, error);
                self.emit(SyncEvent::CycleAborted {
                    reason: error.to_string(),
                });
            }
        }
    }

    async fn run_cycle(&self, cycle: &ActiveCycle) -> Result<SyncReport> {
        let inner = &self.inner;
        let status = inner.network.status();
        if !status.allows_sync() {
            return Err(Error::NetworkUnavailable(status));
        }

        let outgoing = inner.change_log.outgoing_batch();
        let outgoing_ids = outgoing.iter().map(|change| change.id).collect::<Vec<_>>();
        let devices = inner.registry.reachable_devices();
        let reachable = devices.len();
        let mut report = SyncReport::new(unix_timestamp_ms(), reachable);
        self.set_progress(SyncReport::progress_of(0, reachable));

        tracing::debug!(
            "Sync cycle {}: {} outgoing changes, {} reachable devices",
            cycle.generation,
            outgoing.len(),
            reachable
        );

        let permits = Arc::new(Semaphore::new(inner.config.parallelism_for(reachable)));
        let mut exchanges = JoinSet::new();
        for device in devices {
            inner
                .registry
                .set_sync_status(&device.device_id, DeviceSyncStatus::Syncing);
            exchanges.spawn(exchange_with(
                Arc::clone(&inner.transport),
                Arc::clone(&permits),
                cycle.token.clone(),
                device,
                outgoing.clone(),
                inner.config.exchange_timeout(),
            ));
        }

        let mut network = inner.network.watch();
        let mut watching_network = true;
        let mut staged = Vec::new();
        let mut attempted = 0;

        loop {
            tokio::select! {
                joined = exchanges.join_next() => {
                    let Some(joined) = joined else { break };
                    let (device_id, outcome) = match joined {
                        Ok(result) => result,
                        Err(error) => {
                            tracing::warn!("Exchange task ended abnormally: {}", error);
                            attempted += 1;
                            self.set_progress(SyncReport::progress_of(attempted, reachable));
                            continue;
                        }
                    };
                    match outcome {
                        ExchangeOutcome::Received(incoming) => {
                            attempted += 1;
                            self.emit(SyncEvent::DeviceSynced {
                                device_id: device_id.clone(),
                                received: incoming.len(),
                            });
                            staged.push((device_id, incoming));
                        }
                        ExchangeOutcome::Failed(reason) => {
                            attempted += 1;
                            tracing::warn!("Exchange with {} failed: {}", device_id, reason);
                            inner.registry.set_sync_status(&device_id, DeviceSyncStatus::Failed);
                            self.emit(SyncEvent::DeviceFailed {
                                device_id: device_id.clone(),
                                reason: reason.clone(),
                            });
                            report.failed_devices.push((device_id, reason));
                        }
                        ExchangeOutcome::Cancelled => {
                            inner.registry.set_sync_status(&device_id, DeviceSyncStatus::Idle);
                            continue;
                        }
                    }
                    self.set_progress(SyncReport::progress_of(attempted, reachable));
                }
                () = network_lost(&mut network), if watching_network => {
                    watching_network = false;
                    tracing::warn!("Network lost during sync cycle {}", cycle.generation);
                    cycle.stop(StopReason::NetworkLost);
                }
            }
        }

        match cycle.stop_reason() {
            Some(StopReason::NetworkLost) => {
                for (device_id, _) in &staged {
                    inner
                        .registry
                        .set_sync_status(device_id, DeviceSyncStatus::Idle);
                }
                return Err(Error::NetworkUnavailable(NetworkStatus::Disconnected));
            }
            Some(StopReason::Paused) => report.outcome = CycleOutcome::Paused,
            None => {}
        }

        self.commit(&mut report, staged, &outgoing_ids).await?;
        report.finished_at = unix_timestamp_ms();
        report.progress = self.progress();
        Ok(report)
    }

    /// Local commit of staged exchange results
    async fn commit(
        &self,
        report: &mut SyncReport,
        staged: Vec<(DeviceId, Vec<SyncChange>)>,
        outgoing_ids: &[ChangeId],
    ) -> Result<()> {
        let inner = &self.inner;
        let now = unix_timestamp_ms();

        let mut synced = Vec::with_capacity(staged.len());
        let mut remote = Vec::new();
        let referenced = inner.conflicts.referenced_changes();
        for (device_id, incoming) in staged {
            synced.push(device_id);
            remote.extend(incoming.into_iter().filter(|change| {
                !inner.seen_remote.contains(&change.id) && !referenced.contains(&change.id)
            }));
        }

        let local = self.detection_base(&remote);
        let outcome = inner.detector.analyze(&local, &remote);
        let mut handled = outcome
            .superseded
            .iter()
            .map(|change| change.id)
            .collect::<Vec<_>>();

        for conflict in outcome.conflicts {
            handled.push(conflict.remote_change.id);
            let conflict_id = conflict.id;
            let conflict_type = conflict.conflict_type;
            if !inner.conflicts.insert(conflict.clone())? {
                continue;
            }
            report.detected_conflicts += 1;
            tracing::info!(
                "Conflict {} ({}) on {}",
                conflict_id,
                conflict_type,
                conflict.entity_key()
            );
            self.emit(SyncEvent::ConflictDetected { conflict });

            let Some(policy) = inner.config.auto_policy(conflict_type) else {
                continue;
            };
            match self.resolve_conflict_at(&conflict_id, policy, now).await {
                Ok(accepted) => {
                    report.auto_resolved_conflicts += 1;
                    if accepted.is_some() && policy != ConflictResolution::UseLocal {
                        report.applied_changes += 1;
                    }
                }
                Err(error @ (Error::UnmergeableConflict { .. } | Error::InvalidChange(_))) => {
                    tracing::warn!(
                        "Automatic {} failed for conflict {}: {}; left for manual resolution",
                        policy,
                        conflict_id,
                        error
                    );
                }
                Err(Error::Storage(reason)) => {
                    tracing::warn!(
                        "Storage rejected automatic {} of conflict {}: {}",
                        policy,
                        conflict_id,
                        reason
                    );
                    report.failed_applies += 1;
                }
                Err(error) => return Err(error),
            }
        }

        for change in &outcome.clean_remote {
            match inner.storage.apply_change(change).await {
                Ok(()) => {
                    handled.push(change.id);
                    report.applied_changes += 1;
                }
                Err(error) => {
                    // Left unseen so the peer's next offer is applied again
                    tracing::warn!(
                        "Failed to apply change {} from {}: {}",
                        change.id,
                        change.device_id,
                        error
                    );
                    report.failed_applies += 1;
                }
            }
        }
        inner.seen_remote.mark(&handled, now)?;

        if !synced.is_empty() {
            report.acknowledged_changes = inner.change_log.acknowledge_many(outgoing_ids, now)?;
        }
        for device_id in &synced {
            inner
                .registry
                .set_sync_status(device_id, DeviceSyncStatus::Synced);
            inner.registry.touch(device_id, now);
        }
        report.synced_devices = synced;
        *inner.last_sync_at.lock() = Some(now);
        Ok(())
    }

    /// Local side for detection: pending changes, plus acknowledged ones a
    /// remote change may not have seen because it predates the acknowledgement
    fn detection_base(&self, remote: &[SyncChange]) -> Vec<SyncChange> {
        let mut local = self.inner.change_log.pending();
        let retained = self.inner.change_log.retained_acknowledged();
        if retained.is_empty() || remote.is_empty() {
            return local;
        }

        let mut earliest_remote: HashMap<EntityKey, i64> = HashMap::new();
        for change in remote {
            earliest_remote
                .entry(change.entity_key())
                .and_modify(|earliest| *earliest = (*earliest).min(change.timestamp))
                .or_insert(change.timestamp);
        }
        local.extend(
            retained
                .into_iter()
                .filter(|entry| {
                    let earliest = earliest_remote.get(&entry.change.entity_key());
                    matches!(
                        (earliest, entry.acknowledged_at),
                        (Some(earliest), Some(acknowledged_at)) if *earliest < acknowledged_at
                    )
                })
                .map(|entry| entry.change),
        );
        local
    }

    // --- Conflicts ---

    /// Resolve a surfaced conflict and apply the outcome.
    ///
    /// `UseRemote` and `Merge` apply the accepted change to storage; a merged
    /// change is also recorded locally so it propagates to other devices.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &ConflictId,
        resolution: ConflictResolution,
    ) -> Result<Option<SyncChange>> {
        self.resolve_conflict_at(conflict_id, resolution, unix_timestamp_ms())
            .await
    }

    async fn resolve_conflict_at(
        &self,
        conflict_id: &ConflictId,
        resolution: ConflictResolution,
        now: i64,
    ) -> Result<Option<SyncChange>> {
        let inner = &self.inner;
        let (newly_resolved, accepted) = inner.conflicts.update(conflict_id, |conflict| {
            let was_resolved = conflict.is_resolved;
            let accepted = inner.resolver.resolve(conflict, resolution, now)?;
            let newly_resolved = !was_resolved && conflict.is_resolved;
            if newly_resolved {
                if let Some(merged) = accepted
                    .as_ref()
                    .filter(|change| change.operation == ChangeOperation::Merge)
                {
                    inner.change_log.record_at(merged.clone(), now)?;
                }
            }
            Ok((newly_resolved, accepted))
        })?;

        if let Some(change) = &accepted {
            if resolution != ConflictResolution::UseLocal {
                inner.storage.apply_change(change).await?;
            }
        }
        if newly_resolved {
            self.emit(SyncEvent::ConflictResolved {
                conflict_id: *conflict_id,
                resolution,
            });
        }
        Ok(accepted)
    }

    /// Register a merge function for an entity type
    pub fn register_merge(&self, entity_type: impl Into<String>, merge: MergeFn) {
        self.inner.resolver.register_merge(entity_type, merge);
    }

    // --- Local changes ---

    /// Record a mutation made on this device. Urgent priorities wake the scheduler.
    pub fn record_change(
        &self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: ChangeOperation,
        payload: impl Into<Payload>,
        priority: ChangePriority,
    ) -> Result<SyncChange> {
        let change = SyncChange::new(
            entity_type,
            entity_id,
            operation,
            self.inner.local.device_id.clone(),
            payload,
        )
        .with_priority(priority);
        self.inner.change_log.record(change.clone())?;
        if priority.is_urgent() {
            self.inner.wake.notify_one();
        }
        Ok(change)
    }

    // --- Devices ---

    /// Register or refresh a peer
    pub fn upsert_device(&self, device: ConnectedDevice) -> UpsertOutcome {
        self.inner.registry.upsert(device)
    }

    pub fn heartbeat(&self, device_id: &DeviceId, at: i64) -> Result<UpsertOutcome> {
        self.inner.registry.heartbeat(device_id, at)
    }

    pub fn mark_device_offline(&self, device_id: &DeviceId) -> Result<()> {
        self.inner.registry.mark_offline(device_id)
    }

    /// Remove a device entry. Refused while local changes are still pending
    /// or while an open conflict involves the device.
    pub fn forget_device(&self, device_id: &DeviceId) -> Result<ConnectedDevice> {
        if self.inner.change_log.pending_count() > 0 {
            return Err(Error::DeviceHasPendingChanges(device_id.clone()));
        }
        if self.inner.conflicts.has_open_with(device_id) {
            return Err(Error::DeviceHasOpenConflicts(device_id.clone()));
        }
        let device = self
            .inner
            .registry
            .remove(device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.clone()))?;
        tracing::info!("Forgot device {}", device_id);
        Ok(device)
    }

    // --- Background triggers ---

    /// Liveness sweep and retention prune
    pub fn run_maintenance(&self, now: i64) {
        let inner = &self.inner;
        inner
            .registry
            .expire_stale(now, inner.config.liveness_window());
        if let Err(error) = inner.change_log.prune_expired(now) {
            tracing::warn!("Failed to prune acknowledged changes: {}", error);
        }
        if let Err(error) = inner.seen_remote.prune_expired(now) {
            tracing::warn!("Failed to prune seen remote changes: {}", error);
        }
    }

    /// Start a cycle unless paused or gated
    async fn trigger(&self, source: &str) {
        if self.status() == SyncState::Paused {
            tracing::debug!("Skipping {} sync trigger while paused", source);
            return;
        }
        if !self.inner.network.allows_sync() {
            tracing::debug!("Skipping {} sync trigger, network gated", source);
            return;
        }
        match self.start_sync().await {
            Ok(_) => {}
            Err(error) => tracing::warn!("{} sync failed: {}", source, error),
        }
    }

    /// Interval timer: maintenance plus a sync attempt every tick, or early on urgent changes
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let inner = &engine.inner;
            let mut ticker = tokio::time::interval(inner.config.sync_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                    () = inner.wake.notified() => {
                        tracing::debug!("Urgent change recorded, syncing early");
                    }
                }
                engine.run_maintenance(unix_timestamp_ms());
                engine.trigger("scheduled").await;
            }
            tracing::debug!("Scheduler stopped");
        })
    }

    /// Starts a cycle when connectivity returns and changes are pending
    pub fn spawn_network_watcher(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let inner = &engine.inner;
            let mut status = inner.network.watch();
            let mut previous = *status.borrow_and_update();
            loop {
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let current = *status.borrow_and_update();
                let reconnected = current.allows_sync() && !previous.allows_sync();
                previous = current;

                if reconnected
                    && inner.config.auto_sync_on_reconnect
                    && inner.change_log.pending_count() > 0
                {
                    let engine = engine.clone();
                    tokio::spawn(async move { engine.trigger("reconnect").await });
                }
            }
            tracing::debug!("Network watcher stopped");
        })
    }

    /// Stop background tasks
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    // --- Observable state ---

    pub fn status(&self) -> SyncState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Progress of the current or last cycle
    pub fn progress(&self) -> f64 {
        *self.inner.progress.lock()
    }

    pub fn pending_changes(&self) -> Vec<SyncChange> {
        self.inner.change_log.pending()
    }

    /// Unresolved conflicts, oldest first
    pub fn conflicts(&self) -> Vec<SyncConflict> {
        self.inner.conflicts.open_conflicts()
    }

    /// All conflicts ever detected, resolved ones included
    pub fn conflict_history(&self) -> Vec<SyncConflict> {
        self.inner.conflicts.all()
    }

    pub fn devices(&self) -> Vec<ConnectedDevice> {
        self.inner.registry.devices()
    }

    pub fn statistics(&self) -> SyncStatistics {
        collect_statistics(
            &self.inner.change_log,
            &self.inner.conflicts,
            &self.inner.registry,
            self.progress(),
        )
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            state: self.status(),
            network: self.inner.network.status(),
            statistics: self.statistics(),
            open_conflicts: self.conflicts(),
            devices: self.devices(),
            last_sync_at: self.last_sync_at(),
        }
    }

    pub fn last_sync_at(&self) -> Option<i64> {
        *self.inner.last_sync_at.lock()
    }

    pub fn local_device(&self) -> &LocalDevice {
        &self.inner.local
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.inner.network
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.inner.change_log
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    // --- Internals ---

    fn set_state(&self, state: SyncState) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::debug!("Sync state -> {}", state);
            self.emit(SyncEvent::StatusChanged { state });
        }
    }

    fn set_progress(&self, progress: f64) {
        *self.inner.progress.lock() = progress;
        self.emit(SyncEvent::ProgressUpdated { progress });
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.inner.events.send(event);
    }
}
