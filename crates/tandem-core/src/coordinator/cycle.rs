//! One sync cycle: concurrent exchanges, then a local commit.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::models::{ConnectedDevice, DeviceId, SyncChange};
use crate::network::NetworkStatus;
use crate::transport::PeerTransport;

/// Why a cycle stopped before every exchange finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    Paused,
    NetworkLost,
}

/// Handle on the cycle currently running
#[derive(Debug, Clone)]
pub(crate) struct ActiveCycle {
    pub generation: u64,
    pub token: CancellationToken,
    stop: Arc<Mutex<Option<StopReason>>>,
}

impl ActiveCycle {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            token: CancellationToken::new(),
            stop: Arc::default(),
        }
    }

    /// Cancel in-flight exchanges. The first reason given wins.
    pub fn stop(&self, reason: StopReason) {
        self.stop.lock().get_or_insert(reason);
        self.token.cancel();
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop.lock()
    }
}

/// How a single device exchange ended
#[derive(Debug)]
pub(crate) enum ExchangeOutcome {
    Received(Vec<SyncChange>),
    Failed(String),
    Cancelled,
}

/// Exchange with one device under the cycle's permit pool and deadline
pub(crate) async fn exchange_with(
    transport: Arc<dyn PeerTransport>,
    permits: Arc<Semaphore>,
    token: CancellationToken,
    device: ConnectedDevice,
    outgoing: Vec<SyncChange>,
    deadline: Duration,
) -> (DeviceId, ExchangeOutcome) {
    let device_id = device.device_id.clone();

    let permit = tokio::select! {
        biased;
        () = token.cancelled() => return (device_id, ExchangeOutcome::Cancelled),
        permit = permits.acquire_owned() => permit,
    };
    let Ok(_permit) = permit else {
        return (
            device_id,
            ExchangeOutcome::Failed("exchange pool closed".to_string()),
        );
    };

    tracing::debug!("Exchanging {} changes with {}", outgoing.len(), device_id);
    let outcome = tokio::select! {
        biased;
        () = token.cancelled() => ExchangeOutcome::Cancelled,
        result = tokio::time::timeout(deadline, transport.exchange(&device, outgoing)) => {
            match result {
                Ok(Ok(incoming)) => ExchangeOutcome::Received(incoming),
                Ok(Err(error)) => ExchangeOutcome::Failed(error.to_string()),
                Err(_) => ExchangeOutcome::Failed(format!(
                    "exchange timed out after {}s",
                    deadline.as_secs_f64()
                )),
            }
        }
    };
    (device_id, outcome)
}

/// Resolves once the network drops. Never resolves if the monitor goes away.
pub(crate) async fn network_lost(status: &mut watch::Receiver<NetworkStatus>) {
    let lost = status
        .wait_for(|status| status.aborts_in_flight())
        .await
        .is_ok();
    if !lost {
        std::future::pending::<()>().await;
    }
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every reachable device was attempted
    Completed,
    /// Paused; only finished exchanges were committed
    Paused,
}

/// Summary of a committed cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcome: CycleOutcome,
    /// Unix ms
    pub started_at: i64,
    /// Unix ms
    pub finished_at: i64,
    /// Reachable devices when the cycle started
    pub reachable_devices: usize,
    pub synced_devices: Vec<DeviceId>,
    /// Device and failure reason
    pub failed_devices: Vec<(DeviceId, String)>,
    /// Local changes acknowledged by this cycle
    pub acknowledged_changes: usize,
    /// Remote changes and resolutions applied to storage
    pub applied_changes: usize,
    /// Remote changes storage rejected; offered again by the peer next cycle
    pub failed_applies: usize,
    pub detected_conflicts: usize,
    pub auto_resolved_conflicts: usize,
    pub progress: f64,
}

impl SyncReport {
    pub(crate) const fn new(started_at: i64, reachable_devices: usize) -> Self {
        Self {
            outcome: CycleOutcome::Completed,
            started_at,
            finished_at: started_at,
            reachable_devices,
            synced_devices: Vec::new(),
            failed_devices: Vec::new(),
            acknowledged_changes: 0,
            applied_changes: 0,
            failed_applies: 0,
            detected_conflicts: 0,
            auto_resolved_conflicts: 0,
            progress: 0.0,
        }
    }

    /// Attempted devices over reachable devices; 1.0 when nothing was reachable
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn progress_of(attempted: usize, reachable: usize) -> f64 {
        if reachable == 0 {
            1.0
        } else {
            (attempted as f64 / reachable as f64).min(1.0)
        }
    }
}
