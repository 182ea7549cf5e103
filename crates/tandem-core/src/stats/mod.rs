//! Read-only aggregation for status displays.

use serde::{Deserialize, Serialize};

use crate::changelog::ChangeLog;
use crate::coordinator::SyncState;
use crate::models::{ConnectedDevice, SyncConflict, SyncStatistics};
use crate::network::NetworkStatus;
use crate::registry::DeviceRegistry;
use crate::resolver::ConflictStore;

/// Recompute statistics from the stores. Nothing here is cached.
pub fn collect_statistics(
    change_log: &ChangeLog,
    conflicts: &ConflictStore,
    registry: &DeviceRegistry,
    sync_progress: f64,
) -> SyncStatistics {
    SyncStatistics {
        total_changes: change_log.total_changes(),
        pending_changes: change_log.pending_count(),
        total_conflicts: conflicts.total_count(),
        pending_conflicts: conflicts.open_count(),
        connected_devices: registry.online_count(),
        sync_progress: sync_progress.clamp(0.0, 1.0),
    }
}

/// Everything a status screen shows, read in one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub state: SyncState,
    pub network: NetworkStatus,
    pub statistics: SyncStatistics,
    pub open_conflicts: Vec<SyncConflict>,
    pub devices: Vec<ConnectedDevice>,
    /// Finish time of the last committed cycle (Unix ms)
    pub last_sync_at: Option<i64>,
}

impl SyncSnapshot {
    /// One-line status summary
    #[must_use]
    pub fn headline(&self) -> String {
        let stats = &self.statistics;
        format!(
            "{} on {}: {} pending, {} open conflicts, {} devices online ({:.0}%)",
            self.state.as_str(),
            self.network.as_str(),
            stats.pending_changes,
            stats.pending_conflicts,
            stats.connected_devices,
            stats.sync_progress * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::models::{ChangeOperation, ConflictType, DeviceId, DeviceType, SyncChange};
    use pretty_assertions::assert_eq;

    #[test]
    fn statistics_follow_the_stores() {
        let log = ChangeLog::new(&SyncConfig::default());
        let conflicts = ConflictStore::new();
        let registry = DeviceRegistry::new();

        let local = SyncChange::new(
            "workout",
            "w1",
            ChangeOperation::Update,
            DeviceId::new("phone"),
            "a",
        );
        let remote = SyncChange {
            device_id: DeviceId::new("watch"),
            id: crate::models::ChangeId::new(),
            ..local.clone()
        };
        log.record(local.clone()).unwrap();
        log.record(SyncChange {
            id: crate::models::ChangeId::new(),
            ..local.clone()
        })
        .unwrap();
        log.acknowledge(&local.id).unwrap();
        conflicts
            .insert(SyncConflict::new(ConflictType::ConcurrentUpdate, local, remote))
            .unwrap();
        registry.upsert(ConnectedDevice::new("watch", "Watch", DeviceType::Watch, 1));
        registry.upsert(ConnectedDevice::new("desk", "Desk", DeviceType::Desktop, 1).offline());

        let stats = collect_statistics(&log, &conflicts, &registry, 1.5);
        assert_eq!(
            stats,
            SyncStatistics {
                total_changes: 2,
                pending_changes: 1,
                total_conflicts: 1,
                pending_conflicts: 1,
                connected_devices: 1,
                sync_progress: 1.0,
            }
        );
    }

    #[test]
    fn headline_reads_naturally() {
        let snapshot = SyncSnapshot {
            state: SyncState::Idle,
            network: NetworkStatus::WiFi,
            statistics: SyncStatistics {
                pending_changes: 3,
                connected_devices: 2,
                sync_progress: 0.5,
                ..SyncStatistics::default()
            },
            open_conflicts: Vec::new(),
            devices: Vec::new(),
            last_sync_at: None,
        };
        assert_eq!(
            snapshot.headline(),
            "idle on wifi: 3 pending, 0 open conflicts, 2 devices online (50%)"
        );
    }
}
