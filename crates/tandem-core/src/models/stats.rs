//! Derived sync statistics

use serde::{Deserialize, Serialize};

/// Counts exposed to observers. Recomputed on every read, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatistics {
    /// Changes ever recorded locally
    pub total_changes: u64,
    /// Local changes not yet acknowledged by any peer
    pub pending_changes: usize,
    /// Conflicts ever detected (open and archived)
    pub total_conflicts: usize,
    /// Conflicts waiting for a resolution
    pub pending_conflicts: usize,
    /// Devices currently online
    pub connected_devices: usize,
    /// Progress of the current or last cycle, 0.0..=1.0
    pub sync_progress: f64,
}
