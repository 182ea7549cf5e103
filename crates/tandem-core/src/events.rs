//! Engine events for UIs and diagnostics.

use serde::{Deserialize, Serialize};

use crate::coordinator::{SyncReport, SyncState};
use crate::models::{ConflictId, ConflictResolution, DeviceId, SyncConflict};

/// Broadcast by the engine; slow subscribers may miss events but can always
/// re-read state through the engine accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    StatusChanged {
        state: SyncState,
    },
    ProgressUpdated {
        progress: f64,
    },
    DeviceSynced {
        device_id: DeviceId,
        received: usize,
    },
    DeviceFailed {
        device_id: DeviceId,
        reason: String,
    },
    ConflictDetected {
        conflict: SyncConflict,
    },
    ConflictResolved {
        conflict_id: ConflictId,
        resolution: ConflictResolution,
    },
    CycleCompleted {
        report: SyncReport,
    },
    /// A cycle ended with an error before acknowledging its outgoing changes.
    /// A network loss commits nothing; a journal failure keeps what was
    /// committed before it.
    CycleAborted {
        reason: String,
    },
}
