//! Data models for Tandem

mod change;
mod conflict;
mod device;
mod stats;

pub use change::{ChangeId, ChangeOperation, ChangePriority, EntityKey, Payload, SyncChange};
pub use conflict::{ConflictId, ConflictResolution, ConflictType, SyncConflict};
pub use device::{ConnectedDevice, DeviceId, DeviceSyncStatus, DeviceType, LocalDevice};
pub use stats::SyncStatistics;
