//! tandem-core - Core library for Tandem
//!
//! Keeps health records consistent across a user's devices: a durable log of
//! local changes, a registry of peer devices, network gating, conflict
//! detection and resolution, and the coordinator that runs sync cycles.

pub mod changelog;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod detector;
pub mod error;
pub mod events;
pub mod export;
pub mod models;
pub mod network;
pub mod registry;
pub mod resolver;
pub mod stats;
pub mod storage;
pub mod transport;
pub mod util;

pub use changelog::{ChangeEntry, ChangeLog};
pub use config::SyncConfig;
pub use coordinator::{CycleOutcome, SyncEngine, SyncEngineBuilder, SyncReport, SyncState};
pub use error::{Error, Result};
pub use events::SyncEvent;
pub use models::{
    ChangeId, ChangeOperation, ChangePriority, ConflictId, ConflictResolution, ConflictType,
    ConnectedDevice, DeviceId, DeviceSyncStatus, DeviceType, LocalDevice, Payload, SyncChange,
    SyncConflict, SyncStatistics,
};
pub use network::{NetworkMonitor, NetworkStatus};
pub use storage::{MemoryStorage, SyncStorage};
pub use transport::{LoopbackTransport, PeerTransport};
