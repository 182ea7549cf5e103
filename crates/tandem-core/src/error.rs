//! Error types for tandem-core

use thiserror::Error;

use crate::models::{ChangeId, ConflictId, ConflictResolution, DeviceId};
use crate::network::NetworkStatus;

/// Result type alias using tandem-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tandem-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed change, rejected before it enters the change log
    #[error("Invalid change: {0}")]
    InvalidChange(String),

    /// No merge function is registered for the entity type
    #[error("No merge function registered for entity type '{entity_type}'")]
    UnmergeableConflict { entity_type: String },

    /// The conflict was already resolved with a different resolution
    #[error("Conflict {conflict_id} was already resolved with {existing:?}")]
    AlreadyResolved {
        conflict_id: ConflictId,
        existing: ConflictResolution,
    },

    /// A per-device exchange failed; retried on the next cycle
    #[error("Device {device_id} unreachable: {reason}")]
    DeviceUnreachable { device_id: DeviceId, reason: String },

    /// The network gate is closed
    #[error("Network unavailable ({0:?})")]
    NetworkUnavailable(NetworkStatus),

    /// Conflict not found
    #[error("Conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    /// Change not found
    #[error("Change not found: {0}")]
    ChangeNotFound(ChangeId),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// Device still has changes waiting to be exchanged
    #[error("Device {0} cannot be removed while changes are pending")]
    DeviceHasPendingChanges(DeviceId),

    /// Device is party to a conflict that is still open
    #[error("Device {0} cannot be removed while it has open conflicts")]
    DeviceHasOpenConflicts(DeviceId),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Storage collaborator failed to apply a change
    #[error("Storage error: {0}")]
    Storage(String),

    /// `SQLite` journal error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error is recovered by retrying on the next sync cycle.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnreachable { .. } | Self::NetworkUnavailable(_) | Self::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_failures_are_retryable() {
        let error = Error::DeviceUnreachable {
            device_id: DeviceId::new("watch"),
            reason: "timed out".to_string(),
        };
        assert!(error.is_retryable());
        assert!(error.to_string().contains("watch"));
    }

    #[test]
    fn validation_failures_are_not_retryable() {
        assert!(!Error::InvalidChange("empty entity id".to_string()).is_retryable());
        assert!(!Error::UnmergeableConflict {
            entity_type: "workout".to_string()
        }
        .is_retryable());
    }
}
