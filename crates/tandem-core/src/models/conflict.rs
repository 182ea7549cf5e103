//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ChangeId, EntityKey, SyncChange};

/// Namespace for deterministic conflict ids.
const CONFLICT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_7d2e_94a3_4b8e_b7d1_2c5e_8a90_3f41);

/// Identifier of a conflict, derived from the two changes involved.
///
/// Detecting the same pair twice yields the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn derive(local: &ChangeId, remote: &ChangeId) -> Self {
        let mut name = Vec::with_capacity(32);
        name.extend_from_slice(local.as_uuid().as_bytes());
        name.extend_from_slice(remote.as_uuid().as_bytes());
        Self(Uuid::new_v5(&CONFLICT_NAMESPACE, &name))
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }

    pub(crate) const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Classification of an overlap between two changes to the same entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ConcurrentUpdate,
    UpdateDeleteRace,
    DuplicateCreate,
    SchemaMismatch,
}

impl ConflictType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConcurrentUpdate => "concurrent_update",
            Self::UpdateDeleteRace => "update_delete_race",
            Self::DuplicateCreate => "duplicate_create",
            Self::SchemaMismatch => "schema_mismatch",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy applied to a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    UseLocal,
    UseRemote,
    Merge,
    /// Defer to an external actor
    Manual,
}

impl ConflictResolution {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UseLocal => "use_local",
            Self::UseRemote => "use_remote",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "use_local" | "local" => Ok(Self::UseLocal),
            "use_remote" | "remote" => Ok(Self::UseRemote),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown conflict resolution '{other}'")),
        }
    }
}

/// Two incompatible changes to the same entity from different devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: ConflictId,
    pub entity_type: String,
    pub entity_id: String,
    pub conflict_type: ConflictType,
    pub local_change: SyncChange,
    pub remote_change: SyncChange,
    /// Latest timestamp of the two changes (Unix ms)
    pub timestamp: i64,
    pub is_resolved: bool,
    /// Policy ultimately applied
    pub resolution: Option<ConflictResolution>,
    /// Winning change, kept with the superseded one for audit
    pub accepted_change: Option<SyncChange>,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
}

impl SyncConflict {
    #[must_use]
    pub fn new(conflict_type: ConflictType, local: SyncChange, remote: SyncChange) -> Self {
        Self {
            id: ConflictId::derive(&local.id, &remote.id),
            entity_type: local.entity_type.clone(),
            entity_id: local.entity_id.clone(),
            conflict_type,
            timestamp: local.timestamp.max(remote.timestamp),
            local_change: local,
            remote_change: remote,
            is_resolved: false,
            resolution: None,
            accepted_change: None,
            resolved_at: None,
        }
    }

    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        EntityKey {
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
        }
    }
}
