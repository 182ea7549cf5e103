//! Conflict resolution policies.

mod store;

pub use store::ConflictStore;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    ChangeId, ChangeOperation, ConflictResolution, Payload, SyncChange, SyncConflict,
};
use crate::storage::SyncStorage;

/// Entity-specific merge: returns the merged payload, or `None` when the pair cannot be merged
pub type MergeFn = Arc<dyn Fn(&SyncChange, &SyncChange) -> Option<Payload> + Send + Sync>;

/// Applies resolutions to conflicts
#[derive(Default)]
pub struct ConflictResolver {
    merge_fns: RwLock<HashMap<String, MergeFn>>,
    storage: Option<Arc<dyn SyncStorage>>,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entity_types = self.merge_fns.read().keys().cloned().collect::<Vec<_>>();
        entity_types.sort();
        f.debug_struct("ConflictResolver")
            .field("merge_fns", &entity_types)
            .field("storage", &self.storage.is_some())
            .finish()
    }
}

impl ConflictResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that falls back to the storage collaborator's merge
    #[must_use]
    pub fn with_storage(storage: Arc<dyn SyncStorage>) -> Self {
        Self {
            merge_fns: RwLock::default(),
            storage: Some(storage),
        }
    }

    /// Register a merge function for an entity type, replacing any previous one
    pub fn register_merge(&self, entity_type: impl Into<String>, merge: MergeFn) {
        self.merge_fns.write().insert(entity_type.into(), merge);
    }

    /// Resolve a conflict, returning the change that should be applied.
    ///
    /// `Manual` leaves the conflict open and returns `None`. Resolving again
    /// with the same policy returns the stored outcome; a different policy
    /// fails with [`Error::AlreadyResolved`].
    pub fn resolve(
        &self,
        conflict: &mut SyncConflict,
        resolution: ConflictResolution,
        now: i64,
    ) -> Result<Option<SyncChange>> {
        if conflict.is_resolved {
            return match conflict.resolution {
                Some(existing) if existing == resolution => Ok(conflict.accepted_change.clone()),
                Some(existing) => Err(Error::AlreadyResolved {
                    conflict_id: conflict.id,
                    existing,
                }),
                None => Err(Error::InvalidChange(format!(
                    "conflict {} is resolved without a resolution",
                    conflict.id
                ))),
            };
        }

        let accepted = match resolution {
            ConflictResolution::Manual => {
                tracing::debug!("Conflict {} deferred for manual resolution", conflict.id);
                return Ok(None);
            }
            ConflictResolution::UseLocal => conflict.local_change.clone(),
            ConflictResolution::UseRemote => conflict.remote_change.clone(),
            ConflictResolution::Merge => self.merge(conflict)?,
        };

        conflict.is_resolved = true;
        conflict.resolution = Some(resolution);
        conflict.accepted_change = Some(accepted.clone());
        conflict.resolved_at = Some(now);
        tracing::info!(
            "Resolved {} on {} with {}",
            conflict.conflict_type,
            conflict.entity_key(),
            resolution
        );
        Ok(Some(accepted))
    }

    fn merge(&self, conflict: &SyncConflict) -> Result<SyncChange> {
        let local = &conflict.local_change;
        let remote = &conflict.remote_change;

        let registered = self.merge_fns.read().get(&conflict.entity_type).cloned();
        let payload = registered
            .and_then(|merge| merge(local, remote))
            .or_else(|| {
                self.storage
                    .as_ref()
                    .and_then(|storage| storage.merge(local, remote))
            })
            .ok_or_else(|| Error::UnmergeableConflict {
                entity_type: conflict.entity_type.clone(),
            })?;

        Ok(SyncChange {
            id: ChangeId::from_uuid(Uuid::new_v5(conflict.id.as_uuid(), b"merge")),
            entity_type: conflict.entity_type.clone(),
            entity_id: conflict.entity_id.clone(),
            operation: ChangeOperation::Merge,
            device_id: local.device_id.clone(),
            timestamp: local.timestamp.max(remote.timestamp),
            priority: local.priority.max(remote.priority),
            payload,
        })
    }
}
