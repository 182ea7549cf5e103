//! Conflict detection between local and remote change sets.
//!
//! Detection is a pure function of its inputs: both sides are sorted into the
//! cross-device total order first, so the output does not depend on arrival
//! order and re-running it yields the same conflict ids.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::models::{
    ChangeId, ChangeOperation, ConflictType, DeviceId, EntityKey, SyncChange, SyncConflict,
};

/// Storage-provided check that two payloads for one entity have compatible shapes
pub type SchemaCheck = Arc<dyn Fn(&SyncChange, &SyncChange) -> bool + Send + Sync>;

/// Result of comparing a local and a remote change set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionOutcome {
    /// One conflict per contested entity, ordered by entity key
    pub conflicts: Vec<SyncConflict>,
    /// Remote changes safe to apply, in total order
    pub clean_remote: Vec<SyncChange>,
    /// Remote changes older than the local head of their entity, or behind
    /// the remote head of a conflict
    pub superseded: Vec<SyncChange>,
}

#[derive(Clone, Default)]
pub struct ConflictDetector {
    local_device: Option<DeviceId>,
    schema_check: Option<SchemaCheck>,
    concurrency_window_ms: Option<i64>,
}

impl fmt::Debug for ConflictDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictDetector")
            .field("local_device", &self.local_device)
            .field("schema_check", &self.schema_check.is_some())
            .field("concurrency_window_ms", &self.concurrency_window_ms)
            .finish()
    }
}

impl ConflictDetector {
    /// Detector for the given local device; remote echoes of its own changes are dropped
    #[must_use]
    pub fn new(local_device: DeviceId) -> Self {
        Self {
            local_device: Some(local_device),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_schema_check(mut self, check: SchemaCheck) -> Self {
        self.schema_check = Some(check);
        self
    }

    /// Pairs further apart than `window_ms` are treated as sequential edits
    #[must_use]
    pub const fn with_concurrency_window(mut self, window_ms: Option<i64>) -> Self {
        self.concurrency_window_ms = window_ms;
        self
    }

    /// Conflicts between `local` and `remote`
    pub fn detect(&self, local: &[SyncChange], remote: &[SyncChange]) -> Vec<SyncConflict> {
        self.analyze(local, remote).conflicts
    }

    /// Conflicts plus the remote changes that can be applied as-is
    pub fn analyze(&self, local: &[SyncChange], remote: &[SyncChange]) -> DetectionOutcome {
        let local_ids = local.iter().map(|change| change.id).collect::<HashSet<ChangeId>>();
        let mut seen_remote = HashSet::new();

        let mut groups: BTreeMap<EntityKey, (Vec<&SyncChange>, Vec<&SyncChange>)> =
            BTreeMap::new();
        for change in local {
            groups.entry(change.entity_key()).or_default().0.push(change);
        }
        for change in remote {
            if local_ids.contains(&change.id) || !seen_remote.insert(change.id) {
                continue;
            }
            if self.local_device.as_ref() == Some(&change.device_id) {
                continue;
            }
            groups.entry(change.entity_key()).or_default().1.push(change);
        }

        let mut outcome = DetectionOutcome::default();
        for (mut local_side, mut remote_side) in groups.into_values() {
            local_side.sort_by(|a, b| a.cmp_total_order(b));
            remote_side.sort_by(|a, b| a.cmp_total_order(b));

            let (Some(local_head), Some(remote_head)) = (local_side.last(), remote_side.last())
            else {
                outcome
                    .clean_remote
                    .extend(remote_side.into_iter().cloned());
                continue;
            };

            if let Some(conflict_type) = self.classify(local_head, remote_head) {
                tracing::debug!(
                    "Detected {} on {}",
                    conflict_type,
                    local_head.entity_key()
                );
                outcome.conflicts.push(SyncConflict::new(
                    conflict_type,
                    (*local_head).clone(),
                    (*remote_head).clone(),
                ));
                // The conflict stands for the peer's earlier edits too
                let earlier = remote_side.len() - 1;
                outcome
                    .superseded
                    .extend(remote_side.into_iter().take(earlier).cloned());
                continue;
            }

            for change in remote_side {
                if change.cmp_total_order(local_head).is_gt() {
                    outcome.clean_remote.push(change.clone());
                } else {
                    outcome.superseded.push(change.clone());
                }
            }
        }

        outcome.clean_remote.sort_by(SyncChange::cmp_total_order);
        outcome.superseded.sort_by(SyncChange::cmp_total_order);
        outcome
    }

    /// Classify the latest local and remote change of one entity
    fn classify(&self, local: &SyncChange, remote: &SyncChange) -> Option<ConflictType> {
        use ChangeOperation::{Create, Delete, Merge, Update};

        if local.device_id == remote.device_id {
            return None;
        }
        if let Some(window) = self.concurrency_window_ms {
            if local.timestamp.abs_diff(remote.timestamp) > window.unsigned_abs() {
                return None;
            }
        }
        if local.operation == remote.operation && local.payload == remote.payload {
            return None;
        }
        if local.operation.writes_content() && remote.operation.writes_content() {
            if let Some(check) = &self.schema_check {
                if !check(local, remote) {
                    return Some(ConflictType::SchemaMismatch);
                }
            }
        }

        match (local.operation, remote.operation) {
            (Delete, Delete) => None,
            (Delete, _) | (_, Delete) => Some(ConflictType::UpdateDeleteRace),
            (Create, Create) => Some(ConflictType::DuplicateCreate),
            (Create | Update | Merge, Create | Update | Merge) => {
                Some(ConflictType::ConcurrentUpdate)
            }
        }
    }
}
