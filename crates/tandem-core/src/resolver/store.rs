//! Open and archived conflicts.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::db::{ConflictRepository, Database, SqliteConflictRepository};
use crate::error::{Error, Result};
use crate::models::{ChangeId, ConflictId, DeviceId, SyncConflict};

#[derive(Debug, Default)]
struct StoreState {
    open: BTreeMap<ConflictId, SyncConflict>,
    archived: BTreeMap<ConflictId, SyncConflict>,
}

/// Conflict history. Resolved conflicts move to the archive and never reopen.
#[derive(Debug, Default)]
pub struct ConflictStore {
    state: RwLock<StoreState>,
    journal: Option<Arc<Database>>,
}

impl ConflictStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Journaled store, reloading the conflict history
    pub fn open(journal: Arc<Database>) -> Result<Self> {
        let conflicts =
            journal.with_connection(|conn| SqliteConflictRepository::new(conn).list())?;

        let mut state = StoreState::default();
        for conflict in conflicts {
            if conflict.is_resolved {
                state.archived.insert(conflict.id, conflict);
            } else {
                state.open.insert(conflict.id, conflict);
            }
        }
        tracing::debug!(
            "Loaded {} open and {} archived conflicts",
            state.open.len(),
            state.archived.len()
        );

        Ok(Self {
            state: RwLock::new(state),
            journal: Some(journal),
        })
    }

    /// Add a newly detected conflict. Returns `false` when the id is already known.
    pub fn insert(&self, conflict: SyncConflict) -> Result<bool> {
        let mut state = self.state.write();
        if state.open.contains_key(&conflict.id) || state.archived.contains_key(&conflict.id) {
            return Ok(false);
        }
        self.persist(&conflict)?;
        state.open.insert(conflict.id, conflict);
        Ok(true)
    }

    /// Run `f` against a conflict under the store lock and persist the result.
    ///
    /// A conflict that `f` leaves resolved is archived. Nothing is written when
    /// `f` fails.
    pub fn update<T>(
        &self,
        id: &ConflictId,
        f: impl FnOnce(&mut SyncConflict) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.write();
        let mut conflict = state
            .open
            .get(id)
            .or_else(|| state.archived.get(id))
            .cloned()
            .ok_or(Error::ConflictNotFound(*id))?;
        let was_resolved = conflict.is_resolved;

        let output = f(&mut conflict)?;

        if conflict.is_resolved && !was_resolved {
            self.persist(&conflict)?;
            state.open.remove(id);
            state.archived.insert(*id, conflict);
        }
        Ok(output)
    }

    fn persist(&self, conflict: &SyncConflict) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.with_connection(|conn| SqliteConflictRepository::new(conn).upsert(conflict))?;
        }
        Ok(())
    }

    pub fn get(&self, id: &ConflictId) -> Option<SyncConflict> {
        let state = self.state.read();
        state
            .open
            .get(id)
            .or_else(|| state.archived.get(id))
            .cloned()
    }

    /// Ids of every change a recorded conflict holds, open or archived
    pub fn referenced_changes(&self) -> HashSet<ChangeId> {
        let state = self.state.read();
        state
            .open
            .values()
            .chain(state.archived.values())
            .flat_map(|conflict| [conflict.local_change.id, conflict.remote_change.id])
            .collect()
    }

    /// Whether an unresolved conflict involves a change from `device_id`
    pub fn has_open_with(&self, device_id: &DeviceId) -> bool {
        self.state.read().open.values().any(|conflict| {
            conflict.remote_change.device_id == *device_id
                || conflict.local_change.device_id == *device_id
        })
    }

    /// Unresolved conflicts, oldest first
    pub fn open_conflicts(&self) -> Vec<SyncConflict> {
        let mut conflicts = self.state.read().open.values().cloned().collect::<Vec<_>>();
        sort_by_detection(&mut conflicts);
        conflicts
    }

    /// Resolved conflicts, oldest first
    pub fn archived(&self) -> Vec<SyncConflict> {
        let mut conflicts = self
            .state
            .read()
            .archived
            .values()
            .cloned()
            .collect::<Vec<_>>();
        sort_by_detection(&mut conflicts);
        conflicts
    }

    /// Full history, open and archived, oldest first
    pub fn all(&self) -> Vec<SyncConflict> {
        let state = self.state.read();
        let mut conflicts = state
            .open
            .values()
            .chain(state.archived.values())
            .cloned()
            .collect::<Vec<_>>();
        sort_by_detection(&mut conflicts);
        conflicts
    }

    pub fn open_count(&self) -> usize {
        self.state.read().open.len()
    }

    pub fn total_count(&self) -> usize {
        let state = self.state.read();
        state.open.len() + state.archived.len()
    }
}

fn sort_by_detection(conflicts: &mut [SyncConflict]) {
    conflicts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
}
