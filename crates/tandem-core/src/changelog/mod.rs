//! Append-only log of local mutations awaiting propagation.

mod seen;

pub use seen::SeenRemote;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::db::{ChangeRepository, Database, SqliteChangeRepository};
use crate::error::{Error, Result};
use crate::models::{ChangeId, SyncChange};
use crate::util::{duration_to_ms, unix_timestamp_ms};

/// A change as held by the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Local sequence number, strictly increasing
    pub sequence: u64,
    pub change: SyncChange,
    /// When the change entered the log (Unix ms)
    pub recorded_at: i64,
    /// When a peer exchange first carried it (Unix ms)
    pub acknowledged_at: Option<i64>,
}

impl ChangeEntry {
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.acknowledged_at.is_none()
    }
}

#[derive(Debug, Default)]
struct LogState {
    entries: BTreeMap<u64, ChangeEntry>,
    by_id: HashMap<ChangeId, u64>,
    next_sequence: u64,
    total_changes: u64,
}

/// Change log with an optional `SQLite` journal.
///
/// Every mutating call takes the write lock for its whole duration, journal
/// write included, so the in-memory view never runs ahead of the journal.
#[derive(Debug)]
pub struct ChangeLog {
    state: RwLock<LogState>,
    journal: Option<Arc<Database>>,
    clock_skew_tolerance_ms: i64,
    retention_window: Duration,
}

impl ChangeLog {
    /// In-memory log using the config's skew tolerance and retention window
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            state: RwLock::new(LogState {
                next_sequence: 1,
                ..LogState::default()
            }),
            journal: None,
            clock_skew_tolerance_ms: config.clock_skew_tolerance_ms,
            retention_window: config.retention_window(),
        }
    }

    /// Journaled log, reloading whatever the journal retained
    pub fn open(config: &SyncConfig, journal: Arc<Database>) -> Result<Self> {
        let (entries, total_changes) = journal.with_connection(|conn| {
            let repo = SqliteChangeRepository::new(conn);
            Ok((repo.list()?, repo.total_recorded()?))
        })?;

        let mut state = LogState {
            next_sequence: entries.last().map_or(1, |entry| entry.sequence + 1),
            total_changes,
            ..LogState::default()
        };
        for entry in entries {
            state.by_id.insert(entry.change.id, entry.sequence);
            state.entries.insert(entry.sequence, entry);
        }
        tracing::debug!(
            "Loaded {} journaled changes ({} recorded overall)",
            state.entries.len(),
            state.total_changes
        );

        Ok(Self {
            state: RwLock::new(state),
            journal: Some(journal),
            clock_skew_tolerance_ms: config.clock_skew_tolerance_ms,
            retention_window: config.retention_window(),
        })
    }

    /// Append a change, returning its local sequence number
    pub fn record(&self, change: SyncChange) -> Result<u64> {
        self.record_at(change, unix_timestamp_ms())
    }

    /// Append a change as if the local clock read `now`
    pub fn record_at(&self, change: SyncChange, now: i64) -> Result<u64> {
        self.validate(&change, now)?;

        let mut state = self.state.write();
        if state.by_id.contains_key(&change.id) {
            return Err(Error::InvalidChange(format!(
                "change {} is already recorded",
                change.id
            )));
        }

        let entry = ChangeEntry {
            sequence: state.next_sequence,
            change,
            recorded_at: now,
            acknowledged_at: None,
        };
        if let Some(journal) = &self.journal {
            journal.with_connection(|conn| SqliteChangeRepository::new(conn).insert(&entry))?;
        }

        let sequence = entry.sequence;
        state.next_sequence += 1;
        state.total_changes += 1;
        state.by_id.insert(entry.change.id, sequence);
        state.entries.insert(sequence, entry);
        Ok(sequence)
    }

    /// Boundary checks applied before a change may enter the log
    pub fn validate(&self, change: &SyncChange, now: i64) -> Result<()> {
        if change.entity_type.trim().is_empty() {
            return Err(Error::InvalidChange("entity type must not be empty".into()));
        }
        if change.entity_id.trim().is_empty() {
            return Err(Error::InvalidChange("entity id must not be empty".into()));
        }
        if change.device_id.as_str().trim().is_empty() {
            return Err(Error::InvalidChange("device id must not be empty".into()));
        }
        if change.timestamp < 0 {
            return Err(Error::InvalidChange(format!(
                "timestamp {} is before the Unix epoch",
                change.timestamp
            )));
        }
        let latest_allowed = now.saturating_add(self.clock_skew_tolerance_ms);
        if change.timestamp > latest_allowed {
            return Err(Error::InvalidChange(format!(
                "timestamp {} is more than {}ms in the future",
                change.timestamp, self.clock_skew_tolerance_ms
            )));
        }
        Ok(())
    }

    /// Unacknowledged changes in ascending sequence order
    pub fn pending(&self) -> Vec<SyncChange> {
        self.state
            .read()
            .entries
            .values()
            .filter(|entry| entry.is_pending())
            .map(|entry| entry.change.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state
            .read()
            .entries
            .values()
            .filter(|entry| entry.is_pending())
            .count()
    }

    /// Pending changes in send order: most urgent first, then by sequence
    pub fn outgoing_batch(&self) -> Vec<SyncChange> {
        let state = self.state.read();
        let mut pending = state
            .entries
            .values()
            .filter(|entry| entry.is_pending())
            .collect::<Vec<_>>();
        pending.sort_by(|a, b| {
            b.change
                .priority
                .cmp(&a.change.priority)
                .then(a.sequence.cmp(&b.sequence))
        });
        pending.into_iter().map(|entry| entry.change.clone()).collect()
    }

    /// Mark a change as propagated. Returns `false` if it already was.
    pub fn acknowledge(&self, id: &ChangeId) -> Result<bool> {
        self.acknowledge_at(id, unix_timestamp_ms())
    }

    pub fn acknowledge_at(&self, id: &ChangeId, now: i64) -> Result<bool> {
        let mut state = self.state.write();
        let sequence = *state.by_id.get(id).ok_or(Error::ChangeNotFound(*id))?;
        let Some(entry) = state.entries.get_mut(&sequence) else {
            return Err(Error::ChangeNotFound(*id));
        };
        if !entry.is_pending() {
            return Ok(false);
        }

        if let Some(journal) = &self.journal {
            journal.with_connection(|conn| {
                SqliteChangeRepository::new(conn).mark_acknowledged(id, now)
            })?;
        }
        entry.acknowledged_at = Some(now);
        Ok(true)
    }

    /// Acknowledge every listed change that is still retained, returning how many flipped
    pub fn acknowledge_many(&self, ids: &[ChangeId], now: i64) -> Result<usize> {
        let mut acknowledged = 0;
        for id in ids {
            match self.acknowledge_at(id, now) {
                Ok(true) => acknowledged += 1,
                Ok(false) | Err(Error::ChangeNotFound(_)) => {}
                Err(error) => return Err(error),
            }
        }
        Ok(acknowledged)
    }

    /// Acknowledged changes still inside the retention window
    pub fn retained_acknowledged(&self) -> Vec<ChangeEntry> {
        self.state
            .read()
            .entries
            .values()
            .filter(|entry| !entry.is_pending())
            .cloned()
            .collect()
    }

    /// Drop acknowledged changes older than the retention window
    pub fn prune_expired(&self, now: i64) -> Result<usize> {
        let cutoff = now.saturating_sub(duration_to_ms(self.retention_window));
        let mut state = self.state.write();

        if let Some(journal) = &self.journal {
            journal.with_connection(|conn| {
                SqliteChangeRepository::new(conn).delete_acknowledged_before(cutoff)
            })?;
        }

        let expired = state
            .entries
            .values()
            .filter(|entry| entry.acknowledged_at.is_some_and(|at| at < cutoff))
            .map(|entry| (entry.sequence, entry.change.id))
            .collect::<Vec<_>>();
        for (sequence, id) in &expired {
            state.entries.remove(sequence);
            state.by_id.remove(id);
        }

        if !expired.is_empty() {
            tracing::debug!("Pruned {} acknowledged changes", expired.len());
        }
        Ok(expired.len())
    }

    pub fn get(&self, id: &ChangeId) -> Option<ChangeEntry> {
        let state = self.state.read();
        state
            .by_id
            .get(id)
            .and_then(|sequence| state.entries.get(sequence))
            .cloned()
    }

    /// Snapshot of every retained entry in sequence order
    pub fn entries(&self) -> Vec<ChangeEntry> {
        self.state.read().entries.values().cloned().collect()
    }

    /// Changes ever recorded, pruned ones included
    pub fn total_changes(&self) -> u64 {
        self.state.read().total_changes
    }
}
