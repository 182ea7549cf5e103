//! Remote changes this device has already handled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::SyncConfig;
use crate::db::{Database, SeenChangeRepository, SqliteSeenChangeRepository};
use crate::error::Result;
use crate::models::ChangeId;
use crate::util::duration_to_ms;

/// Ids of remote changes that were applied, superseded or tied to a conflict.
///
/// Peers keep offering a change until they learn it arrived, so every incoming
/// change is checked here before detection. Entries expire with the retention
/// window, like acknowledged changes in the log.
#[derive(Debug)]
pub struct SeenRemote {
    seen: RwLock<HashMap<ChangeId, i64>>,
    journal: Option<Arc<Database>>,
    retention_window: Duration,
}

impl SeenRemote {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            seen: RwLock::default(),
            journal: None,
            retention_window: config.retention_window(),
        }
    }

    /// Journaled set, reloading what the journal retained
    pub fn open(config: &SyncConfig, journal: Arc<Database>) -> Result<Self> {
        let seen =
            journal.with_connection(|conn| SqliteSeenChangeRepository::new(conn).list())?;
        tracing::debug!("Loaded {} seen remote changes", seen.len());

        Ok(Self {
            seen: RwLock::new(seen.into_iter().collect()),
            journal: Some(journal),
            retention_window: config.retention_window(),
        })
    }

    pub fn contains(&self, id: &ChangeId) -> bool {
        self.seen.read().contains_key(id)
    }

    /// Remember `ids` as handled at `now`. Known ids keep their first sighting.
    pub fn mark(&self, ids: &[ChangeId], now: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut seen = self.seen.write();
        if let Some(journal) = &self.journal {
            journal.with_connection(|conn| {
                SqliteSeenChangeRepository::new(conn).insert_many(ids, now)
            })?;
        }
        for id in ids {
            seen.entry(*id).or_insert(now);
        }
        Ok(())
    }

    /// Forget ids seen before the retention window
    pub fn prune_expired(&self, now: i64) -> Result<usize> {
        let cutoff = now.saturating_sub(duration_to_ms(self.retention_window));
        let mut seen = self.seen.write();

        if let Some(journal) = &self.journal {
            journal
                .with_connection(|conn| SqliteSeenChangeRepository::new(conn).delete_before(cutoff))?;
        }

        let before = seen.len();
        seen.retain(|_, seen_at| *seen_at >= cutoff);
        let removed = before - seen.len();
        if removed > 0 {
            tracing::debug!("Forgot {} seen remote changes", removed);
        }
        Ok(removed)
    }
}
