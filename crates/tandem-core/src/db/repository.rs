//! Change and conflict repositories

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite stores u64 as i64

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::changelog::ChangeEntry;
use crate::error::{Error, Result};
use crate::models::{
    ChangeId, ChangeOperation, ChangePriority, DeviceId, SyncChange, SyncConflict,
};

const TOTAL_CHANGES_KEY: &str = "total_changes";

/// Trait for change log persistence
pub trait ChangeRepository {
    /// Persist a newly recorded change and bump the lifetime counter
    fn insert(&self, entry: &ChangeEntry) -> Result<()>;

    /// Stamp a change as acknowledged
    fn mark_acknowledged(&self, id: &ChangeId, acknowledged_at: i64) -> Result<()>;

    /// Remove acknowledged changes older than the cutoff, returning how many went
    fn delete_acknowledged_before(&self, cutoff: i64) -> Result<usize>;

    /// All retained changes in sequence order
    fn list(&self) -> Result<Vec<ChangeEntry>>;

    /// Number of changes ever recorded, including pruned ones
    fn total_recorded(&self) -> Result<u64>;
}

/// Trait for conflict history persistence
pub trait ConflictRepository {
    /// Insert or replace a conflict record
    fn upsert(&self, conflict: &SyncConflict) -> Result<()>;

    /// All conflicts, oldest first
    fn list(&self) -> Result<Vec<SyncConflict>>;
}

/// Trait for remembering remote changes this device already handled
pub trait SeenChangeRepository {
    /// Remember `ids`; ids already stored keep their first `seen_at`
    fn insert_many(&self, ids: &[ChangeId], seen_at: i64) -> Result<()>;

    /// Forget ids first seen before the cutoff, returning how many went
    fn delete_before(&self, cutoff: i64) -> Result<usize>;

    /// Every remembered id with the time it was first seen
    fn list(&self) -> Result<Vec<(ChangeId, i64)>>;
}

/// `SQLite` implementation of `ChangeRepository`
pub struct SqliteChangeRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteChangeRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a change entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeEntry> {
        let id: String = row.get(1)?;
        let operation: String = row.get(4)?;
        let priority: String = row.get(7)?;
        let sequence: i64 = row.get(0)?;

        Ok(ChangeEntry {
            sequence: sequence as u64,
            change: SyncChange {
                id: id
                    .parse::<ChangeId>()
                    .map_err(|error| conversion_error(1, error))?,
                entity_type: row.get(2)?,
                entity_id: row.get(3)?,
                operation: operation
                    .parse::<ChangeOperation>()
                    .map_err(|error: String| conversion_error(4, error))?,
                device_id: DeviceId::new(row.get::<_, String>(5)?),
                timestamp: row.get(6)?,
                priority: priority
                    .parse::<ChangePriority>()
                    .map_err(|error: String| conversion_error(7, error))?,
                payload: row.get::<_, Vec<u8>>(8)?.into(),
            },
            recorded_at: row.get(9)?,
            acknowledged_at: row.get(10)?,
        })
    }
}

fn conversion_error(
    column: usize,
    error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, error.into())
}

impl ChangeRepository for SqliteChangeRepository<'_> {
    fn insert(&self, entry: &ChangeEntry) -> Result<()> {
        let change = &entry.change;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO changes (sequence, id, entity_type, entity_id, operation, device_id, timestamp, priority, payload, recorded_at, acknowledged_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.sequence as i64,
                change.id.as_str(),
                change.entity_type,
                change.entity_id,
                change.operation.as_str(),
                change.device_id.as_str(),
                change.timestamp,
                change.priority.as_str(),
                change.payload.as_bytes(),
                entry.recorded_at,
                entry.acknowledged_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?, 1)
             ON CONFLICT(key) DO UPDATE SET value = value + 1",
            params![TOTAL_CHANGES_KEY],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn mark_acknowledged(&self, id: &ChangeId, acknowledged_at: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE changes SET acknowledged_at = ? WHERE id = ? AND acknowledged_at IS NULL",
            params![acknowledged_at, id.as_str()],
        )?;
        Ok(())
    }

    fn delete_acknowledged_before(&self, cutoff: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM changes WHERE acknowledged_at IS NOT NULL AND acknowledged_at < ?",
            params![cutoff],
        )?;
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<ChangeEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT sequence, id, entity_type, entity_id, operation, device_id, timestamp, priority, payload, recorded_at, acknowledged_at
             FROM changes ORDER BY sequence ASC",
        )?;
        let entries = stmt
            .query_map([], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn total_recorded(&self) -> Result<u64> {
        let total: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?",
                params![TOTAL_CHANGES_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(total.unwrap_or(0) as u64)
    }
}

/// `SQLite` implementation of `ConflictRepository`
///
/// Conflicts are stored as JSON bodies; the indexed columns exist for ad-hoc queries.
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn upsert(&self, conflict: &SyncConflict) -> Result<()> {
        let body = serde_json::to_string(conflict)?;
        self.conn.execute(
            "INSERT INTO conflicts (id, entity_type, entity_id, conflict_type, is_resolved, detected_at, body)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET is_resolved = excluded.is_resolved, body = excluded.body",
            params![
                conflict.id.as_str(),
                conflict.entity_type,
                conflict.entity_id,
                conflict.conflict_type.as_str(),
                i32::from(conflict.is_resolved),
                conflict.timestamp,
                body,
            ],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<SyncConflict>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM conflicts ORDER BY detected_at ASC, id ASC")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        bodies
            .iter()
            .map(|body| serde_json::from_str::<SyncConflict>(body).map_err(Error::from))
            .collect()
    }
}

/// `SQLite` implementation of `SeenChangeRepository`
pub struct SqliteSeenChangeRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSeenChangeRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SeenChangeRepository for SqliteSeenChangeRepository<'_> {
    fn insert_many(&self, ids: &[ChangeId], seen_at: i64) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO seen_remote (change_id, seen_at) VALUES (?, ?)")?;
            for id in ids {
                stmt.execute(params![id.as_str(), seen_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_before(&self, cutoff: i64) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM seen_remote WHERE seen_at < ?", params![cutoff])?;
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<(ChangeId, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT change_id, seen_at FROM seen_remote ORDER BY seen_at ASC")?;
        let seen = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let seen_at: i64 = row.get(1)?;
                let id = id
                    .parse::<ChangeId>()
                    .map_err(|error| conversion_error(0, error))?;
                Ok((id, seen_at))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(seen)
    }
}
