//! Entity storage collaborator.
//!
//! The engine never owns health records; it hands accepted changes to a
//! [`SyncStorage`] implementation supplied by the host application.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::{ChangeId, ChangeOperation, EntityKey, Payload, SyncChange};

/// Host-side entity store
#[async_trait]
pub trait SyncStorage: Send + Sync {
    /// Apply an accepted change. Must be idempotent on `change.id`.
    async fn apply_change(&self, change: &SyncChange) -> Result<()>;

    /// Whether two payloads for the same entity have compatible shapes
    fn validate_schema(&self, _local: &SyncChange, _remote: &SyncChange) -> bool {
        true
    }

    /// Entity-specific merge, if the store knows one
    fn merge(&self, _local: &SyncChange, _remote: &SyncChange) -> Option<Payload> {
        None
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<EntityKey, Payload>,
    applied: Vec<SyncChange>,
    seen: HashSet<ChangeId>,
    fail_next: Option<String>,
}

/// In-memory store used by tests and the CLI simulator.
///
/// Keeps the latest payload per entity and the list of applied changes.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current payload of an entity, `None` when absent or deleted
    pub fn record(&self, entity_type: &str, entity_id: &str) -> Option<Payload> {
        let key = EntityKey {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
        };
        self.state.lock().records.get(&key).cloned()
    }

    /// Changes applied so far, in application order
    pub fn applied(&self) -> Vec<SyncChange> {
        self.state.lock().applied.clone()
    }

    /// Make the next `apply_change` fail with the given message
    pub fn fail_next_apply(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }
}

#[async_trait]
impl SyncStorage for MemoryStorage {
    async fn apply_change(&self, change: &SyncChange) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(Error::Storage(message));
        }
        if !state.seen.insert(change.id) {
            return Ok(());
        }

        let key = change.entity_key();
        if change.operation == ChangeOperation::Delete {
            state.records.remove(&key);
        } else {
            state.records.insert(key, change.payload.clone());
        }
        state.applied.push(change.clone());
        Ok(())
    }

    fn validate_schema(&self, local: &SyncChange, remote: &SyncChange) -> bool {
        json_shape(&local.payload) == json_shape(&remote.payload)
    }
}

/// Top-level JSON kind of a payload, `None` when it is not JSON
fn json_shape(payload: &Payload) -> Option<&'static str> {
    let value = serde_json::from_slice::<serde_json::Value>(payload.as_bytes()).ok()?;
    Some(match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    })
}
