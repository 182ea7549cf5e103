use std::env;
use std::fmt::Display;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tandem_core::db::Database;
use tandem_core::{
    ChangeEntry, ChangeId, ChangeLog, ChangeOperation, ConflictId, DeviceType, LocalDevice,
    LoopbackTransport, MemoryStorage, SyncConfig, SyncConflict, SyncEngine,
};

use crate::error::CliError;

const DEFAULT_DEVICE_ID: &str = "cli";
const SHORT_ID_LEN: usize = 13;

/// Paths and identity shared by every command
#[derive(Debug, Clone)]
pub struct CliContext {
    pub db_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub device_id: String,
}

impl CliContext {
    /// Explicit config path, then `TANDEM_CONFIG`, then the default location if present
    pub fn load_config(&self) -> Result<SyncConfig, CliError> {
        let path = self
            .config_path
            .clone()
            .or_else(|| env::var_os("TANDEM_CONFIG").map(PathBuf::from))
            .or_else(|| default_config_path().filter(|path| path.exists()));

        match path {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                Ok(SyncConfig::load(path)?)
            }
            None => Ok(SyncConfig::default()),
        }
    }

    /// Engine over the on-disk journal. Storage and transport are in-memory;
    /// the CLI never talks to real peers.
    pub fn open_engine(&self) -> Result<SyncEngine, CliError> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let journal = Arc::new(Database::open(&self.db_path)?);

        Ok(SyncEngine::builder(
            LocalDevice::new(self.device_id.as_str(), self.device_id.as_str(), DeviceType::Desktop),
            Arc::new(MemoryStorage::new()),
            Arc::new(LoopbackTransport::new()),
        )
        .config(self.load_config()?)
        .journal(journal)
        .build()?)
    }
}

#[derive(Debug, Serialize)]
pub struct ChangeListItem {
    pub id: String,
    pub sequence: u64,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub priority: String,
    pub device_id: String,
    pub timestamp: i64,
    pub relative_time: String,
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct ConflictListItem {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub conflict_type: String,
    pub local_device: String,
    pub remote_device: String,
    pub timestamp_iso: String,
    pub resolution: Option<String>,
}

pub fn change_to_list_item(entry: &ChangeEntry, now_ms: i64) -> ChangeListItem {
    let change = &entry.change;
    ChangeListItem {
        id: change.id.to_string(),
        sequence: entry.sequence,
        entity_type: change.entity_type.clone(),
        entity_id: change.entity_id.clone(),
        operation: change.operation.to_string(),
        priority: change.priority.to_string(),
        device_id: change.device_id.to_string(),
        timestamp: change.timestamp,
        relative_time: format_relative_time(change.timestamp, now_ms),
        payload: change.payload.to_text_lossy(),
    }
}

pub fn conflict_to_list_item(conflict: &SyncConflict) -> ConflictListItem {
    ConflictListItem {
        id: conflict.id.to_string(),
        entity_type: conflict.entity_type.clone(),
        entity_id: conflict.entity_id.clone(),
        conflict_type: conflict.conflict_type.to_string(),
        local_device: conflict.local_change.device_id.to_string(),
        remote_device: conflict.remote_change.device_id.to_string(),
        timestamp_iso: format_timestamp(conflict.timestamp),
        resolution: conflict.resolution.map(|resolution| resolution.to_string()),
    }
}

pub fn format_change_lines(entries: &[ChangeEntry], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let change = &entry.change;
            let key = format!("{}/{}", change.entity_type, change.entity_id);
            format!(
                "{:<13}  {:<8}  {:<6}  {key:<32}  {}",
                short_id(&change.id.to_string()),
                change.priority.as_str(),
                change.operation.as_str(),
                format_relative_time(change.timestamp, now_ms)
            )
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let state = conflict
                .resolution
                .map_or_else(|| "open".to_string(), |resolution| resolution.to_string());
            format!(
                "{:<13}  {}  {:<18}  {}/{}  local={} remote={}  {state}",
                short_id(&conflict.id.to_string()),
                format_timestamp(conflict.timestamp),
                conflict.conflict_type.as_str(),
                conflict.entity_type,
                conflict.entity_id,
                conflict.local_change.device_id,
                conflict.remote_change.device_id
            )
        })
        .collect()
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Payload from the arguments, falling back to piped stdin.
///
/// Deletes may carry no payload; every other operation needs one.
pub fn resolve_payload(parts: &[String], operation: ChangeOperation) -> Result<String, CliError> {
    if let Some(payload) = normalize_text(&parts.join(" ")) {
        return Ok(payload);
    }
    if let Some(payload) = read_piped_stdin()? {
        return Ok(payload);
    }
    if operation.writes_content() {
        Err(CliError::EmptyPayload(operation.to_string()))
    } else {
        Ok(String::new())
    }
}

pub fn normalize_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    normalize_text(id).ok_or(CliError::EmptyIdentifier)
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_text(&buffer))
}

/// Find a change by full id or unique prefix
pub fn resolve_change_id(query: &str, change_log: &ChangeLog) -> Result<ChangeId, CliError> {
    let query = normalize_identifier(query)?;
    if let Ok(id) = query.parse::<ChangeId>() {
        if change_log.get(&id).is_some() {
            return Ok(id);
        }
    }

    let ids = change_log
        .entries()
        .into_iter()
        .map(|entry| entry.change.id)
        .collect::<Vec<_>>();
    match_prefix(&query, &ids).ok_or_else(|| CliError::ChangeNotFound(query.clone()))?
}

/// Find a conflict by full id or unique prefix
pub fn resolve_conflict_id(
    query: &str,
    conflicts: &[SyncConflict],
) -> Result<ConflictId, CliError> {
    let query = normalize_identifier(query)?;
    if let Ok(id) = query.parse::<ConflictId>() {
        if conflicts.iter().any(|conflict| conflict.id == id) {
            return Ok(id);
        }
    }

    let ids = conflicts.iter().map(|conflict| conflict.id).collect::<Vec<_>>();
    match_prefix(&query, &ids).ok_or_else(|| CliError::ConflictNotFound(query.clone()))?
}

/// `None` when nothing matches, an ambiguity error when several ids do
fn match_prefix<T: Copy + Display>(query: &str, ids: &[T]) -> Option<Result<T, CliError>> {
    let matching = ids
        .iter()
        .filter(|id| id.to_string().starts_with(query))
        .copied()
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => None,
        [id] => Some(Ok(*id)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| short_id(&id.to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            Some(Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            ))))
        }
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TANDEM_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tandem")
        .join("tandem.db")
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tandem").join("config.json"))
}

pub fn resolve_device_id(cli_device: Option<String>) -> String {
    cli_device
        .and_then(|id| normalize_text(&id))
        .or_else(|| env::var("TANDEM_DEVICE_ID").ok().and_then(|id| normalize_text(&id)))
        .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string())
}

/// Write rendered output to a file, or stdout when no path is given
pub fn write_output(rendered: &str, output_path: Option<&Path>) -> Result<(), CliError> {
    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }
    Ok(())
}
