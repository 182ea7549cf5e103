//! Diagnostic exports of the engine's state.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::changelog::ChangeEntry;
use crate::coordinator::{SyncEngine, SyncState};
use crate::error::Result;
use crate::models::{ConnectedDevice, LocalDevice, SyncConflict, SyncStatistics};
use crate::network::NetworkStatus;
use crate::util::unix_timestamp_ms;

/// Export output format shared by the CLI and host apps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

/// Everything the engine knows, as one serializable document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncExport {
    /// Unix ms
    pub exported_at: i64,
    pub local_device: LocalDevice,
    pub state: SyncState,
    pub network: NetworkStatus,
    pub statistics: SyncStatistics,
    /// Retained change log entries in sequence order
    pub changes: Vec<ChangeEntry>,
    /// Open and archived conflicts
    pub conflicts: Vec<SyncConflict>,
    pub devices: Vec<ConnectedDevice>,
    pub last_sync_at: Option<i64>,
}

/// Capture the engine's state at `exported_at`
#[must_use]
pub fn collect_export(engine: &SyncEngine, exported_at: i64) -> SyncExport {
    SyncExport {
        exported_at,
        local_device: engine.local_device().clone(),
        state: engine.status(),
        network: engine.network().status(),
        statistics: engine.statistics(),
        changes: engine.change_log().entries(),
        conflicts: engine.conflict_history(),
        devices: engine.devices(),
        last_sync_at: engine.last_sync_at(),
    }
}

/// Pretty-printed JSON snapshot of the change log, conflict history and registry
pub fn export_sync_data(engine: &SyncEngine) -> Result<Vec<u8>> {
    let export = collect_export(engine, unix_timestamp_ms());
    Ok(serde_json::to_vec_pretty(&export)?)
}

/// Human readable summary for support requests
#[must_use]
pub fn render_markdown_summary(export: &SyncExport) -> String {
    let mut output = String::new();
    let stats = &export.statistics;

    let _ = writeln!(
        output,
        "# Sync report for {} ({})",
        export.local_device.device_name, export.local_device.device_id
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "- exported: {}", format_timestamp(export.exported_at));
    let _ = writeln!(output, "- state: {} on {}", export.state, export.network.as_str());
    let _ = writeln!(
        output,
        "- last sync: {}",
        export
            .last_sync_at
            .map_or_else(|| "never".to_string(), format_timestamp)
    );
    let _ = writeln!(
        output,
        "- changes: {} pending of {} recorded",
        stats.pending_changes, stats.total_changes
    );
    let _ = writeln!(
        output,
        "- conflicts: {} open of {} detected",
        stats.pending_conflicts, stats.total_conflicts
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Devices");
    let _ = writeln!(output);
    if export.devices.is_empty() {
        let _ = writeln!(output, "No known devices.");
    }
    for device in &export.devices {
        let _ = writeln!(
            output,
            "- {} ({}, {}): {}, {:?}, last seen {}",
            device.device_name,
            device.device_id,
            device.device_type.as_str(),
            if device.is_online { "online" } else { "offline" },
            device.sync_status,
            format_timestamp(device.last_seen)
        );
    }

    let open = export
        .conflicts
        .iter()
        .filter(|conflict| !conflict.is_resolved)
        .collect::<Vec<_>>();
    if !open.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Open conflicts");
        let _ = writeln!(output);
        for conflict in open {
            let _ = writeln!(
                output,
                "- {} on {}/{}: local {} from {} vs remote {} from {}",
                conflict.conflict_type,
                conflict.entity_type,
                conflict.entity_id,
                conflict.local_change.operation.as_str(),
                conflict.local_change.device_id,
                conflict.remote_change.operation.as_str(),
                conflict.remote_change.device_id
            );
        }
    }

    output
}

/// Render the engine's state in the selected format
pub fn render_export(engine: &SyncEngine, format: ExportFormat) -> Result<String> {
    let export = collect_export(engine, unix_timestamp_ms());
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&export)?),
        ExportFormat::Markdown => Ok(render_markdown_summary(&export)),
    }
}

/// Build a deterministic default file name for export flows
#[must_use]
pub fn suggested_export_file_name(format: ExportFormat, timestamp_ms: i64) -> String {
    format!("tandem-export-{timestamp_ms}.{}", format.extension())
}

/// RFC 3339 in UTC, falling back to the raw value when out of range
fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |at| at.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}
