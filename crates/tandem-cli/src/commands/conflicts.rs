use tandem_core::ConflictResolution;

use crate::commands::common::{
    conflict_to_list_item, format_conflict_lines, resolve_conflict_id, CliContext,
    ConflictListItem,
};
use crate::error::CliError;

pub fn run_list_conflicts(
    context: &CliContext,
    include_resolved: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let engine = context.open_engine()?;
    let conflicts = if include_resolved {
        engine.conflict_history()
    } else {
        engine.conflicts()
    };

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_list_item)
            .collect::<Vec<ConflictListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_resolve_conflict(
    context: &CliContext,
    id: &str,
    resolution: ConflictResolution,
) -> Result<(), CliError> {
    let engine = context.open_engine()?;
    let conflict_id = resolve_conflict_id(id, &engine.conflict_history())?;

    match engine.resolve_conflict(&conflict_id, resolution).await? {
        Some(accepted) => println!(
            "Resolved {conflict_id} with {resolution}; accepted change {}",
            accepted.id
        ),
        None => println!("Conflict {conflict_id} left open"),
    }
    Ok(())
}
