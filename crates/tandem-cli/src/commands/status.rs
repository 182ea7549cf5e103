use crate::commands::common::{format_timestamp, CliContext};
use crate::error::CliError;

pub fn run_status(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let engine = context.open_engine()?;
    let snapshot = engine.snapshot();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("{}", snapshot.headline());
    println!("device: {}", engine.local_device().device_id);
    println!("journal: {}", context.db_path.display());
    if let Some(last_sync_at) = snapshot.last_sync_at {
        println!("last sync: {}", format_timestamp(last_sync_at));
    }
    println!(
        "changes recorded: {}, conflicts detected: {}",
        snapshot.statistics.total_changes, snapshot.statistics.total_conflicts
    );
    Ok(())
}
