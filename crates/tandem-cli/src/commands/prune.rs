use crate::commands::common::{now_ms, CliContext};
use crate::error::CliError;

pub fn run_prune(context: &CliContext) -> Result<(), CliError> {
    let engine = context.open_engine()?;
    let pruned = engine.change_log().prune_expired(now_ms())?;

    println!("Pruned {pruned} acknowledged changes");
    Ok(())
}
