use crate::commands::common::{resolve_change_id, CliContext};
use crate::error::CliError;

pub fn run_ack(context: &CliContext, id: &str) -> Result<(), CliError> {
    let engine = context.open_engine()?;
    let change_id = resolve_change_id(id, engine.change_log())?;

    if engine.change_log().acknowledge(&change_id)? {
        println!("Acknowledged {change_id}");
    } else {
        println!("{change_id} was already acknowledged");
    }
    Ok(())
}
