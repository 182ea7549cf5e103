use tandem_core::{ChangeOperation, ChangePriority};

use crate::commands::common::{normalize_identifier, resolve_payload, CliContext};
use crate::error::CliError;

pub fn run_record(
    context: &CliContext,
    entity_type: &str,
    entity_id: &str,
    operation: ChangeOperation,
    priority: ChangePriority,
    payload_parts: &[String],
) -> Result<(), CliError> {
    let entity_type = normalize_identifier(entity_type)?;
    let entity_id = normalize_identifier(entity_id)?;
    let payload = resolve_payload(payload_parts, operation)?;

    let engine = context.open_engine()?;
    let change = engine.record_change(entity_type, entity_id, operation, payload, priority)?;

    println!("{}", change.id);
    Ok(())
}
