use crate::commands::common::{
    change_to_list_item, format_change_lines, now_ms, ChangeListItem, CliContext,
};
use crate::error::CliError;

pub fn run_pending(context: &CliContext, limit: usize, as_json: bool) -> Result<(), CliError> {
    let engine = context.open_engine()?;
    let pending = engine
        .change_log()
        .entries()
        .into_iter()
        .filter(tandem_core::ChangeEntry::is_pending)
        .take(limit)
        .collect::<Vec<_>>();
    let now = now_ms();

    if as_json {
        let json_items = pending
            .iter()
            .map(|entry| change_to_list_item(entry, now))
            .collect::<Vec<ChangeListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if pending.is_empty() {
        println!("No pending changes.");
        return Ok(());
    }

    for line in format_change_lines(&pending, now) {
        println!("{line}");
    }
    Ok(())
}
