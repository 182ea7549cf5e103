use std::path::{Path, PathBuf};

use tandem_core::export::{render_export, suggested_export_file_name, ExportFormat};

use crate::commands::common::{now_ms, write_output, CliContext};
use crate::error::CliError;

pub fn run_export(
    context: &CliContext,
    format: ExportFormat,
    output_path: Option<&Path>,
) -> Result<(), CliError> {
    let engine = context.open_engine()?;
    let rendered = render_export(&engine, format)?;
    let target = output_path.map(|path| export_target(path, format, now_ms()));
    write_output(&rendered, target.as_deref())
}

/// A directory gets a timestamped file name; any other path is used as given
pub fn export_target(path: &Path, format: ExportFormat, timestamp_ms: i64) -> PathBuf {
    if path.is_dir() {
        path.join(suggested_export_file_name(format, timestamp_ms))
    } else {
        path.to_path_buf()
    }
}
