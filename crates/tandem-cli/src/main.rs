//! Tandem CLI - inspect and drive the health record sync engine
//!
//! Works against the local journal, plus an in-memory simulator for trying
//! sync cycles without real peers.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, ConflictCommands};
use crate::commands::ack::run_ack;
use crate::commands::common::{resolve_db_path, resolve_device_id, CliContext};
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{run_list_conflicts, run_resolve_conflict};
use crate::commands::export::run_export;
use crate::commands::pending::run_pending;
use crate::commands::prune::run_prune;
use crate::commands::record::run_record;
use crate::commands::simulate::run_simulate;
use crate::commands::status::run_status;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "tandem=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = CliContext {
        db_path: resolve_db_path(cli.db_path),
        config_path: cli.config,
        device_id: resolve_device_id(cli.device),
    };

    match cli.command {
        Commands::Record {
            entity_type,
            entity_id,
            op,
            priority,
            payload,
        } => run_record(
            &context,
            &entity_type,
            &entity_id,
            op.into(),
            priority.into(),
            &payload,
        )?,
        Commands::Pending { limit, json } => run_pending(&context, limit, json)?,
        Commands::Ack { id } => run_ack(&context, &id)?,
        Commands::Prune => run_prune(&context)?,
        Commands::Conflicts { command } => match command {
            None => run_list_conflicts(&context, false, false)?,
            Some(ConflictCommands::List { all, json }) => {
                run_list_conflicts(&context, all, json)?;
            }
            Some(ConflictCommands::Resolve { id, resolution }) => {
                run_resolve_conflict(&context, &id, resolution.into()).await?;
            }
        },
        Commands::Status { json } => run_status(&context, json)?,
        Commands::Export { format, output } => {
            run_export(&context, format.into(), output.as_deref())?;
        }
        Commands::Simulate {
            peers,
            offline,
            auto_merge,
            json,
        } => run_simulate(&context, peers, offline, auto_merge, json).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
