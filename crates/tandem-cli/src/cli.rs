use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tandem_core::{ChangeOperation, ChangePriority, ConflictResolution};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Inspect and drive the Tandem health record sync engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local journal database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to a JSON engine config
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Identity of this device
    #[arg(long, global = true, value_name = "ID")]
    pub device: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a local change
    Record {
        /// Entity type (e.g. workout, medication)
        entity_type: String,
        /// Entity id
        entity_id: String,
        /// Operation
        #[arg(long, value_enum, default_value_t = OperationArg::Update)]
        op: OperationArg,
        /// Priority
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
        /// Payload (read from stdin when omitted)
        payload: Vec<String>,
    },
    /// List changes waiting to be exchanged
    Pending {
        /// Number of changes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a change as propagated
    Ack {
        /// Change ID or unique ID prefix
        id: String,
    },
    /// Drop acknowledged changes past the retention window
    Prune,
    /// List or resolve conflicts
    Conflicts {
        #[command(subcommand)]
        command: Option<ConflictCommands>,
    },
    /// Show engine status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export change log, conflicts and devices
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Output file or directory (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Run one sync cycle against simulated in-memory peers
    Simulate {
        /// Number of peer devices
        #[arg(long, default_value = "3")]
        peers: usize,
        /// How many of the peers are offline
        #[arg(long, default_value = "1")]
        offline: usize,
        /// Merge duplicate creates instead of surfacing them
        #[arg(long)]
        auto_merge: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List conflicts
    List {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve an open conflict
    Resolve {
        /// Conflict ID or unique ID prefix
        id: String,
        /// Resolution to apply
        #[arg(value_enum)]
        resolution: ResolutionArg,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OperationArg {
    Create,
    Update,
    Delete,
}

impl From<OperationArg> for ChangeOperation {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Create => Self::Create,
            OperationArg::Update => Self::Update,
            OperationArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
    Critical,
}

impl From<PriorityArg> for ChangePriority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Self::Low,
            PriorityArg::Normal => Self::Normal,
            PriorityArg::High => Self::High,
            PriorityArg::Critical => Self::Critical,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolutionArg {
    UseLocal,
    UseRemote,
    Merge,
}

impl From<ResolutionArg> for ConflictResolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::UseLocal => Self::UseLocal,
            ResolutionArg::UseRemote => Self::UseRemote,
            ResolutionArg::Merge => Self::Merge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl From<ExportFormat> for tandem_core::export::ExportFormat {
    fn from(value: ExportFormat) -> Self {
        match value {
            ExportFormat::Json => Self::Json,
            ExportFormat::Markdown => Self::Markdown,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}
