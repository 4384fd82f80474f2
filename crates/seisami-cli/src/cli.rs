use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use seisami_core::{OperationType, TableName};

#[derive(Parser)]
#[command(name = "seisami")]
#[command(about = "Keep Seisami boards in sync across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one reconciliation pass against the sync service
    Sync {
        /// Only reconcile this table
        #[arg(long, value_enum)]
        table: Option<TableArg>,
        /// Fetch only operations newer than the last completed pass
        #[arg(long)]
        delta: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload local data to an empty or partially filled cloud copy
    Bootstrap {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the background until interrupted
    Watch {
        /// Seconds between scheduled passes (overrides `SEISAMI_SYNC_INTERVAL_SECS`)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
        /// Fetch only operations newer than the last completed pass
        #[arg(long)]
        delta: bool,
    },
    /// List logged operations for a table
    Ops {
        /// Table to list
        #[arg(value_enum)]
        table: TableArg,
        /// Number of operations to show (newest first)
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the local sync position of every table
    State {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a local mutation
    Record {
        /// Target table
        #[arg(value_enum)]
        table: TableArg,
        /// Id of the affected record
        record_id: String,
        /// Kind of mutation
        #[arg(value_enum)]
        operation: OperationArg,
        /// JSON payload (entity snapshot, or `{"card_id","column_id"}` for a move)
        payload: Option<String>,
    },
    /// Export every local board, column, card and transcription as JSON
    Export {
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
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

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum TableArg {
    Boards,
    Columns,
    Cards,
    Transcriptions,
}

impl From<TableArg> for TableName {
    fn from(table: TableArg) -> Self {
        match table {
            TableArg::Boards => Self::Boards,
            TableArg::Columns => Self::Columns,
            TableArg::Cards => Self::Cards,
            TableArg::Transcriptions => Self::Transcriptions,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OperationArg {
    Insert,
    Update,
    Delete,
    Move,
}

impl From<OperationArg> for OperationType {
    fn from(operation: OperationArg) -> Self {
        match operation {
            OperationArg::Insert => Self::Insert,
            OperationArg::Update => Self::Update,
            OperationArg::Delete => Self::Delete,
            OperationArg::Move => Self::Move,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
