//! Seisami CLI - sync a local board database with the Seisami service
//!
//! One-shot passes, first-time bootstrap and a long-running watch mode.

mod cli;
mod commands;
mod config;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::bootstrap::run_bootstrap;
use crate::commands::completions::run_completions;
use crate::commands::export::run_export;
use crate::commands::ops::run_ops;
use crate::commands::record::run_record;
use crate::commands::state::run_state;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::config::{parse_interval, ClientConfig};
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

    let directive = "seisami=info"
        .parse()
        .map_err(|error| CliError::Config(format!("log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env(cli.db_path)?;
    tracing::debug!(?config, "Resolved client configuration");

    match cli.command {
        Commands::Sync { table, delta, json } => {
            run_sync(&config, table.map(Into::into), delta, json).await?;
        }
        Commands::Bootstrap { json } => run_bootstrap(&config, json).await?,
        Commands::Watch { interval, delta } => {
            let interval = interval.map_or(Ok(config.sync_interval), parse_interval)?;
            run_watch(&config, interval, delta).await?;
        }
        Commands::Ops { table, limit, json } => {
            run_ops(&config, table.into(), limit, json).await?;
        }
        Commands::State { json } => run_state(&config, json).await?,
        Commands::Record {
            table,
            record_id,
            operation,
            payload,
        } => {
            run_record(
                &config,
                table.into(),
                &record_id,
                operation.into(),
                payload.as_deref(),
            )
            .await?;
        }
        Commands::Export { output } => run_export(&config, output.as_deref()).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
