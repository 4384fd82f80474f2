use seisami_core::sync::Reconciler;
use seisami_core::TableName;

use crate::commands::common::{fetch_mode, format_report_line, http_transport, open_store};
use crate::config::ClientConfig;
use crate::error::CliError;

pub async fn run_sync(
    config: &ClientConfig,
    table: Option<TableName>,
    delta: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let transport = http_transport(config)?;
    let store = open_store(&config.db_path).await?;
    let reconciler = Reconciler::new(store, transport).with_fetch_mode(fetch_mode(delta));

    let reports = match table {
        Some(table) => vec![reconciler.sync_table(table).await?],
        None => reconciler.sync_all().await,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No tables synced; see the log for errors.");
        return Ok(());
    }
    for report in &reports {
        println!("{}", format_report_line(report));
    }
    Ok(())
}
