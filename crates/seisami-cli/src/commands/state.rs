use seisami_core::{SyncState, TableName};
use serde::Serialize;

use crate::commands::common::{format_state_line, open_store};
use crate::config::ClientConfig;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StateReport {
    device_id: String,
    tables: Vec<SyncState>,
}

pub async fn run_state(config: &ClientConfig, as_json: bool) -> Result<(), CliError> {
    let store = open_store(&config.db_path).await?;
    let device_id = store.device_id().await?;

    let mut tables = Vec::with_capacity(TableName::ALL.len());
    for table in TableName::ALL {
        let state = store
            .sync_state(table)
            .await?
            .unwrap_or_else(|| SyncState::zeroed(table));
        tables.push(state);
    }

    if as_json {
        let report = StateReport { device_id, tables };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Device {device_id}");
    for state in &tables {
        println!("{}", format_state_line(state));
    }
    Ok(())
}
