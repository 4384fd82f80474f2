use seisami_core::{OperationType, TableName};

use crate::commands::common::{open_store, parse_payload};
use crate::config::ClientConfig;
use crate::error::CliError;

pub async fn run_record(
    config: &ClientConfig,
    table: TableName,
    record_id: &str,
    operation_type: OperationType,
    payload: Option<&str>,
) -> Result<(), CliError> {
    let record_id = record_id.trim();
    if record_id.is_empty() {
        return Err(CliError::InvalidPayload(
            "record id cannot be empty".to_string(),
        ));
    }
    let payload = parse_payload(operation_type, payload)?;

    let store = open_store(&config.db_path).await?;
    let operation = store
        .record_mutation(table, record_id, operation_type, &payload)
        .await?;
    println!("{}", operation.id);
    Ok(())
}
