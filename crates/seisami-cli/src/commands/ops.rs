use seisami_core::TableName;

use crate::commands::common::{
    format_operation_lines, newest_operations, open_store, operation_to_item, OperationItem,
};
use crate::config::ClientConfig;
use crate::error::CliError;

pub async fn run_ops(
    config: &ClientConfig,
    table: TableName,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let store = open_store(&config.db_path).await?;
    let operations = newest_operations(store.all_operations(table).await?, limit);
    let now_ms = chrono::Utc::now().timestamp_millis();

    if as_json {
        let json_items = operations
            .iter()
            .map(|operation| operation_to_item(operation, now_ms))
            .collect::<Vec<OperationItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("No operations logged for {table}.");
        return Ok(());
    }
    for line in format_operation_lines(&operations, now_ms) {
        println!("{line}");
    }
    Ok(())
}
