use std::path::Path;

use seisami_core::sync::{FetchMode, HttpSyncTransport, SyncReport};
use seisami_core::{LocalStore, Operation, OperationType, SyncState};
use serde::Serialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct OperationItem {
    pub id: String,
    pub record_id: String,
    pub operation_type: OperationType,
    pub device_id: String,
    pub created_at: i64,
    pub created_at_iso: String,
    pub relative_time: String,
}

pub async fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open_path(db_path).await?)
}

pub fn http_transport(config: &ClientConfig) -> Result<HttpSyncTransport, CliError> {
    let (api_url, access_token) = config.remote()?;
    Ok(HttpSyncTransport::new(api_url, access_token)?)
}

pub const fn fetch_mode(delta: bool) -> FetchMode {
    if delta {
        FetchMode::Since
    } else {
        FetchMode::Full
    }
}

/// Newest first, at most `limit`.
pub fn newest_operations(mut operations: Vec<Operation>, limit: usize) -> Vec<Operation> {
    operations.reverse();
    operations.truncate(limit);
    operations
}

pub fn operation_to_item(operation: &Operation, now_ms: i64) -> OperationItem {
    let created_at = operation.created_at.as_millis();
    OperationItem {
        id: operation.id.clone(),
        record_id: operation.record_id.clone(),
        operation_type: operation.operation_type,
        device_id: operation.device_id.clone(),
        created_at,
        created_at_iso: format_sync_timestamp(created_at),
        relative_time: format_relative_time(created_at, now_ms),
    }
}

pub fn format_operation_lines(operations: &[Operation], now_ms: i64) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let short_id: String = operation.id.chars().take(8).collect();
            format!(
                "{short_id}  {:<6}  {:<24}  {}",
                operation.operation_type.as_str(),
                operation.record_id,
                format_relative_time(operation.created_at.as_millis(), now_ms)
            )
        })
        .collect()
}

pub fn format_report_line(report: &SyncReport) -> String {
    if report.is_noop() {
        return format!("{:<15} up to date", report.table.as_str());
    }
    format!(
        "{:<15} pushed {}, pulled {}, skipped {}, unchanged {}",
        report.table.as_str(),
        report.pushed,
        report.pulled,
        report.skipped,
        report.unchanged
    )
}

pub fn format_state_line(state: &SyncState) -> String {
    if state.last_synced_at.is_zero() {
        return format!("{:<15} never synced", state.table_name.as_str());
    }
    let short_id: String = state.last_synced_operation_id.chars().take(8).collect();
    format!(
        "{:<15} {}  ({short_id})",
        state.table_name.as_str(),
        format_sync_timestamp(state.last_synced_at.as_millis())
    )
}

/// Parse a payload argument. Deletes may omit it.
pub fn parse_payload(
    operation_type: OperationType,
    payload: Option<&str>,
) -> Result<Value, CliError> {
    let payload = payload.map(str::trim).filter(|payload| !payload.is_empty());
    match (operation_type, payload) {
        (OperationType::Delete, None) => Ok(Value::Object(serde_json::Map::new())),
        (_, None) => Err(CliError::InvalidPayload(format!(
            "a JSON payload is required for {operation_type}"
        ))),
        (_, Some(raw)) => {
            let value: Value = serde_json::from_str(raw)
                .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
            if value.is_object() {
                Ok(value)
            } else {
                Err(CliError::InvalidPayload(
                    "payload must be a JSON object".to_string(),
                ))
            }
        }
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
