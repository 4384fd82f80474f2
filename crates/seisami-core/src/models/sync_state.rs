//! Per-table synchronization watermark

use serde::{Deserialize, Serialize};

use super::{Operation, TableName, Timestamp};

/// The last operation a side knows to be reconciled for one table.
///
/// A single record per table that is overwritten, never appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub table_name: TableName,
    #[serde(default)]
    pub last_synced_operation_id: String,
    #[serde(default)]
    pub last_synced_at: Timestamp,
}

impl SyncState {
    /// The state a table starts with at account bootstrap.
    pub const fn zeroed(table_name: TableName) -> Self {
        Self {
            table_name,
            last_synced_operation_id: String::new(),
            last_synced_at: Timestamp::ZERO,
        }
    }

    /// State pointing at the given operation.
    pub fn at_operation(operation: &Operation) -> Self {
        Self {
            table_name: operation.table_name,
            last_synced_operation_id: operation.id.clone(),
            last_synced_at: operation.created_at,
        }
    }
}
