//! Operation log entry

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{OperationType, TableName, Timestamp};
use crate::error::{Error, Result};

/// One immutable mutation record.
///
/// `payload` is the JSON snapshot of the entity after the mutation (or the
/// move descriptor for [`OperationType::Move`]). It is opaque to the log and
/// only decoded when the operation is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub table_name: TableName,
    pub record_id: String,
    pub operation_type: OperationType,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub payload: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Operation {
    /// Create an operation stamped with the current time and a fresh UUID v7 id.
    #[must_use]
    pub fn new(
        table_name: TableName,
        record_id: impl Into<String>,
        operation_type: OperationType,
        device_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: Uuid::now_v7().to_string(),
            table_name,
            record_id: record_id.into(),
            operation_type,
            device_id: device_id.into(),
            payload: payload.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Override both timestamps.
    #[must_use]
    pub const fn at(mut self, timestamp: Timestamp) -> Self {
        self.created_at = timestamp;
        self.updated_at = timestamp;
        self
    }

    /// Decode the payload snapshot.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.payload).map_err(|error| {
            Error::Decode(format!(
                "{} payload for {} ({}): {error}",
                self.table_name, self.record_id, self.operation_type
            ))
        })
    }

    /// Fields that must be present before an operation is stored.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidInput("operation id is required".to_string()));
        }
        if self.record_id.trim().is_empty() {
            return Err(Error::InvalidInput("record_id is required".to_string()));
        }
        if self.operation_type != OperationType::Delete && self.payload.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "payload is required for {}",
                self.operation_type
            )));
        }
        Ok(())
    }
}
