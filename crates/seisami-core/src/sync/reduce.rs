//! Latest-record reduction over an operation log

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::models::Operation;

/// Keep the most recently created operation per record id.
///
/// An operation replaces the stored one only when its `created_at` is
/// strictly later, so among equal timestamps the first one seen wins.
pub fn latest_by_record(
    operations: impl IntoIterator<Item = Operation>,
) -> HashMap<String, Operation> {
    let mut latest: HashMap<String, Operation> = HashMap::new();
    for operation in operations {
        match latest.get(&operation.record_id) {
            Some(current) if current.created_at >= operation.created_at => {}
            _ => {
                latest.insert(operation.record_id.clone(), operation);
            }
        }
    }
    latest
}

/// Union of record ids seen on either side.
pub fn record_ids(
    local: &HashMap<String, Operation>,
    cloud: &HashMap<String, Operation>,
) -> BTreeSet<String> {
    local.keys().chain(cloud.keys()).cloned().collect()
}

/// Decode wire operations one by one, skipping the ones that fail.
pub fn decode_operations(values: Vec<Value>) -> Vec<Operation> {
    let total = values.len();
    let mut operations = Vec::with_capacity(total);

    for value in values {
        let record_id = value
            .get("record_id")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        match serde_json::from_value::<Operation>(value) {
            Ok(operation) => operations.push(operation),
            Err(error) => {
                tracing::warn!(record_id = %record_id, %error, "Skipping undecodable operation");
            }
        }
    }

    let skipped = total - operations.len();
    if skipped > 0 {
        tracing::warn!(skipped, total, "Some operations could not be decoded");
    }
    operations
}
