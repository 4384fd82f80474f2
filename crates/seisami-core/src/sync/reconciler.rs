//! Per-table last-writer-wins reconciliation

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;

use super::reduce::{latest_by_record, record_ids};
use super::transport::SyncTransport;
use crate::error::{Error, Result};
use crate::models::{Operation, OperationType, SyncState, TableName, Timestamp};
use crate::services::LocalStore;

/// How much of each log a pass fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// Both logs in full.
    #[default]
    Full,
    /// Only operations created at or after the table's delta cursor.
    ///
    /// The cursor is the newest `created_at` seen by the last pass that
    /// skipped nothing. An operation that reaches the cloud later with an
    /// older `created_at` (a lagging clock or a long offline edit) is only
    /// picked up by the next full pass.
    Since,
}

/// Outcome of one table pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub table: TableName,
    pub pushed: usize,
    pub pulled: usize,
    pub skipped: usize,
    pub unchanged: usize,
}

impl SyncReport {
    const fn new(table: TableName) -> Self {
        Self {
            table,
            pushed: 0,
            pulled: 0,
            skipped: 0,
            unchanged: 0,
        }
    }

    pub const fn pushed_any(&self) -> bool {
        self.pushed > 0
    }

    pub const fn pulled_any(&self) -> bool {
        self.pulled > 0
    }

    pub const fn is_noop(&self) -> bool {
        self.pushed == 0 && self.pulled == 0 && self.skipped == 0
    }
}

/// Drives one store against one transport.
pub struct Reconciler<T> {
    local: LocalStore,
    cloud: T,
    mode: FetchMode,
    locks: HashMap<TableName, Mutex<()>>,
}

impl<T: SyncTransport> Reconciler<T> {
    pub fn new(local: LocalStore, cloud: T) -> Self {
        Self {
            local,
            cloud,
            mode: FetchMode::default(),
            locks: TableName::ALL
                .into_iter()
                .map(|table| (table, Mutex::new(())))
                .collect(),
        }
    }

    #[must_use]
    pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn local(&self) -> &LocalStore {
        &self.local
    }

    pub const fn cloud(&self) -> &T {
        &self.cloud
    }

    /// Run one reconciliation round for a table.
    ///
    /// Fails only when either side's log cannot be fetched; problems with a
    /// single record are logged and counted as skipped.
    pub async fn sync_table(&self, table: TableName) -> Result<SyncReport> {
        let _pass = self
            .locks
            .get(&table)
            .ok_or_else(|| Error::UnsupportedTable(table.to_string()))?
            .lock()
            .await;

        let (local_ops, cloud_ops) = self.fetch(table).await?;
        let newest_seen = local_ops
            .iter()
            .chain(&cloud_ops)
            .map(|operation| operation.created_at)
            .max();
        let local_latest = latest_by_record(local_ops);
        let cloud_latest = latest_by_record(cloud_ops);
        let mut report = SyncReport::new(table);

        for record_id in record_ids(&local_latest, &cloud_latest) {
            match (local_latest.get(&record_id), cloud_latest.get(&record_id)) {
                (Some(local), None) => self.push(local, &mut report).await,
                (None, Some(_)) => self.pull(table, &record_id, &mut report).await,
                (Some(local), Some(cloud)) => match local.created_at.cmp(&cloud.created_at) {
                    Ordering::Greater => self.push(local, &mut report).await,
                    Ordering::Less => self.pull(table, &record_id, &mut report).await,
                    Ordering::Equal => report.unchanged += 1,
                },
                (None, None) => {}
            }
        }

        if report.pushed_any() {
            self.publish_local_state(table, &local_latest).await;
        }
        if report.pulled_any() {
            self.adopt_cloud_state(table).await;
        }
        match newest_seen {
            Some(newest) if report.skipped == 0 => self.advance_cursor(table, newest).await,
            Some(_) => tracing::debug!(table = %table, "Delta cursor held back by skipped records"),
            None => {}
        }

        tracing::info!(
            table = %table,
            pushed = report.pushed,
            pulled = report.pulled,
            skipped = report.skipped,
            unchanged = report.unchanged,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Run a pass for every table, logging the ones that fail.
    pub async fn sync_all(&self) -> Vec<SyncReport> {
        let mut reports = Vec::with_capacity(TableName::ALL.len());
        for table in TableName::ALL {
            match self.sync_table(table).await {
                Ok(report) => reports.push(report),
                Err(error) => tracing::error!(table = %table, %error, "Sync pass failed"),
            }
        }
        reports
    }

    async fn fetch(&self, table: TableName) -> Result<(Vec<Operation>, Vec<Operation>)> {
        match self.mode {
            FetchMode::Full => {
                let local = self.local.all_operations(table).await?;
                let cloud = self.cloud.get_all_operations(table).await?;
                Ok((local, cloud))
            }
            FetchMode::Since => {
                let since = self.local.delta_cursor(table).await?;
                let local = self.local.operations_since(table, since).await?;
                let cloud = self.cloud.get_operations_since(table, since).await?;
                Ok((local, cloud))
            }
        }
    }

    async fn push(&self, operation: &Operation, report: &mut SyncReport) {
        match self.cloud.push_record(operation).await {
            Ok(_) => report.pushed += 1,
            Err(error)
                if error.is_not_found() && operation.operation_type == OperationType::Move =>
            {
                match self.push_history(operation.table_name, &operation.record_id).await {
                    Ok(count) => {
                        report.pushed += 1;
                        tracing::debug!(
                            table = %operation.table_name,
                            record_id = %operation.record_id,
                            count,
                            "Pushed record history behind a move"
                        );
                    }
                    Err(error) => {
                        report.skipped += 1;
                        tracing::warn!(
                            table = %operation.table_name,
                            record_id = %operation.record_id,
                            %error,
                            "Failed to push record history"
                        );
                    }
                }
            }
            Err(error) => {
                report.skipped += 1;
                tracing::warn!(
                    table = %operation.table_name,
                    record_id = %operation.record_id,
                    %error,
                    "Failed to push record"
                );
            }
        }
    }

    async fn pull(&self, table: TableName, record_id: &str, report: &mut SyncReport) {
        let operation = match self.cloud.pull_record(table, record_id).await {
            Ok(Some(operation)) => operation,
            Ok(None) => {
                report.skipped += 1;
                tracing::warn!(table = %table, record_id, "Cloud has no operation for record");
                return;
            }
            Err(error) => {
                report.skipped += 1;
                tracing::warn!(table = %table, record_id, %error, "Failed to pull record");
                return;
            }
        };

        match self.local.apply_remote_operation(&operation).await {
            Ok(_) => report.pulled += 1,
            Err(Error::NotFound(_)) if operation.operation_type == OperationType::Move => {
                match self.pull_history(table, record_id).await {
                    Ok(count) => {
                        report.pulled += 1;
                        tracing::debug!(
                            table = %table,
                            record_id,
                            count,
                            "Pulled record history behind a move"
                        );
                    }
                    Err(error) => {
                        report.skipped += 1;
                        tracing::warn!(
                            table = %table,
                            record_id,
                            %error,
                            "Failed to pull record history"
                        );
                    }
                }
            }
            Err(error) => {
                report.skipped += 1;
                tracing::warn!(table = %table, record_id, %error, "Failed to apply pulled record");
            }
        }
    }

    /// Replay the cloud's operations for one record in creation order.
    async fn pull_history(&self, table: TableName, record_id: &str) -> Result<usize> {
        let history = record_history(self.cloud.pull_records(table).await?, record_id);
        for operation in &history {
            self.local.apply_remote_operation(operation).await?;
        }
        Ok(history.len())
    }

    /// Push every local operation for one record in creation order.
    async fn push_history(&self, table: TableName, record_id: &str) -> Result<usize> {
        let history = record_history(self.local.all_operations(table).await?, record_id);
        for operation in &history {
            self.cloud.push_record(operation).await?;
        }
        Ok(history.len())
    }

    async fn advance_cursor(&self, table: TableName, newest: Timestamp) {
        match self.local.delta_cursor(table).await {
            Ok(current) if current >= newest => {}
            Ok(_) => {
                if let Err(error) = self.local.set_delta_cursor(table, newest).await {
                    tracing::warn!(table = %table, %error, "Failed to store delta cursor");
                }
            }
            Err(error) => tracing::warn!(table = %table, %error, "Failed to read delta cursor"),
        }
    }

    async fn publish_local_state(&self, table: TableName, local: &HashMap<String, Operation>) {
        let state = match self.local.sync_state(table).await {
            Ok(Some(state)) => state,
            Ok(None) => match local.values().max_by_key(|operation| operation.created_at) {
                Some(newest) => SyncState::at_operation(newest),
                None => return,
            },
            Err(error) => {
                tracing::warn!(table = %table, %error, "Failed to read local sync state");
                return;
            }
        };

        if let Err(error) = self.cloud.update_sync_state(&state).await {
            tracing::warn!(table = %table, %error, "Failed to update cloud sync state");
        }
    }

    async fn adopt_cloud_state(&self, table: TableName) {
        match self.cloud.get_sync_state(table).await {
            Ok(Some(state)) => {
                if let Err(error) = self.local.put_sync_state(&state).await {
                    tracing::warn!(table = %table, %error, "Failed to update local sync state");
                }
            }
            Ok(None) => tracing::debug!(table = %table, "Cloud has no sync state yet"),
            Err(error) => {
                tracing::warn!(table = %table, %error, "Failed to read cloud sync state");
            }
        }
    }
}

/// Operations for one record, oldest first. Equal timestamps keep log order.
fn record_history(operations: Vec<Operation>, record_id: &str) -> Vec<Operation> {
    let mut history: Vec<Operation> = operations
        .into_iter()
        .filter(|operation| operation.record_id == record_id)
        .collect();
    history.sort_by_key(|operation| operation.created_at);
    history
}
