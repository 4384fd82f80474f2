//! One reconciliation worker per table

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use super::reconciler::Reconciler;
use super::transport::SyncTransport;
use crate::models::TableName;

/// Runs passes on a timer and on request, never two at once for a table.
pub struct SyncScheduler {
    triggers: HashMap<TableName, mpsc::Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl SyncScheduler {
    /// Start a worker per table. With `interval` set, each worker also runs
    /// a pass on that cadence, starting immediately.
    pub fn spawn<T>(reconciler: Arc<Reconciler<T>>, interval: Option<Duration>) -> Self
    where
        T: SyncTransport + 'static,
    {
        let mut triggers = HashMap::new();
        let mut workers = Vec::with_capacity(TableName::ALL.len());

        for table in TableName::ALL {
            // Capacity 1: requests arriving while one is pending coalesce
            let (tx, rx) = mpsc::channel(1);
            triggers.insert(table, tx);
            workers.push(tokio::spawn(run_worker(
                Arc::clone(&reconciler),
                table,
                rx,
                interval,
            )));
        }

        Self { triggers, workers }
    }

    /// Ask for a pass on one table. Returns `false` once shut down.
    pub fn request(&self, table: TableName) -> bool {
        let Some(trigger) = self.triggers.get(&table) else {
            return false;
        };
        match trigger.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub fn request_all(&self) {
        for table in TableName::ALL {
            self.request(table);
        }
    }

    /// Stop scheduling and wait for in-flight passes to finish.
    pub async fn shutdown(self) {
        drop(self.triggers);
        for worker in self.workers {
            if let Err(error) = worker.await {
                tracing::error!(%error, "Sync worker ended abnormally");
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_worker<T: SyncTransport>(
    reconciler: Arc<Reconciler<T>>,
    table: TableName,
    mut requests: mpsc::Receiver<()>,
    interval: Option<Duration>,
) {
    let mut ticker = interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            biased;
            request = requests.recv() => {
                if request.is_none() {
                    break;
                }
                tracing::debug!(table = %table, "Sync requested");
            }
            () = next_tick(&mut ticker) => {}
        }

        if let Err(error) = reconciler.sync_table(table).await {
            tracing::error!(table = %table, %error, "Scheduled sync pass failed");
        }
    }

    tracing::debug!(table = %table, "Sync worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationType, Timestamp};
    use crate::services::LocalStore;
    use crate::sync::StoreTransport;

    #[tokio::test(flavor = "multi_thread")]
    async fn requested_pass_runs_before_shutdown_returns() {
        let local = LocalStore::open_in_memory().await.unwrap();
        let cloud = LocalStore::open_in_memory().await.unwrap();
        local
            .record_mutation(
                TableName::Boards,
                "b1",
                OperationType::Insert,
                &serde_json::json!({ "name": "Todo" }),
            )
            .await
            .unwrap();

        let reconciler = Arc::new(Reconciler::new(
            local.clone(),
            StoreTransport::new(cloud.clone()),
        ));
        let scheduler = SyncScheduler::spawn(reconciler, None);
        assert!(scheduler.request(TableName::Boards));
        // Coalesces with the pending request
        assert!(scheduler.request(TableName::Boards));

        // Let the worker pick the request up before closing the channel
        for _ in 0..50 {
            if !cloud.all_operations(TableName::Boards).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        scheduler.shutdown().await;

        assert_eq!(cloud.all_operations(TableName::Boards).await.unwrap().len(), 1);
        assert_eq!(cloud.export_all().await.unwrap().boards[0].name, "Todo");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interval_runs_a_pass_immediately() {
        let local = LocalStore::open_in_memory().await.unwrap();
        let cloud = LocalStore::open_in_memory().await.unwrap();
        let op = crate::models::Operation::new(
            TableName::Columns,
            "col-1",
            OperationType::Insert,
            "remote",
            r#"{"board_id":"b1","name":"Done"}"#,
        )
        .at(Timestamp::from_millis(5));
        cloud.apply_remote_operation(&op).await.unwrap();

        let reconciler = Arc::new(Reconciler::new(
            local.clone(),
            StoreTransport::new(cloud),
        ));
        let scheduler = SyncScheduler::spawn(reconciler, Some(Duration::from_secs(3600)));

        for _ in 0..50 {
            if !local.all_operations(TableName::Columns).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        scheduler.shutdown().await;

        assert_eq!(local.all_operations(TableName::Columns).await.unwrap(), vec![op]);
    }
}
