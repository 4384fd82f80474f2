//! Shared store service wrapping one libSQL database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{
    Database, EntityStore, LibSqlEntityStore, LibSqlOperationLog, LibSqlSettingsRepository,
    LibSqlSyncStateRepository, OperationLog, SettingsRepository, SyncStateRepository,
};
use crate::models::{
    Board, Card, Column, ExportedData, Operation, OperationType, SyncState, TableName, Timestamp,
    Transcription,
};
use crate::Result;

/// Thread-safe service over the operation log, sync state and entities.
///
/// Devices hold one; the service holds one per user.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a store at the given filesystem path, creating parent directories.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("seisami.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale sidecar file {}", path.display());
            }
        }

        Ok(())
    }

    /// Id stamped on operations recorded through this store.
    pub async fn device_id(&self) -> Result<String> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .device_id()
            .await
    }

    /// Every operation logged for a table.
    pub async fn all_operations(&self, table: TableName) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOperationLog::new(db.connection()).list(table).await
    }

    /// Operations created at or after `since`.
    pub async fn operations_since(
        &self,
        table: TableName,
        since: Timestamp,
    ) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOperationLog::new(db.connection())
            .list_since(table, since)
            .await
    }

    /// Newest operation for one record.
    pub async fn latest_operation(
        &self,
        table: TableName,
        record_id: &str,
    ) -> Result<Option<Operation>> {
        let db = self.db.lock().await;
        LibSqlOperationLog::new(db.connection())
            .latest_for_record(table, record_id)
            .await
    }

    /// Append without touching entities.
    pub async fn append_operation(&self, operation: &Operation) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlOperationLog::new(db.connection())
            .append(operation)
            .await
    }

    /// Apply an operation produced elsewhere and log it.
    ///
    /// Returns `false` when the operation id was already logged; the entity
    /// write is repeated either way.
    pub async fn apply_remote_operation(&self, operation: &Operation) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .apply_operation(operation)
            .await?;
        LibSqlOperationLog::new(db.connection())
            .append(operation)
            .await
    }

    /// Record a mutation made on this device.
    ///
    /// Applies it, appends it to the log and advances the table's sync state.
    pub async fn record_mutation<P: Serialize>(
        &self,
        table: TableName,
        record_id: &str,
        operation_type: OperationType,
        payload: &P,
    ) -> Result<Operation> {
        let payload = serde_json::to_string(payload)?;
        let db = self.db.lock().await;
        let device_id = LibSqlSettingsRepository::new(db.connection())
            .device_id()
            .await?;
        let operation = Operation::new(table, record_id, operation_type, device_id, payload);
        operation.validate()?;

        LibSqlEntityStore::new(db.connection())
            .apply_operation(&operation)
            .await?;
        LibSqlOperationLog::new(db.connection())
            .append(&operation)
            .await?;
        LibSqlSyncStateRepository::new(db.connection())
            .upsert(&SyncState::at_operation(&operation))
            .await?;

        tracing::debug!(
            table = %table,
            record_id,
            operation = %operation_type,
            operation_id = %operation.id,
            "Recorded local mutation"
        );
        Ok(operation)
    }

    pub async fn sync_state(&self, table: TableName) -> Result<Option<SyncState>> {
        let db = self.db.lock().await;
        LibSqlSyncStateRepository::new(db.connection())
            .get(table)
            .await
    }

    pub async fn put_sync_state(&self, state: &SyncState) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSyncStateRepository::new(db.connection())
            .upsert(state)
            .await
    }

    /// Lower bound for the next `FetchMode::Since` pass.
    ///
    /// Only a completed pass moves it. Local writes leave it alone.
    pub async fn delta_cursor(&self, table: TableName) -> Result<Timestamp> {
        let db = self.db.lock().await;
        let value = LibSqlSettingsRepository::new(db.connection())
            .get(&delta_cursor_key(table))
            .await?;
        value.map_or(Ok(Timestamp::ZERO), |raw| {
            raw.parse::<i64>()
                .map(Timestamp::from_millis)
                .map_err(|_| crate::Error::Decode(format!("delta cursor for {table}: {raw}")))
        })
    }

    pub async fn set_delta_cursor(&self, table: TableName, at: Timestamp) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .set(&delta_cursor_key(table), &at.as_millis().to_string())
            .await
    }

    /// Zeroed state for every table that has none yet.
    pub async fn initialize_sync_states(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSyncStateRepository::new(db.connection())
            .initialize_all()
            .await
    }

    pub async fn export_all(&self) -> Result<ExportedData> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection()).export_all().await
    }

    pub async fn import_board(&self, board: &Board) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .upsert_board(board)
            .await
    }

    pub async fn import_column(&self, column: &Column) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .upsert_column(column)
            .await
    }

    pub async fn import_card(&self, card: &Card) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .upsert_card(card)
            .await
    }

    pub async fn import_transcription(&self, transcription: &Transcription) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlEntityStore::new(db.connection())
            .upsert_transcription(transcription)
            .await
    }
}

fn delta_cursor_key(table: TableName) -> String {
    format!("delta_cursor.{}", table.as_str())
}
