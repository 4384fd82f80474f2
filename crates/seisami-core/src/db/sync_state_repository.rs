//! Sync state repository implementation

use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{SyncState, TableName, Timestamp};

/// Trait for per-table sync state storage (async)
#[allow(async_fn_in_trait)]
pub trait SyncStateRepository {
    /// Load the state for a table, if one was ever written
    async fn get(&self, table: TableName) -> Result<Option<SyncState>>;

    /// Overwrite the state for its table
    async fn upsert(&self, state: &SyncState) -> Result<()>;

    /// Create zeroed rows for every table, keeping existing ones
    async fn initialize_all(&self) -> Result<()>;
}

/// libSQL implementation of `SyncStateRepository`
pub struct LibSqlSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncStateRepository for LibSqlSyncStateRepository<'_> {
    async fn get(&self, table: TableName) -> Result<Option<SyncState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_synced_operation_id, last_synced_at FROM sync_state WHERE table_name = ?",
                params![table.as_str()],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(SyncState {
                table_name: table,
                last_synced_operation_id: row.get(0)?,
                last_synced_at: Timestamp::from_millis(row.get(1)?),
            }))
        } else {
            Ok(None)
        }
    }

    async fn upsert(&self, state: &SyncState) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_state (table_name, last_synced_operation_id, last_synced_at)
                 VALUES (?, ?, ?)
                 ON CONFLICT(table_name) DO UPDATE SET
                    last_synced_operation_id = excluded.last_synced_operation_id,
                    last_synced_at = excluded.last_synced_at",
                params![
                    state.table_name.as_str(),
                    state.last_synced_operation_id.as_str(),
                    state.last_synced_at.as_millis(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn initialize_all(&self) -> Result<()> {
        for table in TableName::ALL {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO sync_state (table_name, last_synced_operation_id, last_synced_at)
                     VALUES (?, '', 0)",
                    params![table.as_str()],
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_state_is_none() {
        let db = setup().await;
        let repo = LibSqlSyncStateRepository::new(db.connection());
        assert!(repo.get(TableName::Cards).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_overwrites_single_row() {
        let db = setup().await;
        let repo = LibSqlSyncStateRepository::new(db.connection());

        let first = SyncState {
            table_name: TableName::Cards,
            last_synced_operation_id: "op-1".to_string(),
            last_synced_at: Timestamp::from_millis(1_000),
        };
        let second = SyncState {
            last_synced_operation_id: "op-2".to_string(),
            last_synced_at: Timestamp::from_millis(2_000),
            ..first.clone()
        };
        repo.upsert(&first).await.unwrap();
        repo.upsert(&second).await.unwrap();

        assert_eq!(repo.get(TableName::Cards).await.unwrap(), Some(second));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize_all_keeps_existing_rows() {
        let db = setup().await;
        let repo = LibSqlSyncStateRepository::new(db.connection());
        let existing = SyncState {
            table_name: TableName::Boards,
            last_synced_operation_id: "op-9".to_string(),
            last_synced_at: Timestamp::from_millis(9_000),
        };
        repo.upsert(&existing).await.unwrap();

        repo.initialize_all().await.unwrap();

        assert_eq!(repo.get(TableName::Boards).await.unwrap(), Some(existing));
        assert_eq!(
            repo.get(TableName::Transcriptions).await.unwrap(),
            Some(SyncState::zeroed(TableName::Transcriptions))
        );
    }
}
