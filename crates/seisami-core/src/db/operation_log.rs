//! Append-only operation log

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::{Operation, TableName, Timestamp};

const SELECT_COLUMNS: &str = "SELECT id, table_name, record_id, operation_type, device_id, payload, created_at, updated_at FROM operations";

/// Trait for operation log storage (async)
#[allow(async_fn_in_trait)]
pub trait OperationLog {
    /// Append an operation. Returns `false` when the id was already logged.
    async fn append(&self, operation: &Operation) -> Result<bool>;

    /// Every decodable operation for a table, oldest first.
    async fn list(&self, table: TableName) -> Result<Vec<Operation>>;

    /// Operations created at or after `since`, oldest first.
    async fn list_since(&self, table: TableName, since: Timestamp) -> Result<Vec<Operation>>;

    /// The newest decodable operation for one record.
    async fn latest_for_record(
        &self,
        table: TableName,
        record_id: &str,
    ) -> Result<Option<Operation>>;
}

/// libSQL implementation of `OperationLog`
pub struct LibSqlOperationLog<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOperationLog<'a> {
    /// Create a new log view over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_operation(row: &Row) -> Result<Operation> {
        let table_name: String = row.get(1)?;
        let operation_type: String = row.get(3)?;
        Ok(Operation {
            id: row.get(0)?,
            table_name: table_name.parse()?,
            record_id: row.get(2)?,
            operation_type: operation_type.parse()?,
            device_id: row.get(4)?,
            payload: row.get(5)?,
            created_at: Timestamp::from_millis(row.get(6)?),
            updated_at: Timestamp::from_millis(row.get(7)?),
        })
    }

    /// Decode rows, skipping the ones that no longer parse.
    async fn collect(mut rows: libsql::Rows) -> Result<Vec<Operation>> {
        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            match Self::parse_operation(&row) {
                Ok(operation) => operations.push(operation),
                Err(error) if error.is_record_scoped() => {
                    let id = row.get::<String>(0).unwrap_or_default();
                    tracing::warn!(operation_id = %id, %error, "Skipping undecodable operation row");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(operations)
    }
}

impl OperationLog for LibSqlOperationLog<'_> {
    async fn append(&self, operation: &Operation) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO operations
                    (id, table_name, record_id, operation_type, device_id, payload, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    operation.id.as_str(),
                    operation.table_name.as_str(),
                    operation.record_id.as_str(),
                    operation.operation_type.as_str(),
                    operation.device_id.as_str(),
                    operation.payload.as_str(),
                    operation.created_at.as_millis(),
                    operation.updated_at.as_millis(),
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn list(&self, table: TableName) -> Result<Vec<Operation>> {
        let rows = self
            .conn
            .query(
                &format!("{SELECT_COLUMNS} WHERE table_name = ? ORDER BY created_at ASC, rowid ASC"),
                params![table.as_str()],
            )
            .await?;
        Self::collect(rows).await
    }

    async fn list_since(&self, table: TableName, since: Timestamp) -> Result<Vec<Operation>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "{SELECT_COLUMNS} WHERE table_name = ? AND created_at >= ? ORDER BY created_at ASC, rowid ASC"
                ),
                params![table.as_str(), since.as_millis()],
            )
            .await?;
        Self::collect(rows).await
    }

    async fn latest_for_record(
        &self,
        table: TableName,
        record_id: &str,
    ) -> Result<Option<Operation>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "{SELECT_COLUMNS} WHERE table_name = ? AND record_id = ? ORDER BY created_at DESC, rowid DESC"
                ),
                params![table.as_str(), record_id],
            )
            .await?;
        Ok(Self::collect(rows).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::OperationType;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn card_op(record_id: &str, at: &str) -> Operation {
        Operation::new(
            TableName::Cards,
            record_id,
            OperationType::Update,
            "dev-a",
            format!(r#"{{"column_id":"col","title":"{record_id}"}}"#),
        )
        .at(Timestamp::parse(at).unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_is_keyed_by_operation_id() {
        let db = setup().await;
        let log = LibSqlOperationLog::new(db.connection());
        let op = card_op("card-1", "2024-01-01 10:00:00");

        assert!(log.append(&op).await.unwrap());
        assert!(!log.append(&op).await.unwrap());
        assert_eq!(log.list(TableName::Cards).await.unwrap(), vec![op]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_is_scoped_to_table() {
        let db = setup().await;
        let log = LibSqlOperationLog::new(db.connection());
        log.append(&card_op("card-1", "2024-01-01 10:00:00"))
            .await
            .unwrap();

        assert!(log.list(TableName::Boards).await.unwrap().is_empty());
        assert_eq!(log.list(TableName::Cards).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_since_filters_older_operations() {
        let db = setup().await;
        let log = LibSqlOperationLog::new(db.connection());
        log.append(&card_op("card-1", "2024-01-01 09:00:00"))
            .await
            .unwrap();
        let newer = card_op("card-2", "2024-01-01 10:00:00");
        log.append(&newer).await.unwrap();

        let since = Timestamp::parse("2024-01-01 10:00:00").unwrap();
        assert_eq!(
            log.list_since(TableName::Cards, since).await.unwrap(),
            vec![newer]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_latest_for_record_returns_newest() {
        let db = setup().await;
        let log = LibSqlOperationLog::new(db.connection());
        let newest = card_op("card-1", "2024-01-01 11:00:00");
        log.append(&card_op("card-1", "2024-01-01 09:00:00"))
            .await
            .unwrap();
        log.append(&newest).await.unwrap();
        log.append(&card_op("card-2", "2024-01-01 12:00:00"))
            .await
            .unwrap();

        let latest = log
            .latest_for_record(TableName::Cards, "card-1")
            .await
            .unwrap();
        assert_eq!(latest, Some(newest));
        assert!(log
            .latest_for_record(TableName::Cards, "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_operation_type_rows_are_skipped() {
        let db = setup().await;
        db.connection()
            .execute(
                "INSERT INTO operations (id, table_name, record_id, operation_type, payload, created_at, updated_at)
                 VALUES ('bad', 'cards', 'card-9', 'teleport', '{}', 1, 1)",
                (),
            )
            .await
            .unwrap();
        let log = LibSqlOperationLog::new(db.connection());
        let good = card_op("card-1", "2024-01-01 10:00:00");
        log.append(&good).await.unwrap();

        assert_eq!(log.list(TableName::Cards).await.unwrap(), vec![good]);
    }
}
