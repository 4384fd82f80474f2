//! Durable board/column/card/transcription state

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{
    Board, Card, CardMove, Column, ExportedData, Operation, OperationType, TableName, Timestamp,
    Transcription,
};

/// Trait for entity storage (async)
#[allow(async_fn_in_trait)]
pub trait EntityStore {
    /// Apply one decoded operation. Re-applying the same operation is harmless.
    async fn apply_operation(&self, operation: &Operation) -> Result<()>;

    async fn upsert_board(&self, board: &Board) -> Result<()>;
    async fn upsert_column(&self, column: &Column) -> Result<()>;
    async fn upsert_card(&self, card: &Card) -> Result<()>;
    async fn upsert_transcription(&self, transcription: &Transcription) -> Result<()>;

    /// Snapshot of every entity
    async fn export_all(&self) -> Result<ExportedData>;
}

/// libSQL implementation of `EntityStore`
pub struct LibSqlEntityStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn delete(&self, table: TableName, record_id: &str) -> Result<()> {
        let removed = self
            .conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?", table.as_str()),
                params![record_id],
            )
            .await?;
        if removed == 0 {
            tracing::debug!(%table, record_id, "Delete matched no row");
        }
        Ok(())
    }

    async fn move_card(&self, operation: &Operation) -> Result<()> {
        let change: CardMove = operation.decode_payload()?;
        let card_id = if change.card_id.is_empty() {
            operation.record_id.as_str()
        } else {
            change.card_id.as_str()
        };
        let updated = self
            .conn
            .execute(
                "UPDATE cards SET column_id = ?, updated_at = ? WHERE id = ?",
                params![
                    change.column_id.as_str(),
                    operation.updated_at.as_millis(),
                    card_id
                ],
            )
            .await?;
        if updated == 0 {
            return Err(Error::NotFound(format!("card {card_id}")));
        }
        Ok(())
    }

    fn parse_board(row: &Row) -> Result<Board> {
        Ok(Board {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: Timestamp::from_millis(row.get(2)?),
            updated_at: Timestamp::from_millis(row.get(3)?),
        })
    }

    fn parse_column(row: &Row) -> Result<Column> {
        Ok(Column {
            id: row.get(0)?,
            board_id: row.get(1)?,
            name: row.get(2)?,
            position: row.get(3)?,
            created_at: Timestamp::from_millis(row.get(4)?),
            updated_at: Timestamp::from_millis(row.get(5)?),
        })
    }

    fn parse_card(row: &Row) -> Result<Card> {
        Ok(Card {
            id: row.get(0)?,
            column_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            attachments: row.get(4)?,
            position: row.get(5)?,
            created_at: Timestamp::from_millis(row.get(6)?),
            updated_at: Timestamp::from_millis(row.get(7)?),
        })
    }

    fn parse_transcription(row: &Row) -> Result<Transcription> {
        Ok(Transcription {
            id: row.get(0)?,
            board_id: row.get(1)?,
            transcription: row.get(2)?,
            recording_path: row.get(3)?,
            intent: row.get(4)?,
            assistant_response: row.get(5)?,
            created_at: Timestamp::from_millis(row.get(6)?),
            updated_at: Timestamp::from_millis(row.get(7)?),
        })
    }

    async fn list<T>(&self, sql: &str, parse: fn(&Row) -> Result<T>) -> Result<Vec<T>> {
        let mut rows = self.conn.query(sql, ()).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(parse(&row)?);
        }
        Ok(items)
    }
}

/// Fill identity and timestamps the payload may omit from the operation itself.
fn stamp(id: &mut String, created_at: &mut Timestamp, updated_at: &mut Timestamp, op: &Operation) {
    if id.is_empty() {
        id.clone_from(&op.record_id);
    }
    if created_at.is_zero() {
        *created_at = op.created_at;
    }
    if updated_at.is_zero() {
        *updated_at = op.updated_at;
    }
}

impl EntityStore for LibSqlEntityStore<'_> {
    async fn apply_operation(&self, operation: &Operation) -> Result<()> {
        match (operation.table_name, operation.operation_type) {
            (table, OperationType::Delete) => self.delete(table, &operation.record_id).await,
            (TableName::Cards, OperationType::Move) => self.move_card(operation).await,
            (table, OperationType::Move) => Err(Error::UnsupportedOperation(format!(
                "move is only valid for cards, got {table}"
            ))),
            (TableName::Boards, OperationType::Insert | OperationType::Update) => {
                let mut board: Board = operation.decode_payload()?;
                stamp(&mut board.id, &mut board.created_at, &mut board.updated_at, operation);
                self.upsert_board(&board).await
            }
            (TableName::Columns, OperationType::Insert | OperationType::Update) => {
                let mut column: Column = operation.decode_payload()?;
                stamp(&mut column.id, &mut column.created_at, &mut column.updated_at, operation);
                self.upsert_column(&column).await
            }
            (TableName::Cards, OperationType::Insert | OperationType::Update) => {
                let mut card: Card = operation.decode_payload()?;
                stamp(&mut card.id, &mut card.created_at, &mut card.updated_at, operation);
                self.upsert_card(&card).await
            }
            (TableName::Transcriptions, OperationType::Insert | OperationType::Update) => {
                let mut transcription: Transcription = operation.decode_payload()?;
                stamp(
                    &mut transcription.id,
                    &mut transcription.created_at,
                    &mut transcription.updated_at,
                    operation,
                );
                self.upsert_transcription(&transcription).await
            }
        }
    }

    async fn upsert_board(&self, board: &Board) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO boards (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    updated_at = excluded.updated_at",
                params![
                    board.id.as_str(),
                    board.name.as_str(),
                    board.created_at.as_millis(),
                    board.updated_at.as_millis(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn upsert_column(&self, column: &Column) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO columns (id, board_id, name, position, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    board_id = excluded.board_id,
                    name = excluded.name,
                    position = excluded.position,
                    updated_at = excluded.updated_at",
                params![
                    column.id.as_str(),
                    column.board_id.as_str(),
                    column.name.as_str(),
                    column.position,
                    column.created_at.as_millis(),
                    column.updated_at.as_millis(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn upsert_card(&self, card: &Card) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO cards
                    (id, column_id, title, description, attachments, position, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    column_id = excluded.column_id,
                    title = excluded.title,
                    description = excluded.description,
                    attachments = excluded.attachments,
                    position = excluded.position,
                    updated_at = excluded.updated_at",
                params![
                    card.id.as_str(),
                    card.column_id.as_str(),
                    card.title.as_str(),
                    card.description.clone(),
                    card.attachments.clone(),
                    card.position,
                    card.created_at.as_millis(),
                    card.updated_at.as_millis(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn upsert_transcription(&self, transcription: &Transcription) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO transcriptions
                    (id, board_id, transcription, recording_path, intent, assistant_response, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    board_id = excluded.board_id,
                    transcription = excluded.transcription,
                    recording_path = excluded.recording_path,
                    intent = excluded.intent,
                    assistant_response = excluded.assistant_response,
                    updated_at = excluded.updated_at",
                params![
                    transcription.id.as_str(),
                    transcription.board_id.as_str(),
                    transcription.transcription.as_str(),
                    transcription.recording_path.clone(),
                    transcription.intent.clone(),
                    transcription.assistant_response.clone(),
                    transcription.created_at.as_millis(),
                    transcription.updated_at.as_millis(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn export_all(&self) -> Result<ExportedData> {
        Ok(ExportedData {
            boards: self
                .list(
                    "SELECT id, name, created_at, updated_at FROM boards ORDER BY created_at, id",
                    Self::parse_board,
                )
                .await?,
            columns: self
                .list(
                    "SELECT id, board_id, name, position, created_at, updated_at
                     FROM columns ORDER BY board_id, position, id",
                    Self::parse_column,
                )
                .await?,
            cards: self
                .list(
                    "SELECT id, column_id, title, description, attachments, position, created_at, updated_at
                     FROM cards ORDER BY column_id, position, id",
                    Self::parse_card,
                )
                .await?,
            transcriptions: self
                .list(
                    "SELECT id, board_id, transcription, recording_path, intent, assistant_response, created_at, updated_at
                     FROM transcriptions ORDER BY created_at, id",
                    Self::parse_transcription,
                )
                .await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn op(table: TableName, kind: OperationType, record_id: &str, payload: &str) -> Operation {
        Operation::new(table, record_id, kind, "dev", payload)
            .at(Timestamp::parse("2024-01-01 10:00:00").unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_applying_insert_twice_is_idempotent() {
        let db = setup().await;
        let store = LibSqlEntityStore::new(db.connection());
        let insert = op(
            TableName::Cards,
            OperationType::Insert,
            "card-1",
            r#"{"column_id":"col-1","title":"Ship it"}"#,
        );

        store.apply_operation(&insert).await.unwrap();
        let once = store.export_all().await.unwrap();
        store.apply_operation(&insert).await.unwrap();
        let twice = store.export_all().await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.cards.len(), 1);
        assert_eq!(twice.cards[0].id, "card-1");
        assert_eq!(twice.cards[0].created_at, insert.created_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_replaces_fields() {
        let db = setup().await;
        let store = LibSqlEntityStore::new(db.connection());
        store
            .apply_operation(&op(
                TableName::Boards,
                OperationType::Insert,
                "b1",
                r#"{"name":"Todo"}"#,
            ))
            .await
            .unwrap();
        store
            .apply_operation(&op(
                TableName::Boards,
                OperationType::Update,
                "b1",
                r#"{"name":"Roadmap"}"#,
            ))
            .await
            .unwrap();

        let data = store.export_all().await.unwrap();
        assert_eq!(data.boards.len(), 1);
        assert_eq!(data.boards[0].name, "Roadmap");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_removes_record_and_tolerates_missing() {
        let db = setup().await;
        let store = LibSqlEntityStore::new(db.connection());
        store
            .apply_operation(&op(
                TableName::Columns,
                OperationType::Insert,
                "col-1",
                r#"{"board_id":"b1","name":"Doing","position":1}"#,
            ))
            .await
            .unwrap();

        let delete = op(TableName::Columns, OperationType::Delete, "col-1", "");
        store.apply_operation(&delete).await.unwrap();
        store.apply_operation(&delete).await.unwrap();

        assert!(store.export_all().await.unwrap().columns.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_move_reparents_card() {
        let db = setup().await;
        let store = LibSqlEntityStore::new(db.connection());
        store
            .apply_operation(&op(
                TableName::Cards,
                OperationType::Insert,
                "card-1",
                r#"{"column_id":"col-1","title":"Ship it"}"#,
            ))
            .await
            .unwrap();
        store
            .apply_operation(&op(
                TableName::Cards,
                OperationType::Move,
                "card-1",
                r#"{"card_id":"card-1","column_id":"col-2"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(store.export_all().await.unwrap().cards[0].column_id, "col-2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_move_outside_cards_is_unsupported() {
        let db = setup().await;
        let store = LibSqlEntityStore::new(db.connection());
        let result = store
            .apply_operation(&op(
                TableName::Boards,
                OperationType::Move,
                "b1",
                r#"{"card_id":"b1","column_id":"x"}"#,
            ))
            .await;
        assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_payload_is_decode_error() {
        let db = setup().await;
        let store = LibSqlEntityStore::new(db.connection());
        let result = store
            .apply_operation(&op(TableName::Transcriptions, OperationType::Insert, "t1", "{"))
            .await;
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
