//! Transport boundary between a device and the sync service

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{
    Board, Card, Column, ExportedData, Operation, SyncState, TableName, Timestamp, Transcription,
};
use crate::services::LocalStore;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Invalid sync payload: {0}")]
    InvalidPayload(String),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Store error: {0}")]
    Store(Box<crate::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(error))
    }
}

impl TransportError {
    pub(crate) fn store(error: crate::Error) -> Self {
        Self::Store(Box::new(error))
    }

    /// The remote side has no row the operation refers to.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 404,
            Self::Store(error) => matches!(**error, crate::Error::NotFound(_)),
            _ => false,
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Acknowledgement returned when an operation is stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReceipt {
    pub status: String,
    pub record_id: String,
    pub operation_id: String,
}

impl PushReceipt {
    pub fn stored(operation: &Operation) -> Self {
        Self {
            status: "stored".to_string(),
            record_id: operation.record_id.clone(),
            operation_id: operation.id.clone(),
        }
    }
}

/// Request/response channel to the cloud copy of a user's data.
///
/// Calls are never retried here; callers decide what a failure means.
pub trait SyncTransport: Send + Sync {
    fn get_all_operations(
        &self,
        table: TableName,
    ) -> impl Future<Output = TransportResult<Vec<Operation>>> + Send;

    fn get_operations_since(
        &self,
        table: TableName,
        since: Timestamp,
    ) -> impl Future<Output = TransportResult<Vec<Operation>>> + Send;

    fn push_record(
        &self,
        operation: &Operation,
    ) -> impl Future<Output = TransportResult<PushReceipt>> + Send;

    fn pull_records(
        &self,
        table: TableName,
    ) -> impl Future<Output = TransportResult<Vec<Operation>>> + Send;

    /// Latest operation for exactly this record.
    fn pull_record(
        &self,
        table: TableName,
        record_id: &str,
    ) -> impl Future<Output = TransportResult<Option<Operation>>> + Send;

    fn get_sync_state(
        &self,
        table: TableName,
    ) -> impl Future<Output = TransportResult<Option<SyncState>>> + Send;

    fn update_sync_state(
        &self,
        state: &SyncState,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    fn upsert_board(&self, board: &Board) -> impl Future<Output = TransportResult<()>> + Send;

    fn upsert_column(&self, column: &Column) -> impl Future<Output = TransportResult<()>> + Send;

    fn upsert_card(&self, card: &Card) -> impl Future<Output = TransportResult<()>> + Send;

    fn upsert_transcription(
        &self,
        transcription: &Transcription,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    fn initialize_sync_state(&self) -> impl Future<Output = TransportResult<()>> + Send;

    fn export_all(&self) -> impl Future<Output = TransportResult<ExportedData>> + Send;
}

/// In-process transport backed directly by a store.
#[derive(Clone)]
pub struct StoreTransport {
    store: LocalStore,
}

impl StoreTransport {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }
}

impl SyncTransport for StoreTransport {
    async fn get_all_operations(&self, table: TableName) -> TransportResult<Vec<Operation>> {
        self.store
            .all_operations(table)
            .await
            .map_err(TransportError::store)
    }

    async fn get_operations_since(
        &self,
        table: TableName,
        since: Timestamp,
    ) -> TransportResult<Vec<Operation>> {
        self.store
            .operations_since(table, since)
            .await
            .map_err(TransportError::store)
    }

    async fn push_record(&self, operation: &Operation) -> TransportResult<PushReceipt> {
        operation.validate().map_err(TransportError::store)?;
        self.store
            .apply_remote_operation(operation)
            .await
            .map_err(TransportError::store)?;
        Ok(PushReceipt::stored(operation))
    }

    async fn pull_records(&self, table: TableName) -> TransportResult<Vec<Operation>> {
        self.get_all_operations(table).await
    }

    async fn pull_record(
        &self,
        table: TableName,
        record_id: &str,
    ) -> TransportResult<Option<Operation>> {
        self.store
            .latest_operation(table, record_id)
            .await
            .map_err(TransportError::store)
    }

    async fn get_sync_state(&self, table: TableName) -> TransportResult<Option<SyncState>> {
        self.store
            .sync_state(table)
            .await
            .map_err(TransportError::store)
    }

    async fn update_sync_state(&self, state: &SyncState) -> TransportResult<()> {
        self.store
            .put_sync_state(state)
            .await
            .map_err(TransportError::store)
    }

    async fn upsert_board(&self, board: &Board) -> TransportResult<()> {
        self.store
            .import_board(board)
            .await
            .map_err(TransportError::store)
    }

    async fn upsert_column(&self, column: &Column) -> TransportResult<()> {
        self.store
            .import_column(column)
            .await
            .map_err(TransportError::store)
    }

    async fn upsert_card(&self, card: &Card) -> TransportResult<()> {
        self.store
            .import_card(card)
            .await
            .map_err(TransportError::store)
    }

    async fn upsert_transcription(&self, transcription: &Transcription) -> TransportResult<()> {
        self.store
            .import_transcription(transcription)
            .await
            .map_err(TransportError::store)
    }

    async fn initialize_sync_state(&self) -> TransportResult<()> {
        self.store
            .initialize_sync_states()
            .await
            .map_err(TransportError::store)
    }

    async fn export_all(&self) -> TransportResult<ExportedData> {
        self.store
            .export_all()
            .await
            .map_err(TransportError::store)
    }
}
