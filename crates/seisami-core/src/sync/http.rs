//! HTTP client for the sync service

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::reduce::decode_operations;
use super::transport::{PushReceipt, SyncTransport, TransportError, TransportResult};
use crate::models::{
    Board, Card, Column, ExportedData, Operation, SyncState, TableName, Timestamp, Transcription,
};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `SyncTransport` over the service's JSON API.
#[derive(Clone)]
pub struct HttpSyncTransport {
    base: Url,
    access_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncTransport")
            .field("base", &self.base.as_str())
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    operations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PullRecordResponse {
    operation: Value,
}

#[derive(Debug, Deserialize)]
struct SyncStateResponse {
    data: SyncState,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpSyncTransport {
    pub fn new(
        endpoint: impl Into<String>,
        access_token: impl Into<String>,
    ) -> TransportResult<Self> {
        let base = normalize_endpoint(endpoint.into())?;
        let access_token = normalize_text_option(Some(access_token.into())).ok_or_else(|| {
            TransportError::InvalidConfiguration("access token must not be empty".to_string())
        })?;
        Ok(Self {
            base,
            access_token,
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
        })
    }

    fn url(&self, segments: &[&str]) -> TransportResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                TransportError::InvalidConfiguration("endpoint cannot be a base URL".to_string())
            })?
            .pop_if_empty()
            .extend(["v1", "sync"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
    }

    async fn send(builder: RequestBuilder) -> TransportResult<Option<reqwest::Response>> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Api {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }
        Ok(Some(response))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> TransportResult<Option<T>> {
        match Self::send(self.request(Method::GET, url)).await? {
            Some(response) => Ok(Some(response.json::<T>().await?)),
            None => Ok(None),
        }
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        url: Url,
        body: &B,
    ) -> TransportResult<reqwest::Response> {
        let path = url.path().to_string();
        Self::send(self.request(Method::POST, url).json(body))
            .await?
            .ok_or_else(|| TransportError::Api {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("{path} not found"),
            })
    }

    async fn fetch_operations(&self, url: Url) -> TransportResult<Vec<Operation>> {
        let path = url.path().to_string();
        let payload = self
            .get_json::<PullResponse>(url)
            .await?
            .ok_or_else(|| TransportError::InvalidPayload(format!("{path} not found")))?;
        Ok(decode_operations(payload.operations))
    }
}

impl SyncTransport for HttpSyncTransport {
    async fn get_all_operations(&self, table: TableName) -> TransportResult<Vec<Operation>> {
        self.fetch_operations(self.url(&["pull", table.as_str()])?)
            .await
    }

    async fn get_operations_since(
        &self,
        table: TableName,
        since: Timestamp,
    ) -> TransportResult<Vec<Operation>> {
        let mut url = self.url(&["pull", table.as_str()])?;
        url.query_pairs_mut()
            .append_pair("since", &since.as_millis().to_string());
        self.fetch_operations(url).await
    }

    async fn push_record(&self, operation: &Operation) -> TransportResult<PushReceipt> {
        let response = self.post_json(self.url(&["upload"])?, operation).await?;
        Ok(response.json::<PushReceipt>().await?)
    }

    async fn pull_records(&self, table: TableName) -> TransportResult<Vec<Operation>> {
        self.get_all_operations(table).await
    }

    async fn pull_record(
        &self,
        table: TableName,
        record_id: &str,
    ) -> TransportResult<Option<Operation>> {
        let url = self.url(&["pull", table.as_str(), record_id])?;
        let Some(payload) = self.get_json::<PullRecordResponse>(url).await? else {
            return Ok(None);
        };
        serde_json::from_value(payload.operation)
            .map(Some)
            .map_err(|error| {
                TransportError::InvalidPayload(format!("operation for {record_id}: {error}"))
            })
    }

    async fn get_sync_state(&self, table: TableName) -> TransportResult<Option<SyncState>> {
        let url = self.url(&["state", table.as_str()])?;
        Ok(self
            .get_json::<SyncStateResponse>(url)
            .await?
            .map(|payload| payload.data))
    }

    async fn update_sync_state(&self, state: &SyncState) -> TransportResult<()> {
        self.post_json(self.url(&["state"])?, state).await?;
        Ok(())
    }

    async fn upsert_board(&self, board: &Board) -> TransportResult<()> {
        self.post_json(self.url(&["board"])?, board).await?;
        Ok(())
    }

    async fn upsert_column(&self, column: &Column) -> TransportResult<()> {
        self.post_json(self.url(&["column"])?, column).await?;
        Ok(())
    }

    async fn upsert_card(&self, card: &Card) -> TransportResult<()> {
        self.post_json(self.url(&["card"])?, card).await?;
        Ok(())
    }

    async fn upsert_transcription(&self, transcription: &Transcription) -> TransportResult<()> {
        self.post_json(self.url(&["transcription"])?, transcription)
            .await?;
        Ok(())
    }

    async fn initialize_sync_state(&self) -> TransportResult<()> {
        self.post_json(self.url(&["init"])?, &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn export_all(&self) -> TransportResult<ExportedData> {
        self.get_json::<ExportedData>(self.url(&["export"])?)
            .await?
            .ok_or_else(|| TransportError::InvalidPayload("export not found".to_string()))
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> TransportResult<Url> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        TransportError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if !is_http_url(&endpoint) {
        return Err(TransportError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ));
    }
    Url::parse(endpoint.trim_end_matches('/'))
        .map_err(|error| TransportError::InvalidConfiguration(format!("endpoint: {error}")))
}
