//! Device side of the per-user wake-up channel

use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::transport::{TransportError, TransportResult};
use crate::models::TableName;
use crate::util::{normalize_text_option, websocket_url};

/// Delay before reconnecting after the channel drops.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Path of the wake-up socket relative to the API base.
pub const WAKE_PATH: &str = "/v1/sync/ws";

/// Messages the service pushes over the wake-up channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WakeMessage {
    /// Another device changed this table; reconcile it.
    SyncUpdate { table_name: TableName },
}

impl WakeMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Decode a frame, returning `None` for anything unrecognized.
pub fn parse_wake_message(text: &str) -> Option<WakeMessage> {
    match serde_json::from_str(text) {
        Ok(message) => Some(message),
        Err(error) => {
            tracing::debug!(%error, "Ignoring unrecognized wake message");
            None
        }
    }
}

/// Keeps a wake-up socket open and reports which tables changed.
pub struct WakeListener {
    url: Url,
    reconnect_delay: Duration,
}

impl std::fmt::Debug for WakeListener {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut redacted = self.url.clone();
        redacted.set_query(None);
        formatter
            .debug_struct("WakeListener")
            .field("url", &redacted.as_str())
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

impl WakeListener {
    pub fn new(api_url: &str, access_token: &str, device_id: &str) -> TransportResult<Self> {
        let access_token = normalize_text_option(Some(access_token.to_string())).ok_or_else(
            || TransportError::InvalidConfiguration("access token must not be empty".to_string()),
        )?;
        let ws = websocket_url(api_url, WAKE_PATH).ok_or_else(|| {
            TransportError::InvalidConfiguration(
                "endpoint must include http:// or https://".to_string(),
            )
        })?;
        let mut url = Url::parse(&ws)
            .map_err(|error| TransportError::InvalidConfiguration(format!("endpoint: {error}")))?;
        url.query_pairs_mut()
            .append_pair("token", &access_token)
            .append_pair("device_id", device_id);

        Ok(Self {
            url,
            reconnect_delay: RECONNECT_DELAY,
        })
    }

    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Listen forever, reconnecting after every disconnect.
    ///
    /// Stop it by dropping the future, e.g. from a `select!` on shutdown.
    pub async fn run(&self, mut on_wake: impl FnMut(TableName) + Send) {
        loop {
            match self.listen_once(&mut on_wake).await {
                Ok(()) => tracing::info!("Wake-up channel closed by server"),
                Err(error) => tracing::warn!(%error, "Wake-up channel failed"),
            }
            tokio::time::sleep(self.reconnect_delay).await;
            tracing::info!("Reconnecting wake-up channel");
        }
    }

    /// One connection lifetime. Returns when the socket closes.
    pub async fn listen_once(&self, on_wake: &mut impl FnMut(TableName)) -> TransportResult<()> {
        let (mut socket, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        tracing::info!("Wake-up channel connected");

        // Pings are answered by the socket while it is polled
        while let Some(frame) = socket.next().await {
            match frame? {
                Message::Text(text) => {
                    if let Some(WakeMessage::SyncUpdate { table_name }) = parse_wake_message(&text)
                    {
                        tracing::debug!(table = %table_name, "Wake-up received");
                        on_wake(table_name);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}
