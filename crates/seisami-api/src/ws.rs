//! Socket plumbing shared by the wake-up channel and collaboration rooms

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy)]
pub struct SocketSettings {
    pub heartbeat: Duration,
    pub read_timeout: Duration,
}

impl SocketSettings {
    pub const fn from_config(config: &AppConfig) -> Self {
        Self {
            heartbeat: config.ws_heartbeat,
            read_timeout: config.ws_read_timeout,
        }
    }
}

/// Drive one socket until the peer leaves, goes quiet or the outbound queue
/// closes.
///
/// A writer task drains `outbound` and pings on the heartbeat; closing the
/// queue makes it send a close frame. Every inbound frame (pongs included)
/// refreshes the read deadline. Text frames go to `on_text`.
pub async fn serve_socket(
    socket: WebSocket,
    mut outbound: mpsc::Receiver<String>,
    settings: SocketSettings,
    mut on_text: impl FnMut(&str),
) {
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(settings.heartbeat);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                message = outbound.recv() => {
                    let Some(text) = message else {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = tokio::time::timeout(settings.read_timeout, stream.next()) => {
                match frame {
                    Err(_) => {
                        tracing::debug!("Socket missed its read deadline");
                        break;
                    }
                    Ok(None | Some(Err(_) | Ok(Message::Close(_)))) => break,
                    Ok(Some(Ok(Message::Text(text)))) => on_text(text.as_str()),
                    Ok(Some(Ok(_))) => {}
                }
            }
        }
    }

    writer.abort();
}
