use std::io;

use seisami_core::sync::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] seisami_core::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error(
        "Sync is not configured. Set SEISAMI_API_URL and SEISAMI_ACCESS_TOKEN (a .env file works too)."
    )]
    SyncNotConfigured,
}
