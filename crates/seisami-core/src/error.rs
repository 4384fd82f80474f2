//! Error types for seisami-core

use thiserror::Error;

use crate::sync::TransportError;

/// Result type alias using seisami-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in seisami-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A timestamp or payload that could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Table name outside the synchronized set
    #[error("Unsupported table: {0}")]
    UnsupportedTable(String),

    /// Operation type not valid for the target table
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Cloud transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Whether the error is scoped to one record rather than the whole pass.
    pub const fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            Self::Decode(_)
                | Self::UnsupportedTable(_)
                | Self::UnsupportedOperation(_)
                | Self::Serialization(_)
                | Self::NotFound(_)
        )
    }
}
