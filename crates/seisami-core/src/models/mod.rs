//! Data models for Seisami

mod entities;
mod operation;
mod sync_state;
mod table;
mod timestamp;

pub use entities::{Board, Card, CardMove, Column, ExportedData, Transcription, Versioned};
pub use operation::Operation;
pub use sync_state::SyncState;
pub use table::{OperationType, TableName};
pub use timestamp::{Timestamp, LEGACY_LAYOUT};
