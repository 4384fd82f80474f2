//! seisami-core - Core library for Seisami
//!
//! This crate contains the board models, the libSQL-backed operation log and
//! entity store, and the sync engine shared by the CLI and the sync service.

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Operation, OperationType, SyncState, TableName, Timestamp};
pub use services::LocalStore;
