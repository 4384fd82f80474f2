//! Database layer for Seisami

mod connection;
mod entity_store;
mod migrations;
mod operation_log;
mod settings_repository;
mod sync_state_repository;

pub use connection::Database;
pub use entity_store::{EntityStore, LibSqlEntityStore};
pub use operation_log::{LibSqlOperationLog, OperationLog};
pub use settings_repository::{LibSqlSettingsRepository, SettingsRepository};
pub use sync_state_repository::{LibSqlSyncStateRepository, SyncStateRepository};
