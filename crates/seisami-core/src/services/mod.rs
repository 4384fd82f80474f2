//! Services shared by the device CLI and the sync service

mod local_store;

pub use local_store::LocalStore;
