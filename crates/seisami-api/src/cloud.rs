//! Per-user cloud stores
//!
//! Every user gets an isolated libSQL database under the data directory.
//! Stores are opened lazily and cached for the life of the process.

use std::collections::HashMap;
use std::path::PathBuf;

use seisami_core::LocalStore;
use tokio::sync::Mutex;

use crate::error::AppError;

const MAX_USER_ID_LEN: usize = 128;

pub struct CloudStore {
    data_dir: Option<PathBuf>,
    stores: Mutex<HashMap<String, LocalStore>>,
}

impl CloudStore {
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Store for one user, opening (and migrating) it on first use.
    pub async fn store_for(&self, user_id: &str) -> Result<LocalStore, AppError> {
        if !is_valid_user_id(user_id) {
            return Err(AppError::bad_request("user id is not usable as a store key"));
        }

        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(user_id) {
            return Ok(store.clone());
        }

        let store = match &self.data_dir {
            Some(dir) => LocalStore::open_path(dir.join(format!("user-{user_id}.db"))).await,
            None => LocalStore::open_in_memory().await,
        }
        .map_err(|error| {
            tracing::error!(%error, "Failed to open user store");
            AppError::Config("user store could not be opened".to_string())
        })?;

        tracing::info!(stores = stores.len() + 1, "Opened user store");
        stores.insert(user_id.to_string(), store.clone());
        Ok(store)
    }

    pub async fn open_count(&self) -> usize {
        self.stores.lock().await.len()
    }
}

fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}
