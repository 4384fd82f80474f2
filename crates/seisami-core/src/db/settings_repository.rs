//! Local key/value settings

use libsql::{params, Connection};
use uuid::Uuid;

use crate::error::Result;

const DEVICE_ID_KEY: &str = "device_id";

/// Trait for local settings storage (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Read a setting
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a setting
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// The id stamped on operations produced by this store, generated on first use
    async fn device_id(&self) -> Result<String> {
        if let Some(id) = self.get(DEVICE_ID_KEY).await? {
            return Ok(id);
        }
        let id = Uuid::now_v7().to_string();
        self.set(DEVICE_ID_KEY, &id).await?;
        tracing::info!(device_id = %id, "Generated device id");
        Ok(id)
    }
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", params![key])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                params![key, value],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_device_id_is_stable() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlSettingsRepository::new(db.connection());

        let first = repo.device_id().await.unwrap();
        let second = repo.device_id().await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_overwrites_value() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlSettingsRepository::new(db.connection());

        repo.set("k", "a").await.unwrap();
        repo.set("k", "b").await.unwrap();
        assert_eq!(repo.get("k").await.unwrap().as_deref(), Some("b"));
        assert_eq!(repo.get("other").await.unwrap(), None);
    }
}
