//! Device-local persistent key/value state (spec §3): activation
//! credentials, the envelope IV, decoded token claims, activation-backoff
//! state. A flat `key TEXT PRIMARY KEY` table rather than typed columns,
//! since the set of keys ([`ignite_types::local_config_keys`]) is owned by
//! the callers, not by this crate.

use ignite_store_core::StorageError;
use ignite_types::LocalConfigEntry;
use sqlx::{Row as _, SqlitePool};

use crate::to_backend_err;

/// Typed access to the `local_config` table.
pub struct LocalConfigStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LocalConfigStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a single key's value, or `None` if unset.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM local_config WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool)
            .await
            .map_err(to_backend_err)?;
        match row {
            Some(r) => Ok(Some(r.try_get("value").map_err(to_backend_err)?)),
            None => Ok(None),
        }
    }

    /// Upsert a key/value pair.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO local_config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool)
        .await
        .map_err(to_backend_err)?;
        Ok(())
    }

    /// Remove a key, if present.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM local_config WHERE key = ?")
            .bind(key)
            .execute(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// All stored entries, for diagnostics and startup replay.
    pub async fn all(&self) -> Result<Vec<LocalConfigEntry>, StorageError> {
        let rows = sqlx::query("SELECT key, value FROM local_config")
            .fetch_all(self.pool)
            .await
            .map_err(to_backend_err)?;
        rows.into_iter()
            .map(|row| {
                Ok(LocalConfigEntry {
                    key: row.try_get("key").map_err(to_backend_err)?,
                    value: row.try_get("value").map_err(to_backend_err)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;
    use ignite_types::local_config_keys;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::PathBuf;

    async fn open_memory() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::from_pool(pool, PathBuf::from(":memory:"), true, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_and_upserts() {
        let store = open_memory().await;
        let cfg = store.local_config();
        cfg.set(local_config_keys::LOGIN, "device-1").await.unwrap();
        assert_eq!(
            cfg.get(local_config_keys::LOGIN).await.unwrap(),
            Some("device-1".to_string())
        );

        cfg.set(local_config_keys::LOGIN, "device-2").await.unwrap();
        assert_eq!(
            cfg.get(local_config_keys::LOGIN).await.unwrap(),
            Some("device-2".to_string())
        );
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store = open_memory().await;
        let cfg = store.local_config();
        assert_eq!(cfg.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = open_memory().await;
        let cfg = store.local_config();
        cfg.set("k", "v").await.unwrap();
        assert!(cfg.delete("k").await.unwrap());
        assert_eq!(cfg.get("k").await.unwrap(), None);
    }
}
