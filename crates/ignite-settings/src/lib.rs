#![forbid(unsafe_code)]

//! **ignite-settings** – the Service-Settings Store (spec §4.11): persists
//! cloud-pushed configuration overlays keyed by source, and drives the
//! `update_config` protocol that rebuilds [`ignite_config::ConfigTree`]
//! from them.

use std::collections::HashMap;
use std::sync::Arc;

use ignite_bus::{CoreEvent, EventBus};
use ignite_config::ConfigTree;
use ignite_store_sqlite::SqliteStore;
use serde_json::Value;
use tracing::{debug, warn};

/// Errors produced while applying a configuration overlay.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("storage error: {0}")]
    Storage(#[from] ignite_store_core::StorageError),
    #[error("config error: {0}")]
    Config(#[from] ignite_config::ConfigError),
    #[error("value for path {path:?} is not valid JSON: {source}")]
    InvalidValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Drives `update_config` and the startup overlay replay.
pub struct SettingsStore {
    store: SqliteStore,
    config: Arc<ConfigTree>,
    bus: Arc<dyn EventBus>,
}

impl SettingsStore {
    pub fn new(store: SqliteStore, config: Arc<ConfigTree>, bus: Arc<dyn EventBus>) -> Self {
        Self { store, config, bus }
    }

    /// Apply a cloud-pushed configuration overlay (spec §4.11's five-step
    /// protocol):
    ///
    /// 1. Clear existing rows for `source`.
    /// 2. Reload the file-defined configuration (reset to disk defaults).
    /// 3. Persist each new path/value under `source`.
    /// 4. Overlay the merged paths (union across every still-registered
    ///    source) onto the in-memory configuration tree.
    /// 5. Notify subscribers.
    pub async fn update_config(
        &self,
        paths: HashMap<String, Value>,
        source: &str,
        correlation_id: &str,
    ) -> Result<(), SettingsError> {
        let settings = self.store.service_settings();

        settings.clear_source(source).await?;
        self.config.reload_from_disk()?;

        for (path, value) in &paths {
            let value_json = serde_json::to_string(value).map_err(|e| SettingsError::InvalidValue {
                path: path.clone(),
                source: e,
            })?;
            settings.put(source, path, &value_json, correlation_id).await?;
        }

        let overlay = self.merged_overlay().await?;
        self.config.rebuild_with_overlay(&overlay)?;

        let changed_paths: Vec<String> = paths.keys().cloned().collect();
        if let Err(e) = self.bus.publish(&CoreEvent::ConfigUpdated {
            source: source.to_string(),
            paths: changed_paths,
        }) {
            warn!(error = %e, "failed to publish ConfigUpdated event");
        }

        debug!(source, pushed = paths.len(), "config overlay applied");
        Ok(())
    }

    /// Replay every persisted overlay (across all sources) onto on-disk
    /// defaults. Called once at startup so a cloud overlay survives a
    /// restart without needing the cloud to re-push it (spec §4.11).
    pub async fn replay_on_startup(&self) -> Result<(), SettingsError> {
        let overlay = self.merged_overlay().await?;
        if overlay.is_empty() {
            return Ok(());
        }
        self.config.rebuild_with_overlay(&overlay)?;
        debug!(overlays = overlay.len(), "replayed persisted config overlay at startup");
        Ok(())
    }

    /// The union of every persisted `(path, value)` pair across all
    /// sources, last-write-wins per path (row insertion order == push
    /// order, since `update_config` always clears its own source first).
    async fn merged_overlay(&self) -> Result<HashMap<String, Value>, SettingsError> {
        let rows = self.store.service_settings().all().await?;
        let mut merged = HashMap::new();
        for row in rows {
            match serde_json::from_str::<Value>(&row.value_json) {
                Ok(value) => {
                    merged.insert(row.setting_enum, value);
                }
                Err(e) => warn!(path = %row.setting_enum, error = %e, "dropping unparseable persisted overlay value"),
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ignite_bus::InMemoryBus;
    use ignite_config::IgniteConfig;
    use serde_json::json;
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

    fn sample_config_json() -> Value {
        json!({
            "HCPAuth": {
                "activate_url": "https://cloud.example/activate",
                "auth_url": "https://cloud.example/auth",
                "token_marginPercent": 10.0
            },
            "DAM": {
                "Database": {
                    "dbStore": "/data/ignite.db",
                    "dbSizeLimit": 10_000_000u64,
                    "eventStoreRecordSize": 200,
                    "maxInsertEventInOneTxn": 50,
                    "validateInterval": true,
                    "IntervalList": {},
                    "granularityReduction": {}
                },
                "CpuProcessesLog": {
                    "eventQueueMaxSize": 1024,
                    "eventInsertWindowSize": 256
                },
                "upload_after_activation": true,
                "activation_validator_exceptions": [],
                "session_status_exception_event": [],
                "use_rpm_for_ignition": false
            },
            "MQTT": {
                "compression": true,
                "event_periodicity_s": 60,
                "max_event_upload_cnt": 100,
                "alert_periodicity_s": 5,
                "force_upload_events": [],
                "topicprefix": "ignite/"
            }
        })
    }

    fn default_config() -> Arc<ConfigTree> {
        let cfg: IgniteConfig = serde_json::from_value(sample_config_json()).unwrap();
        Arc::new(ConfigTree::from_config(cfg).unwrap())
    }

    #[tokio::test]
    async fn update_config_persists_and_overlays() {
        let store = open_memory().await;
        let config = default_config();
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::default());
        let settings = SettingsStore::new(store, config.clone(), bus);

        let mut paths = HashMap::new();
        paths.insert("DAM.Database.dbSizeLimit".to_string(), Value::from(99_000_000u64));
        settings.update_config(paths, "cloud", "corr-1").await.unwrap();

        assert_eq!(config.snapshot().dam.database.db_size_limit, 99_000_000);
    }

    #[tokio::test]
    async fn clearing_a_sources_rows_and_reapplying_returns_to_defaults() {
        let store = open_memory().await;
        let config = default_config();
        let default_limit = config.snapshot().dam.database.db_size_limit;
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::default());
        let settings = SettingsStore::new(store, config.clone(), bus);

        let mut paths = HashMap::new();
        paths.insert("DAM.Database.dbSizeLimit".to_string(), Value::from(1u64));
        settings.update_config(paths, "cloud", "corr-1").await.unwrap();
        assert_eq!(config.snapshot().dam.database.db_size_limit, 1);

        settings.update_config(HashMap::new(), "cloud", "corr-2").await.unwrap();
        assert_eq!(config.snapshot().dam.database.db_size_limit, default_limit);
    }

    #[tokio::test]
    async fn replay_on_startup_restores_persisted_overlay() {
        let store = open_memory().await;
        let config = default_config();
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::default());
        let settings = SettingsStore::new(store.clone(), config.clone(), bus.clone());

        let mut paths = HashMap::new();
        paths.insert("MQTT.compression".to_string(), Value::from(false));
        settings.update_config(paths, "cloud", "corr-1").await.unwrap();

        // Simulate a fresh process: a new ConfigTree starting from disk
        // defaults, with the same persisted overlay rows still in the db.
        let fresh_config = default_config();
        let fresh_settings = SettingsStore::new(store, fresh_config.clone(), bus);
        fresh_settings.replay_on_startup().await.unwrap();

        assert!(!fresh_config.snapshot().mqtt.compression);
    }
}
