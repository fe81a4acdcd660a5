//! Event upload worker (spec §4.9): per cycle, publish topiced events one
//! row at a time to their reconstructed topic, then publish non-topiced
//! stream events as one batched JSON array.
//!
//! Batch-mode (offline bulk HTTP upload) rows are left untouched here —
//! spec §6 defines no HTTP upload endpoint, only the MQTT surfaces, so that
//! transport is out of this core's scope (see `DESIGN.md`).

use std::sync::Arc;
use std::time::Duration;

use ignite_bus::SuspendWatcher;
use ignite_config::ConfigTree;
use ignite_crypto::Envelope;
use ignite_store_sqlite::{EventFilter, SqliteStore};
use ignite_types::{local_config_keys, EventRecord, RowId};
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::client::{MqttClient, PublishOutcome};
use crate::compression::gzip;
use crate::topic::reconstruct_topic;

/// Drives the periodic (and force-upload-triggered) event publish cycle.
pub struct EventWorker {
    store: SqliteStore,
    envelope: Arc<Envelope>,
    client: Arc<dyn MqttClient>,
    config: Arc<ConfigTree>,
    events_topic: String,
    suspend: SuspendWatcher,
    shutdown: broadcast::Receiver<()>,
    /// Notified by the DB Writer when a force-upload event id is admitted,
    /// so the worker wakes immediately rather than waiting out the period.
    force_upload: Arc<Notify>,
    log_iter_count: u64,
    summary_log_iter_count: u64,
}

impl EventWorker {
    /// `events_topic` is the broker-configured bulk-events topic — an
    /// external-collaborator detail supplied directly, same rationale as
    /// [`crate::alert_worker::AlertWorker::new`]'s `alerts_topic`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SqliteStore,
        envelope: Arc<Envelope>,
        client: Arc<dyn MqttClient>,
        config: Arc<ConfigTree>,
        events_topic: String,
        suspend: SuspendWatcher,
        shutdown: broadcast::Receiver<()>,
        force_upload: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            envelope,
            client,
            config,
            events_topic,
            suspend,
            shutdown,
            force_upload,
            log_iter_count: 0,
            summary_log_iter_count: 0,
        }
    }

    /// Run until shutdown fires.
    pub async fn run(mut self) {
        loop {
            let period = Duration::from_secs(self.config.snapshot().mqtt.event_periodicity_s.max(1));
            tokio::select! {
                _ = self.shutdown.recv() => {
                    debug!("event worker shutting down");
                    return;
                }
                _ = sleep(period) => {}
                _ = self.force_upload.notified() => {
                    debug!("event worker woken by force-upload notify");
                }
            }

            self.suspend.wait_until_running().await;

            self.log_iter_count += 1;
            self.summary_log_iter_count += 1;
            if self.log_iter_count % 50 == 0 {
                debug!(iterations = self.log_iter_count, "event worker cycle cadence");
            }

            if let Err(e) = self.run_topiced_cycle().await {
                warn!(error = %e, "topiced event upload cycle failed");
            }
            if let Err(e) = self.run_bulk_cycle().await {
                warn!(error = %e, "bulk event upload cycle failed");
            }

            if self.summary_log_iter_count % 100 == 0 {
                debug!(iterations = self.summary_log_iter_count, "event worker summary checkpoint");
            }
        }
    }

    async fn run_topiced_cycle(&self) -> Result<(), String> {
        let device_id = self
            .store
            .local_config()
            .get(local_config_keys::LOGIN)
            .await
            .map_err(|e| e.to_string())?
            .unwrap_or_default();
        if device_id.is_empty() {
            return Ok(());
        }

        let rows = self
            .store
            .events()
            .query_unpublished(&EventFilter::default())
            .await
            .map_err(|e| e.to_string())?;
        let topic_prefix = self.config.snapshot().mqtt.topic_prefix;
        let compression = self.config.snapshot().mqtt.compression;

        for row in rows.iter().filter(|r| !r.topic.is_empty()) {
            let Some(topic) = reconstruct_topic(&topic_prefix, &device_id, &row.topic) else {
                warn!(event_id = %row.event_id, topic = %row.topic, "malformed topiced event topic, leaving row in place");
                continue;
            };
            if let Err(e) = self.publish_single(row, &topic, compression).await {
                warn!(event_id = %row.event_id, error = %e, "topiced event publish failed");
            }
        }
        Ok(())
    }

    async fn publish_single(&self, row: &EventRecord, topic: &str, compression: bool) -> Result<(), String> {
        let plaintext = self.envelope.open(&row.payload_blob, None).map_err(|e| e.to_string())?;
        let payload = if compression {
            gzip(&plaintext).map_err(|e| e.to_string())?
        } else {
            plaintext
        };
        if !self.client.is_connected() {
            return Err("not connected".to_string());
        }
        let id = row.id.expect("persisted row always has an id");
        match self.client.publish(topic, &payload).await {
            Ok(PublishOutcome::Accepted(mid)) if mid > 0 => {
                self.ack_and_cleanup(&[id], mid).await;
                Ok(())
            }
            Ok(PublishOutcome::Accepted(_)) => Err("broker returned non-positive mid".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn run_bulk_cycle(&self) -> Result<(), String> {
        let max = self.config.snapshot().mqtt.clamped_max_event_upload_cnt();
        let rows = self
            .store
            .events()
            .query_unpublished(&EventFilter { limit: Some(max), ..Default::default() })
            .await
            .map_err(|e| e.to_string())?;

        let mut decrypted = Vec::new();
        let mut ids: Vec<RowId> = Vec::new();
        for row in rows.iter().filter(|r| r.topic.is_empty() && r.stream_flag) {
            match self.envelope.open(&row.payload_blob, None) {
                Ok(plaintext) => match serde_json::from_slice::<Value>(&plaintext) {
                    Ok(value) => {
                        decrypted.push(value);
                        ids.push(row.id.expect("persisted row always has an id"));
                    }
                    Err(e) => warn!(error = %e, "dropping malformed event payload from bulk batch"),
                },
                Err(e) => warn!(error = %e, "dropping undecryptable event payload from bulk batch"),
            }
        }
        if decrypted.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(&Value::Array(decrypted)).map_err(|e| e.to_string())?;
        let compression = self.config.snapshot().mqtt.compression;
        let payload = if compression {
            gzip(&body).map_err(|e| e.to_string())?
        } else {
            body
        };

        if !self.client.is_connected() {
            return Err("not connected".to_string());
        }
        match self.client.publish(&self.events_topic, &payload).await {
            Ok(PublishOutcome::Accepted(mid)) if mid > 0 => {
                self.ack_and_cleanup(&ids, mid).await;
                Ok(())
            }
            Ok(PublishOutcome::Accepted(_)) => Err("broker returned non-positive mid".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn ack_and_cleanup(&self, ids: &[RowId], mid: i64) {
        if let Err(e) = self.store.events().mark_published(ids, mid).await {
            warn!(error = %e, "failed to stamp mid on published event rows");
            return;
        }
        match self.client.wait_for_ack(mid).await {
            Ok(()) => {
                if let Err(e) = self.store.events().delete_by_mid(mid).await {
                    warn!(error = %e, "failed to delete acked event rows");
                }
            }
            Err(e) => {
                warn!(mid, error = %e, "event batch never acked, leaving mid set for restart recovery");
            }
        }
    }
}
