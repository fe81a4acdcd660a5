//! Alert upload worker (spec §4.9): up to 20 unpublished alerts per cycle,
//! published as one JSON array, retried against the broker's ack up to 10
//! times before the row is left for the next process restart to retry.

use std::sync::Arc;
use std::time::Duration;

use ignite_bus::SuspendWatcher;
use ignite_config::ConfigTree;
use ignite_crypto::Envelope;
use ignite_store_sqlite::SqliteStore;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::{MqttClient, MqttError, PublishOutcome};
use crate::compression::gzip;

const MAX_ALERTS_PER_BATCH: u32 = 20;
const ACK_RETRY_ATTEMPTS: u32 = 10;
const ACK_RETRY_SPACING: Duration = Duration::from_secs(1);

/// Category recorded for a failed alert publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// The MQTT client had no live connection.
    NoConnection,
    /// The broker rejected or errored the publish call itself.
    PublishError,
    /// The broker accepted the call but returned a non-positive `mid`.
    DataNotAvailable,
}

/// Drives the periodic alert upload cycle.
pub struct AlertWorker {
    store: SqliteStore,
    envelope: Arc<Envelope>,
    client: Arc<dyn MqttClient>,
    config: Arc<ConfigTree>,
    alerts_topic: String,
    suspend: SuspendWatcher,
    shutdown: broadcast::Receiver<()>,
}

impl AlertWorker {
    /// Build the worker. `alerts_topic` is the broker-configured alert
    /// topic — an external-collaborator detail, not part of the device's
    /// own configuration tree, so it's supplied directly rather than read
    /// from [`ConfigTree`].
    pub fn new(
        store: SqliteStore,
        envelope: Arc<Envelope>,
        client: Arc<dyn MqttClient>,
        config: Arc<ConfigTree>,
        alerts_topic: String,
        suspend: SuspendWatcher,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            store,
            envelope,
            client,
            config,
            alerts_topic,
            suspend,
            shutdown,
        }
    }

    /// Run the periodic cycle until shutdown fires.
    pub async fn run(mut self) {
        loop {
            let period = Duration::from_secs(self.config.snapshot().mqtt.alert_periodicity_s.max(1));
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("alert worker shutting down");
                    return;
                }
                _ = sleep(period) => {
                    self.suspend.wait_until_running().await;
                    if let Err(category) = self.run_cycle().await {
                        warn!(?category, "alert upload cycle failed");
                    }
                }
            }
        }
    }

    async fn run_cycle(&mut self) -> Result<(), FailureCategory> {
        let rows = self
            .store
            .events()
            .query_unpublished_alerts(MAX_ALERTS_PER_BATCH)
            .await
            .map_err(|_| FailureCategory::DataNotAvailable)?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut decrypted = Vec::with_capacity(rows.len());
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.envelope.open(&row.payload_blob, None) {
                Ok(plaintext) => match serde_json::from_slice::<Value>(&plaintext) {
                    Ok(value) => {
                        decrypted.push(value);
                        ids.push(row.id.expect("persisted row always has an id"));
                    }
                    Err(e) => warn!(error = %e, "dropping malformed alert payload from batch"),
                },
                Err(e) => warn!(error = %e, "dropping undecryptable alert payload from batch"),
            }
        }
        if decrypted.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(&Value::Array(decrypted)).map_err(|_| FailureCategory::PublishError)?;
        let compressed = self.config.snapshot().mqtt.compression;
        let payload = if compressed {
            match gzip(&body) {
                Ok(g) => g,
                Err(e) => {
                    warn!(error = %e, "gzip compression failed, leaving batch for next cycle");
                    return Err(FailureCategory::PublishError);
                }
            }
        } else {
            body
        };

        if !self.client.is_connected() {
            return Err(FailureCategory::NoConnection);
        }

        let mid = match self.client.publish(&self.alerts_topic, &payload).await {
            Ok(PublishOutcome::Accepted(mid)) if mid > 0 => mid,
            Ok(PublishOutcome::Accepted(_)) => return Err(FailureCategory::DataNotAvailable),
            Err(MqttError::NotConnected) => return Err(FailureCategory::NoConnection),
            Err(MqttError::PublishFailed(_)) => return Err(FailureCategory::PublishError),
        };

        self.store
            .events()
            .mark_alert_published(&ids, mid)
            .await
            .map_err(|_| FailureCategory::PublishError)?;

        self.await_ack_and_delete(mid).await
    }

    async fn await_ack_and_delete(&self, mid: i64) -> Result<(), FailureCategory> {
        for attempt in 0..ACK_RETRY_ATTEMPTS {
            match self.client.wait_for_ack(mid).await {
                Ok(()) => {
                    let deleted = self
                        .store
                        .events()
                        .delete_alert_by_mid(mid)
                        .await
                        .map_err(|_| FailureCategory::PublishError)?;
                    debug!(mid, deleted, "alert batch acked");
                    return Ok(());
                }
                Err(_) if attempt + 1 < ACK_RETRY_ATTEMPTS => sleep(ACK_RETRY_SPACING).await,
                Err(e) => {
                    warn!(mid, error = %e, "alert batch never acked, leaving mid set for restart recovery");
                    return Err(FailureCategory::PublishError);
                }
            }
        }
        Err(FailureCategory::PublishError)
    }
}
