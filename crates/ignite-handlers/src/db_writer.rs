//! DB Writer (spec §4.4, stage 3): the chain's terminal stage. Classifies
//! transport eligibility via the Upload Mode Policy, encrypts the payload,
//! inserts into the event or alert table, and enforces activation gating.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ignite_bus::{CoreEvent, EventBus};
use ignite_crypto::Envelope;
use ignite_store_sqlite::{NewAlert, NewEvent, SqliteStore};
use ignite_types::{synthetic, AttachmentFailureReason};
use tracing::warn;

use crate::chain::{DropReason, Handler, HandlerOutcome, StagedEvent};
use crate::upload_mode::UploadModePolicy;

/// Sentinel for [`DbWriterStage::activation_ts`] meaning "not yet known" —
/// no plausibility check is performed against it.
pub const ACTIVATION_TS_UNKNOWN: i64 = i64::MIN;

/// Terminal handler stage: encrypts and persists.
pub struct DbWriterStage {
    store: SqliteStore,
    envelope: Envelope,
    policy: Arc<UploadModePolicy>,
    bus: Arc<dyn EventBus>,
    activated: Arc<AtomicBool>,
    activation_exceptions: Vec<String>,
    launch_notified: AtomicBool,
    /// Persisted wall-clock activation timestamp (spec §4.7), shared with
    /// the activation poller. Events timestamped earlier than this predate
    /// activation and are quarantined rather than stored (spec §4.10).
    activation_ts: Arc<AtomicI64>,
}

impl DbWriterStage {
    /// Build the DB Writer stage. `activated` is shared with the Token
    /// Manager so activation state updates are observed without a reload.
    /// `activation_ts` is shared the same way; it starts at
    /// [`ACTIVATION_TS_UNKNOWN`] until the activation poller loads or
    /// refreshes it from local config.
    pub fn new(
        store: SqliteStore,
        envelope: Envelope,
        policy: Arc<UploadModePolicy>,
        bus: Arc<dyn EventBus>,
        activated: Arc<AtomicBool>,
        activation_exceptions: Vec<String>,
        activation_ts: Arc<AtomicI64>,
    ) -> Self {
        Self {
            store,
            envelope,
            policy,
            bus,
            activated,
            activation_exceptions,
            launch_notified: AtomicBool::new(false),
            activation_ts,
        }
    }

    fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Relaxed)
    }

    /// Whether `timestamp_ms` predates the known activation time. `false`
    /// when activation time isn't known yet, so nothing is quarantined
    /// before there's a baseline to quarantine against.
    fn predates_activation(&self, timestamp_ms: i64) -> bool {
        let known = self.activation_ts.load(Ordering::Relaxed);
        known != ACTIVATION_TS_UNKNOWN && timestamp_ms < known
    }

    async fn maybe_notify_launch(&self, event_id: &str) {
        if event_id == synthetic::IGNITE_CLIENT_LAUNCHED
            && !self.launch_notified.swap(true, Ordering::Relaxed)
        {
            if let Err(e) = self.bus.publish(&CoreEvent::IgniteClientLaunched) {
                warn!(error = %e, "failed to publish IgniteClientLaunched");
            }
        }
    }
}

#[async_trait]
impl Handler for DbWriterStage {
    async fn admit(&mut self, mut event: StagedEvent) -> HandlerOutcome {
        if !event.is_alert
            && !self.is_activated()
            && !self.activation_exceptions.iter().any(|e| e == &event.event_id.0)
        {
            return HandlerOutcome::Dropped(DropReason::NotActivated);
        }

        self.maybe_notify_launch(&event.event_id.0).await;

        let mut stream_ok = self.policy.is_event_supported_for_stream(&event.event_id.0);
        let mut batch_ok = self.policy.is_event_supported_for_batch(&event.event_id.0);

        // Topiced events bypass the per-event tables entirely: they force
        // stream when the transport is available at all, batch otherwise
        // (spec §3).
        if !event.topic.is_empty() {
            if self.policy.is_stream_mode_supported() {
                stream_ok = true;
            } else {
                batch_ok = true;
            }
        }

        // Stream/batch classification and the "neither" discard only apply
        // to the event table; alerts always take the dedicated alert path.
        if !event.is_alert && !stream_ok && !batch_ok {
            return HandlerOutcome::Dropped(DropReason::NoEligibleTransport);
        }

        // Stream-only events can't carry attachments; force-drop the
        // attachment rather than the event (spec §4.4).
        if event.has_attach && stream_ok && !batch_ok {
            event.has_attach = false;
            event.attachment_failure_reason = Some(AttachmentFailureReason::BatchModeUnsupported);
        }

        let ciphertext = match self.envelope.seal(&event.payload, None) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, event_id = %event.event_id, "failed to encrypt event payload, dropping");
                return HandlerOutcome::Dropped(DropReason::NotActivated);
            }
        };

        if !event.is_alert && self.predates_activation(event.timestamp_ms) {
            let result = self.store.invalid_events().insert(event.timestamp_ms, ciphertext).await;
            if let Err(e) = result {
                warn!(error = %e, event_id = %event.event_id, "failed to insert quarantined event row");
            }
            return HandlerOutcome::Written;
        }

        if event.is_alert {
            let result = self
                .store
                .events()
                .insert_alert(NewAlert {
                    event_id: event.event_id.clone(),
                    timestamp_ms: event.timestamp_ms,
                    timezone_ms: event.timezone_ms,
                    payload_blob: ciphertext,
                    app_id: event.app_id.clone(),
                    topic: event.topic.clone(),
                    has_attach: event.has_attach,
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "failed to insert alert row");
            }
            return HandlerOutcome::Written;
        }

        let result = self
            .store
            .events()
            .insert_event(NewEvent {
                event_id: event.event_id.clone(),
                timestamp_ms: event.timestamp_ms,
                timezone_ms: event.timezone_ms,
                payload_blob: ciphertext,
                app_id: event.app_id.clone(),
                topic: event.topic.clone(),
                priority: event.priority,
                has_attach: event.has_attach,
                stream_flag: stream_ok,
                batch_flag: batch_ok,
                granularity_level: 0,
                attachment_failure_reason: event.attachment_failure_reason,
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to insert event row");
        }
        HandlerOutcome::Written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ignite_bus::InMemoryBus;
    use ignite_config::{UploadMode, UploadModeConfig};
    use ignite_types::EventName;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicI64;

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

    fn envelope() -> Envelope {
        Envelope::new([7u8; 32], [1, 2, 3, 4])
    }

    fn batch_only_policy() -> Arc<UploadModePolicy> {
        Arc::new(UploadModePolicy::new(UploadModeConfig {
            supported_modes: vec![UploadMode::Batch],
            default_mode: vec![UploadMode::Batch],
            event_list: HashMap::new(),
            anonymous_upload_supported: false,
            store_and_forward_supported: true,
        }))
    }

    fn staged(event_id: &str, timestamp_ms: i64) -> StagedEvent {
        StagedEvent {
            event_id: EventName::new(event_id),
            timestamp_ms,
            timezone_ms: 0,
            app_id: "app".into(),
            topic: String::new(),
            payload: b"{}".to_vec(),
            has_attach: false,
            is_alert: false,
            priority: 0,
            attachment_failure_reason: None,
        }
    }

    async fn stage() -> DbWriterStage {
        let store = open_memory().await;
        DbWriterStage::new(
            store,
            envelope(),
            batch_only_policy(),
            Arc::new(InMemoryBus::new(16)),
            Arc::new(AtomicBool::new(true)),
            vec![],
            Arc::new(AtomicI64::new(ACTIVATION_TS_UNKNOWN)),
        )
    }

    #[tokio::test]
    async fn event_with_no_eligible_transport_is_dropped() {
        let policy = Arc::new(UploadModePolicy::new(UploadModeConfig {
            supported_modes: vec![],
            default_mode: vec![],
            event_list: HashMap::new(),
            anonymous_upload_supported: false,
            store_and_forward_supported: true,
        }));
        let mut stage = DbWriterStage::new(
            open_memory().await,
            envelope(),
            policy,
            Arc::new(InMemoryBus::new(16)),
            Arc::new(AtomicBool::new(true)),
            vec![],
            Arc::new(AtomicI64::new(ACTIVATION_TS_UNKNOWN)),
        );
        let outcome = stage.admit(staged("Speed", 100)).await;
        assert!(matches!(outcome, HandlerOutcome::Dropped(DropReason::NoEligibleTransport)));
    }

    #[tokio::test]
    async fn topiced_event_forces_batch_when_stream_unsupported() {
        let mut stage = stage().await;
        let mut event = staged("Custom", 100);
        event.topic = "anything/2c/foo/bar".into();
        let outcome = stage.admit(event).await;
        assert!(matches!(outcome, HandlerOutcome::Written));
    }

    #[tokio::test]
    async fn event_predating_activation_is_quarantined() {
        let store = open_memory().await;
        let mut stage = DbWriterStage::new(
            store.clone(),
            envelope(),
            batch_only_policy(),
            Arc::new(InMemoryBus::new(16)),
            Arc::new(AtomicBool::new(true)),
            vec![],
            Arc::new(AtomicI64::new(1_000)),
        );
        let outcome = stage.admit(staged("Speed", 500)).await;
        assert!(matches!(outcome, HandlerOutcome::Written));
        assert_eq!(store.events().count().await.unwrap(), 0);
        assert_eq!(store.invalid_events().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn event_after_activation_is_stored_normally() {
        let store = open_memory().await;
        let mut stage = DbWriterStage::new(
            store.clone(),
            envelope(),
            batch_only_policy(),
            Arc::new(InMemoryBus::new(16)),
            Arc::new(AtomicBool::new(true)),
            vec![],
            Arc::new(AtomicI64::new(1_000)),
        );
        let outcome = stage.admit(staged("Speed", 1_500)).await;
        assert!(matches!(outcome, HandlerOutcome::Written));
        assert_eq!(store.events().count().await.unwrap(), 1);
        assert_eq!(store.invalid_events().count().await.unwrap(), 0);
    }
}
