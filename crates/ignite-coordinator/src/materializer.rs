//! Drains the `CoreEvent` bus and materializes the notifications that must
//! outlive the cycle they fired in into stored rows: granularity reports
//! (spec §4.6), size-limit purges (§4.6, §4.10), activation rotation
//! (§4.7), and session transitions (§4.4). Without a subscriber these are
//! broadcast to nobody and the process behaves as if they never happened.
//!
//! `IgniteClientLaunched` is deliberately not handled here: its row is
//! already written through the normal handler chain admission (the event
//! id reaches the DB Writer like any producer-emitted event); the bus
//! publish is purely a one-shot in-process notification for other
//! subsystems.

use std::sync::Arc;

use ignite_bus::{CoreEvent, EventBus};
use ignite_crypto::Envelope;
use ignite_handlers::UploadModePolicy;
use ignite_store_sqlite::{NewAlert, NewEvent, SqliteStore};
use ignite_types::{synthetic, EventName};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run until `shutdown` fires, materializing bus notifications as they
/// arrive.
pub async fn run(
    store: SqliteStore,
    envelope: Arc<Envelope>,
    upload_policy: Arc<UploadModePolicy>,
    bus: Arc<dyn EventBus>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut rx = bus.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            received = rx.recv() => {
                match received {
                    Ok(event) => handle(&store, &envelope, &upload_policy, event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "materializer lagged behind the event bus, some rows were not stored");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

async fn handle(store: &SqliteStore, envelope: &Envelope, upload_policy: &UploadModePolicy, event: CoreEvent) {
    match event {
        CoreEvent::GranularityReductionReport { policy, db_size_before, db_size_after, db_size_gained } => {
            let payload = json!({
                "Policy": policy,
                "DBSizeBefore": db_size_before,
                "DBSizeAfter": db_size_after,
                "DBSizeGained": db_size_gained,
            });
            insert_system_event(store, envelope, upload_policy, synthetic::GRANULARITY_REDUCTION, &payload).await;
        }
        CoreEvent::DbOverLimit { action, events_deleted_from_ms, events_deleted_to_ms, is_invalid_timestamp_event } => {
            let payload = json!({
                "Action": action,
                "EventsDeletedFrom": events_deleted_from_ms,
                "EventsDeletedTo": events_deleted_to_ms,
                "IsInvalidTimstampEvent": is_invalid_timestamp_event,
            });
            insert_system_event(store, envelope, upload_policy, synthetic::DB_OVER_LIMIT, &payload).await;
        }
        CoreEvent::ActivationRotated { device_id, imei, serial_number, had_previous_device: _ } => {
            let alert_payload = json!({"id": device_id, "imei": imei, "serialNumber": serial_number});
            insert_system_alert(store, envelope, synthetic::ACTIVATION_ALERT, &alert_payload).await;

            let event_payload = json!({"id": device_id});
            insert_system_event(store, envelope, upload_policy, synthetic::ACTIVATION_EVENT, &event_payload).await;
        }
        CoreEvent::SessionTransition(transition) => {
            let payload = json!({"transition": transition});
            insert_system_event(store, envelope, upload_policy, synthetic::SESSION_STATUS, &payload).await;
        }
        CoreEvent::IgniteClientLaunched
        | CoreEvent::QueueOverflowResolved { .. }
        | CoreEvent::AttachmentDiscarded { .. }
        | CoreEvent::ConfigUpdated { .. } => {}
        // `CoreEvent` is `#[non_exhaustive]`; future variants default to
        // no stored row until a materializer is written for them.
        _ => {}
    }
}

async fn insert_system_event(
    store: &SqliteStore,
    envelope: &Envelope,
    upload_policy: &UploadModePolicy,
    event_id: &str,
    payload: &serde_json::Value,
) {
    let bytes = serde_json::to_vec(payload).expect("synthetic payload is always serializable JSON");
    let ciphertext = match envelope.seal(&bytes, None) {
        Ok(blob) => blob,
        Err(e) => {
            warn!(error = %e, event_id, "failed to encrypt synthetic event payload");
            return;
        }
    };

    let mut stream_flag = upload_policy.is_event_supported_for_stream(event_id);
    let mut batch_flag = upload_policy.is_event_supported_for_batch(event_id);
    if !stream_flag && !batch_flag {
        // A system diagnostic row must reach the store regardless of an
        // upload-mode config that happens not to list it.
        batch_flag = true;
        stream_flag = false;
    }

    let result = store
        .events()
        .insert_event(NewEvent {
            event_id: EventName::new(event_id),
            timestamp_ms: now_epoch_ms(),
            timezone_ms: 0,
            payload_blob: ciphertext,
            app_id: "ignite-client".to_string(),
            topic: String::new(),
            priority: 0,
            has_attach: false,
            stream_flag,
            batch_flag,
            granularity_level: 0,
            attachment_failure_reason: None,
        })
        .await;
    if let Err(e) = result {
        warn!(error = %e, event_id, "failed to insert synthetic event row");
    }
}

async fn insert_system_alert(store: &SqliteStore, envelope: &Envelope, event_id: &str, payload: &serde_json::Value) {
    let bytes = serde_json::to_vec(payload).expect("synthetic payload is always serializable JSON");
    let ciphertext = match envelope.seal(&bytes, None) {
        Ok(blob) => blob,
        Err(e) => {
            warn!(error = %e, event_id, "failed to encrypt synthetic alert payload");
            return;
        }
    };

    let result = store
        .events()
        .insert_alert(NewAlert {
            event_id: EventName::new(event_id),
            timestamp_ms: now_epoch_ms(),
            timezone_ms: 0,
            payload_blob: ciphertext,
            app_id: "ignite-client".to_string(),
            topic: String::new(),
            has_attach: false,
        })
        .await;
    if let Err(e) = result {
        warn!(error = %e, event_id, "failed to insert synthetic alert row");
    }
}
