//! Wires a [`ignite_coordinator::CoordinatorDeps`] from a config file, a
//! device profile, and an on-disk store — the one place concrete
//! transports (HTTP, MQTT) meet the trait-only core crates.

use std::sync::atomic::{AtomicBool, AtomicI64};
use std::sync::Arc;

use ignite_auth::TokenManager;
use ignite_bus::{EventBus, InMemoryBus};
use ignite_config::ConfigTree;
use ignite_coordinator::CoordinatorDeps;
use ignite_crypto::{derive_activation_key, generate_iv_prefix, Envelope};
use ignite_handlers::{
    DbWriterStage, HandlerChain, IntervalValidator, SessionStatusHandler, SessionStatusStage, UploadModePolicy,
    ACTIVATION_TS_UNKNOWN,
};
use ignite_mqtt::MqttClient;
use ignite_queue::{EventQueue, OverflowSummary};
use ignite_settings::SettingsStore;
use ignite_store_sqlite::SqliteStore;
use ignite_types::{local_config_keys, synthetic, EventName, WireEvent};
use tracing::info;

use crate::device::DeviceProfile;
use crate::http_clients::ReqwestHttpClient;
use crate::mqtt_client::RumqttcClient;

const EVENT_BUS_CAPACITY: usize = 1024;

fn encode_overflow(summary: &OverflowSummary) -> Vec<u8> {
    let payload = serde_json::json!({
        "count": summary.count,
        "bytes": summary.bytes,
        "firstRejectionTsMs": summary.first_rejection_ts_ms,
        "lastRejectionTsMs": summary.last_rejection_ts_ms,
    });
    let wire = WireEvent {
        event_id: EventName::new(synthetic::EVENT_CACHE_OVERFLOW),
        timestamp_ms: summary.last_rejection_ts_ms,
        timezone_ms: 0,
        app_id: "ignite-client".to_string(),
        topic: String::new(),
        payload: serde_json::to_vec(&payload).unwrap_or_default(),
        has_attach: false,
        is_alert: false,
        priority: 0,
    };
    serde_json::to_vec(&wire).unwrap_or_default()
}

/// Derive the fixed key/IV pair used to encrypt telemetry payloads at rest.
/// Called twice at bootstrap (once for the shared `Arc<Envelope>` the
/// upload workers see, once for the `DbWriterStage`'s own owned copy) since
/// [`Envelope`] isn't `Clone`.
async fn telemetry_key_and_iv(
    store: &SqliteStore,
    qualifier_id: &str,
) -> anyhow::Result<([u8; 32], [u8; ignite_crypto::IV_PREFIX_LEN])> {
    let key = derive_activation_key(qualifier_id)?;
    let iv_prefix = load_or_create_iv_prefix(store).await?;
    Ok((key, iv_prefix))
}

async fn load_or_create_iv_prefix(store: &SqliteStore) -> anyhow::Result<[u8; ignite_crypto::IV_PREFIX_LEN]> {
    use base64::Engine;
    let local = store.local_config();
    if let Some(encoded) = local.get(local_config_keys::ENVELOPE_IV).await? {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        if bytes.len() == ignite_crypto::IV_PREFIX_LEN {
            let mut prefix = [0u8; ignite_crypto::IV_PREFIX_LEN];
            prefix.copy_from_slice(&bytes);
            return Ok(prefix);
        }
    }
    let prefix = generate_iv_prefix();
    let encoded = base64::engine::general_purpose::STANDARD.encode(prefix);
    local.set(local_config_keys::ENVELOPE_IV, &encoded).await?;
    Ok(prefix)
}

async fn load_backoff_state(store: &SqliteStore) -> anyhow::Result<ignite_auth::BackoffState> {
    match store.local_config().get(local_config_keys::ACTIVATION_BACKOFF_STATE).await? {
        Some(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
        None => Ok(ignite_auth::BackoffState::default()),
    }
}

async fn already_activated(store: &SqliteStore) -> anyhow::Result<bool> {
    let login = store.local_config().get(local_config_keys::LOGIN).await?;
    let passcode = store.local_config().get(local_config_keys::PASSCODE).await?;
    Ok(login.is_some() && passcode.is_some())
}

async fn load_activation_ts(store: &SqliteStore) -> anyhow::Result<i64> {
    match store.local_config().get(local_config_keys::ACTIVATION_TS).await? {
        Some(raw) => Ok(raw.parse().unwrap_or(ACTIVATION_TS_UNKNOWN)),
        None => Ok(ACTIVATION_TS_UNKNOWN),
    }
}

/// Build every dependency the coordinator needs, opening the store and
/// connecting the MQTT client along the way.
pub async fn bootstrap(
    config_path: &str,
    device_path: &str,
    db_path: &str,
) -> anyhow::Result<CoordinatorDeps> {
    let device: DeviceProfile = serde_json::from_str(&std::fs::read_to_string(device_path)?)?;
    let config = Arc::new(ConfigTree::from_file(config_path)?);
    let snapshot = config.snapshot();

    let default_stream = snapshot.upload_mode.default_mode.contains(&ignite_config::UploadMode::Stream);
    let default_batch = snapshot.upload_mode.default_mode.contains(&ignite_config::UploadMode::Batch);
    let store = SqliteStore::open(db_path, default_stream, default_batch).await?;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(EVENT_BUS_CAPACITY));
    let upload_policy = Arc::new(UploadModePolicy::new(snapshot.upload_mode.clone()));

    // One persisted IV prefix for the process, shared by every envelope —
    // nonce reuse is only a hazard under the same key, and each envelope
    // below derives a different key (spec §4.2).
    let (telemetry_key, iv_prefix) = telemetry_key_and_iv(&store, &device.identity.qualifier_id).await?;
    let envelope = Arc::new(Envelope::new(telemetry_key, iv_prefix));
    let db_writer_envelope = Envelope::new(telemetry_key, iv_prefix);

    let activated = Arc::new(AtomicBool::new(already_activated(&store).await?));
    let activation_ts = Arc::new(AtomicI64::new(load_activation_ts(&store).await?));

    let http_client = Arc::new(ReqwestHttpClient::new());
    let backoff_state = load_backoff_state(&store).await?;
    let envelope_factory: Arc<dyn Fn(&[u8; 32]) -> Envelope + Send + Sync> =
        Arc::new(move |key: &[u8; 32]| Envelope::new(*key, iv_prefix));

    let token_manager = Arc::new(TokenManager::new(
        device.identity.clone(),
        snapshot.hcp_auth.activate_url.clone(),
        snapshot.hcp_auth.auth_url.clone(),
        snapshot.hcp_auth.token_margin_percent,
        http_client.clone(),
        http_client,
        store.clone(),
        envelope_factory,
        bus.clone(),
        backoff_state,
    ));

    let mqtt_client: Arc<dyn MqttClient> = Arc::new(RumqttcClient::connect(
        &device.mqtt_client_id,
        &device.mqtt_host,
        device.mqtt_port,
        device.mqtt_username.as_deref(),
        device.mqtt_password.as_deref(),
    ));

    let queue = Arc::new(EventQueue::new(
        snapshot.dam.cpu_processes_log.queue_max_bytes,
        snapshot.dam.cpu_processes_log.window_bytes,
        encode_overflow,
    ));

    let session_handler = SessionStatusHandler::new(
        snapshot.dam.gate.use_rpm_for_ignition,
        snapshot.dam.gate.session_status_exception_event.clone(),
    );
    let chain = HandlerChain::new(vec![
        Box::new(SessionStatusStage::new(session_handler, bus.clone())),
        Box::new(IntervalValidator::new(snapshot.dam.database.interval_list.clone())),
        Box::new(DbWriterStage::new(
            store.clone(),
            db_writer_envelope,
            upload_policy.clone(),
            bus.clone(),
            activated.clone(),
            snapshot.dam.gate.activation_validator_exceptions.clone(),
            activation_ts.clone(),
        )),
    ]);

    let settings = Arc::new(SettingsStore::new(store.clone(), config.clone(), bus.clone()));

    info!(db_path, config_path, device_path, "ignite-client bootstrapped");

    Ok(CoordinatorDeps {
        store,
        config,
        bus,
        queue,
        chain,
        token_manager,
        activated,
        activation_ts,
        mqtt_client,
        envelope,
        alerts_topic: device.alerts_topic,
        events_topic: device.events_topic,
        upload_policy,
        settings,
    })
}
