#![forbid(unsafe_code)]

//! **ignite-coordinator** – wires the rest of the core crates into a running
//! process: spawns the writer, MQTT upload workers, the granularity-reduction
//! monitor, and the activation poller, then drives a coordinated shutdown
//! (spec §5).
//!
//! This crate owns task lifecycle only. Every dependency it spawns tasks
//! around — the store, the handler chain, the MQTT client, the Token
//! Manager — is built by the caller (the `ignite-client` binary), which is
//! where concrete transports and concrete handler stages are assembled.

mod materializer;
mod monitor;
mod writer;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ignite_auth::TokenManager;
use ignite_bus::{suspend_channel, EventBus};
use ignite_config::ConfigTree;
use ignite_crypto::Envelope;
use ignite_granularity::GranularityReducer;
use ignite_handlers::{HandlerChain, UploadModePolicy};
use ignite_mqtt::{AlertWorker, EventWorker, MqttClient};
use ignite_queue::EventQueue;
use ignite_settings::SettingsStore;
use ignite_store_sqlite::SqliteStore;
use ignite_types::local_config_keys;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Grace period given to the writer task to flush the queue after shutdown
/// is signaled, before the coordinator gives up waiting on it (spec §5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// How often the activation poller drives [`TokenManager::get_token`]
/// forward and re-checks the shared `activated` latch.
const ACTIVATION_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Everything [`Coordinator`] needs, already constructed by the caller.
pub struct CoordinatorDeps {
    pub store: SqliteStore,
    pub config: Arc<ConfigTree>,
    pub bus: Arc<dyn EventBus>,
    pub queue: Arc<EventQueue>,
    pub chain: HandlerChain,
    pub token_manager: Arc<TokenManager>,
    /// Shared with the chain's `DbWriterStage`; flipped once activation has
    /// ever completed so the gate latches rather than flapping on
    /// transient login failures.
    pub activated: Arc<AtomicBool>,
    /// Shared with the chain's `DbWriterStage`; holds the persisted
    /// `activationTS` (spec §4.7) once the Token Manager has recorded one,
    /// so the plausibility check in §4.10 has a baseline.
    pub activation_ts: Arc<AtomicI64>,
    pub mqtt_client: Arc<dyn MqttClient>,
    pub envelope: Arc<Envelope>,
    pub alerts_topic: String,
    pub events_topic: String,
    pub upload_policy: Arc<UploadModePolicy>,
    pub settings: Arc<SettingsStore>,
}

/// Owns the spawned tasks and the shutdown signal.
pub struct Coordinator {
    shutdown_tx: broadcast::Sender<()>,
    force_upload: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

/// Returned by [`Coordinator::shutdown`]: whether every task exited inside
/// the grace period.
pub struct ShutdownOutcome {
    pub clean: bool,
}

impl Coordinator {
    /// Start every background task. Returns once everything is spawned;
    /// call [`Coordinator::shutdown`] to stop them.
    pub async fn start(deps: CoordinatorDeps) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let force_upload = Arc::new(Notify::new());
        let (suspend_handle, suspend_watcher_events) = suspend_channel();
        let suspend_watcher_alerts = suspend_watcher_events.clone();

        if let Err(e) = deps.settings.replay_on_startup().await {
            warn!(error = %e, "failed to replay persisted config overlay on startup");
        }

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(writer::run(
            deps.queue.clone(),
            deps.chain,
            shutdown_tx.subscribe(),
        )));

        let reducer = GranularityReducer::new(
            deps.store.clone(),
            deps.config.snapshot().dam.database.granularity_reduction.clone(),
            deps.upload_policy.clone(),
            deps.bus.clone(),
            suspend_handle,
        );
        tasks.push(tokio::spawn(monitor::run(
            deps.store.clone(),
            deps.config.clone(),
            reducer,
            deps.bus.clone(),
            shutdown_tx.subscribe(),
        )));

        let event_worker = EventWorker::new(
            deps.store.clone(),
            deps.envelope.clone(),
            deps.mqtt_client.clone(),
            deps.config.clone(),
            deps.events_topic,
            suspend_watcher_events,
            shutdown_tx.subscribe(),
            force_upload.clone(),
        );
        tasks.push(tokio::spawn(event_worker.run()));

        let alert_worker = AlertWorker::new(
            deps.store.clone(),
            deps.envelope.clone(),
            deps.mqtt_client.clone(),
            deps.config.clone(),
            deps.alerts_topic,
            suspend_watcher_alerts,
            shutdown_tx.subscribe(),
        );
        tasks.push(tokio::spawn(alert_worker.run()));

        tasks.push(tokio::spawn(activation_poll(
            deps.token_manager,
            deps.store.clone(),
            deps.activated,
            deps.activation_ts,
            shutdown_tx.subscribe(),
        )));

        tasks.push(tokio::spawn(materializer::run(
            deps.store.clone(),
            deps.envelope.clone(),
            deps.upload_policy.clone(),
            deps.bus.clone(),
            shutdown_tx.subscribe(),
        )));

        Self {
            shutdown_tx,
            force_upload,
            tasks,
        }
    }

    /// Wake the event worker immediately rather than waiting out its
    /// periodicity — used when an external caller wants an out-of-band
    /// upload cycle.
    pub fn force_upload(&self) {
        self.force_upload.notify_one();
    }

    /// Signal every task to stop, then wait up to [`SHUTDOWN_GRACE`] for
    /// them to finish flushing. Tasks still running after the grace period
    /// are abandoned (their `JoinHandle`s are dropped, not aborted) so an
    /// in-flight transaction is never cut short mid-write.
    pub async fn shutdown(self) -> ShutdownOutcome {
        let _ = self.shutdown_tx.send(());
        match timeout(SHUTDOWN_GRACE, join_all(self.tasks)).await {
            Ok(()) => {
                info!("coordinator shutdown completed within grace period");
                ShutdownOutcome { clean: true }
            }
            Err(_) => {
                warn!("coordinator shutdown exceeded grace period, abandoning remaining tasks");
                ShutdownOutcome { clean: false }
            }
        }
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "coordinator task panicked");
        }
    }
}

/// Keeps the device activated and its token fresh, latching `activated`
/// once login/passcode are on file so the DB Writer's gate never flaps
/// back closed on a later transient login failure. Also refreshes
/// `activation_ts` from local config once the Token Manager has persisted
/// one (spec §4.7), so the DB Writer's invalid-timestamp plausibility
/// check (spec §4.10) has a baseline as soon as it's available.
async fn activation_poll(
    token_manager: Arc<TokenManager>,
    store: SqliteStore,
    activated: Arc<AtomicBool>,
    activation_ts: Arc<AtomicI64>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        if let Err(e) = token_manager.get_token().await {
            warn!(error = %e, "token manager could not produce a token this cycle");
        }

        match (
            store.local_config().get(local_config_keys::LOGIN).await,
            store.local_config().get(local_config_keys::PASSCODE).await,
        ) {
            (Ok(Some(_)), Ok(Some(_))) => activated.store(true, Ordering::Relaxed),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to read activation credential from local config")
            }
            _ => {}
        }

        match store.local_config().get(local_config_keys::ACTIVATION_TS).await {
            Ok(Some(raw)) => {
                if let Ok(ts) = raw.parse::<i64>() {
                    activation_ts.store(ts, Ordering::Relaxed);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read activationTS from local config"),
        }

        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(ACTIVATION_POLL_INTERVAL) => {}
        }
    }
}
