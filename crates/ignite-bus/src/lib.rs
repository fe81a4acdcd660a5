#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ignite-bus** – in-process event bus and control-channel primitives for
//! the ignite-client core.
//!
//! Two concerns live here, both grounded on the same broadcast/watch-channel
//! shape: the [`CoreEvent`] pub/sub bus that carries the core's own
//! synthetic event notifications (overflow summaries, session transitions,
//! granularity reports, …) to any interested subsystem, and the
//! [`SuspendSignal`] used to replace the store → reducer → uploader cyclic
//! callback with an explicit control channel (see spec §9 REDESIGN FLAGS).

use std::sync::Arc;

use anyhow::Result;
use ignite_types::{AttachmentFailureReason, SessionTransition};
use tokio::sync::{broadcast, watch};

//─────────────────────────────
//  Core synthetic events
//─────────────────────────────

/// Notifications the core emits about its own behavior. These are distinct
/// from the stored [`ignite_types::EventRecord`]/[`ignite_types::AlertRecord`]
/// rows a variant may also cause to be inserted — the bus carries the
/// "this happened" signal so other subsystems can react without polling the
/// store.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CoreEvent {
    /// A run of rejected enqueue attempts was finally followed by an
    /// admission; carries the summary the queue inserts as
    /// `EventCacheOverflow`.
    QueueOverflowResolved {
        /// Number of rejected events in the run.
        count: u64,
        /// Total bytes rejected in the run.
        bytes: u64,
        /// Timestamp (ms) of the first rejection.
        start_ts_ms: i64,
        /// Timestamp (ms) the run was resolved (the admitting event's ts).
        end_ts_ms: i64,
    },
    /// Ignition/session transition detected by the session status handler.
    SessionTransition(SessionTransition),
    /// Emitted once, the first time `IgniteClientLaunched` is admitted.
    IgniteClientLaunched,
    /// A granularity reduction policy finished running.
    GranularityReductionReport {
        /// Policy name, e.g. `"RemoveAlternateSimilarEvent"`.
        policy: String,
        /// Database size in bytes before this policy ran.
        db_size_before: u64,
        /// Database size in bytes after this policy ran.
        db_size_after: u64,
        /// Bytes reclaimed by this policy (`before - after`, floored at 0).
        db_size_gained: u64,
    },
    /// The store (or invalid-event store) exceeded its size limit and rows
    /// were purged.
    DbOverLimit {
        /// `"Purge"` for the FIFO fallback; other actions may be added.
        action: String,
        /// Oldest timestamp (ms) among the deleted rows.
        events_deleted_from_ms: i64,
        /// Newest timestamp (ms) among the deleted rows.
        events_deleted_to_ms: i64,
        /// `true` when this purge was against the invalid-event store.
        is_invalid_timestamp_event: bool,
    },
    /// The device's `deviceId` changed across an activation.
    ActivationRotated {
        /// New device id.
        device_id: String,
        /// IMEI reported in the activation qualifier.
        imei: String,
        /// Serial number reported in the activation qualifier.
        serial_number: String,
        /// Whether a previous, different device id existed (disassociation
        /// is owed to the external application-state collaborator).
        had_previous_device: bool,
    },
    /// An event's attachment was discarded rather than uploaded.
    AttachmentDiscarded {
        /// Event id whose attachment was discarded.
        event_id: String,
        /// Reason the attachment could not be carried.
        reason: AttachmentFailureReason,
    },
    /// The config tree was rebuilt after a `update_config` push, so
    /// subsystems that cached values from it should refresh (spec §4.11
    /// step 5).
    ConfigUpdated {
        /// The source whose overlay triggered this rebuild.
        source: String,
        /// Dotted paths that changed in this push.
        paths: Vec<String>,
    },
}

/// Core event bus abstraction. Implementations must be thread-safe and
/// support multiple subscribers; a slow subscriber may miss events rather
/// than block publishers (matching the corpus's broadcast-bus convention).
pub trait EventBus: Send + Sync {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: &CoreEvent) -> Result<()>;

    /// Subscribe to the live event stream from this point forward.
    fn subscribe(&self) -> broadcast::Receiver<CoreEvent>;
}

/// Default in-memory, broadcast-only bus.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<CoreEvent>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryBus {
    /// Create a bus with the given ring buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, event: &CoreEvent) -> Result<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }
}

//─────────────────────────────
//  Suspend/resume control channel
//─────────────────────────────

/// Upload suspension state broadcast by the granularity reducer (and by
/// shutdown) to the MQTT uploader workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendState {
    /// Uploaders may proceed normally.
    Running,
    /// Uploaders must stop starting new batches and wait.
    Suspended,
}

/// Handle held by the component that controls suspension (the granularity
/// reducer, the coordinator on shutdown).
#[derive(Clone)]
pub struct SuspendHandle {
    tx: watch::Sender<SuspendState>,
}

/// Handle held by a worker that must honor suspension between batches.
#[derive(Clone)]
pub struct SuspendWatcher {
    rx: watch::Receiver<SuspendState>,
}

/// Create a linked suspend handle/watcher pair, starting in `Running`.
pub fn suspend_channel() -> (SuspendHandle, SuspendWatcher) {
    let (tx, rx) = watch::channel(SuspendState::Running);
    (SuspendHandle { tx }, SuspendWatcher { rx })
}

impl SuspendHandle {
    /// Suspend all watchers.
    pub fn suspend(&self) {
        let _ = self.tx.send(SuspendState::Suspended);
    }

    /// Resume all watchers.
    pub fn resume(&self) {
        let _ = self.tx.send(SuspendState::Running);
    }
}

impl SuspendWatcher {
    /// Current suspension state without waiting.
    pub fn current(&self) -> SuspendState {
        *self.rx.borrow()
    }

    /// Block until the state transitions to `Running`. Returns immediately
    /// if already running. Used between upload batches per spec §4.9's
    /// "sleep on a condition variable" backpressure rule.
    pub async fn wait_until_running(&mut self) {
        while *self.rx.borrow() == SuspendState::Suspended {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_basic_flow() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();
        let event = CoreEvent::IgniteClientLaunched;
        bus.publish(&event).unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn suspend_channel_gates_wait() {
        let (handle, mut watcher) = suspend_channel();
        handle.suspend();
        assert_eq!(watcher.current(), SuspendState::Suspended);

        let mut watcher2 = watcher.clone();
        let waited = tokio::spawn(async move {
            watcher2.wait_until_running().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        handle.resume();
        waited.await.unwrap();
        assert_eq!(watcher.current(), SuspendState::Running);
    }
}
