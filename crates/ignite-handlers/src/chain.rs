//! The fixed, ordered handler chain (spec §4.4): Session Status Handler ->
//! Interval Validator -> DB Writer. A `Vec<Box<dyn Handler>>` built once at
//! startup, not a runtime-pluggable registry like the teacher kernel's
//! `OpcodeHandler` table — nothing in the spec calls for stages to be
//! added or removed after startup.

use async_trait::async_trait;
use ignite_types::{AttachmentFailureReason, EventName};

/// An event in flight through the chain, before it has been persisted.
#[derive(Debug, Clone)]
pub struct StagedEvent {
    /// Telemetry event identifier.
    pub event_id: EventName,
    /// Device-local timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Device timezone offset, milliseconds.
    pub timezone_ms: i32,
    /// Producing application id.
    pub app_id: String,
    /// MQTT topic, empty when untopiced.
    pub topic: String,
    /// Plaintext payload; encrypted by the DB Writer stage just before
    /// insertion.
    pub payload: Vec<u8>,
    /// Whether a file attachment accompanies this event.
    pub has_attach: bool,
    /// Alerts bypass session/interval gating and use a dedicated table.
    pub is_alert: bool,
    /// Upload priority (ignored for alerts, which are always maximal).
    pub priority: u8,
    /// Set by the DB Writer if an attachment had to be dropped.
    pub attachment_failure_reason: Option<AttachmentFailureReason>,
}

/// Why a [`StagedEvent`] was dropped instead of reaching the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No session in progress and the event id isn't exempted.
    OutOfSession,
    /// The Interval Validator's minimum spacing wasn't met, or the
    /// event id is configured to drop every instance (`-1`).
    IntervalNotElapsed,
    /// The device isn't activated and the event id isn't exempted.
    NotActivated,
    /// Neither transport (stream nor batch) accepts this event id; spec §3
    /// discards events eligible for neither rather than storing them.
    NoEligibleTransport,
    /// The chain fell off its end without a terminal stage — a
    /// misconfigured chain, never expected in a running process.
    ChainExhausted,
}

/// Result of one handler stage.
pub enum HandlerOutcome {
    /// Passed this stage; continues to the next with (possibly mutated)
    /// staged event.
    Continue(StagedEvent),
    /// Rejected; the event never reaches the store.
    Dropped(DropReason),
    /// Persisted by this stage (the DB Writer is always the terminal
    /// stage that produces this).
    Written,
}

/// One stage of the handler chain.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process `event`, returning whether it continues, is dropped, or was
    /// written to the store.
    async fn admit(&mut self, event: StagedEvent) -> HandlerOutcome;
}

/// The ordered chain of handler stages.
pub struct HandlerChain {
    stages: Vec<Box<dyn Handler>>,
}

impl HandlerChain {
    /// Build a chain from its stages, in order.
    pub fn new(stages: Vec<Box<dyn Handler>>) -> Self {
        Self { stages }
    }

    /// Run `event` through every stage until it's written or dropped.
    pub async fn process(&mut self, mut event: StagedEvent) -> HandlerOutcome {
        for stage in self.stages.iter_mut() {
            match stage.admit(event).await {
                HandlerOutcome::Continue(next) => event = next,
                other => return other,
            }
        }
        // Every chain must terminate in a stage that returns `Written` or
        // `Dropped`; falling off the end means the chain was misconfigured.
        HandlerOutcome::Dropped(DropReason::ChainExhausted)
    }
}
