//! Session Status Handler (spec §4.4, stage 1): tracks ignition state and
//! emits synthetic `SessionStatus` transitions, dropping out-of-session
//! events unless they're alerts or explicitly exempted.

use std::sync::Arc;

use async_trait::async_trait;
use ignite_bus::{CoreEvent, EventBus};
use ignite_config::RpmIgnitionConfig;
use ignite_types::SessionTransition;
use tracing::warn;

use crate::chain::{DropReason, Handler, HandlerOutcome, StagedEvent};

/// Event id carrying an explicit platform ignition signal.
pub const EXPLICIT_IGNITION_EVENT_ID: &str = "IgnStatus";
/// Event id carrying an RPM reading used for ignition inference.
pub const RPM_EVENT_ID: &str = "RPM";

/// Raw ignition signal observed by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnitionSignal {
    /// Explicit `IgnStatus` event from the platform.
    Explicit(bool),
    /// RPM reading, interpreted per [`RpmIgnitionConfig`].
    Rpm(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IgnitionState {
    Unknown,
    On,
    Off,
}

/// Tracks ignition-derived session boundaries.
pub struct SessionStatusHandler {
    state: IgnitionState,
    session_in_progress: bool,
    rpm_config: RpmIgnitionConfig,
    exceptions: Vec<String>,
}

impl SessionStatusHandler {
    /// Build a handler. `exceptions` names event ids admitted even when no
    /// session is in progress (spec §4.4: "out-of-session events are
    /// dropped unless they are alerts or appear in a configured exception
    /// list").
    pub fn new(rpm_config: RpmIgnitionConfig, exceptions: Vec<String>) -> Self {
        Self {
            state: IgnitionState::Unknown,
            session_in_progress: false,
            rpm_config,
            exceptions,
        }
    }

    fn infer_from_rpm(&self, rpm: u32) -> Option<bool> {
        match self.rpm_config {
            RpmIgnitionConfig::Uniform(enabled) => enabled.then_some(rpm > 0),
            RpmIgnitionConfig::PerEdge { ign_on, ign_off } => {
                if rpm > 0 && ign_on {
                    Some(true)
                } else if rpm == 0 && ign_off {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    /// Observe a new ignition signal, returning a [`SessionTransition`] if
    /// this signal crossed a session boundary.
    pub fn observe(&mut self, signal: IgnitionSignal) -> Option<SessionTransition> {
        let ignition_on = match signal {
            IgnitionSignal::Explicit(on) => Some(on),
            IgnitionSignal::Rpm(rpm) => self.infer_from_rpm(rpm),
        }?;

        let next_state = if ignition_on { IgnitionState::On } else { IgnitionState::Off };
        if next_state == self.state {
            return None;
        }
        self.state = next_state;

        match (next_state, self.session_in_progress) {
            (IgnitionState::On, false) => {
                self.session_in_progress = true;
                Some(SessionTransition::Startup)
            }
            (IgnitionState::Off, true) => {
                self.session_in_progress = false;
                Some(SessionTransition::Shutdown)
            }
            _ => None,
        }
    }

    /// Whether an event with this id should be admitted given the current
    /// session state. Alerts always bypass this gate; callers should not
    /// call this for alert rows.
    pub fn admits(&self, event_id: &str) -> bool {
        self.session_in_progress || self.exceptions.iter().any(|e| e == event_id)
    }

    /// Whether a session is currently considered in progress.
    pub fn session_in_progress(&self) -> bool {
        self.session_in_progress
    }
}

/// Chain stage wrapping [`SessionStatusHandler`]: recognizes ignition
/// signal events, emits `SessionStatus` transitions onto the bus, and
/// drops out-of-session events.
pub struct SessionStatusStage {
    handler: SessionStatusHandler,
    bus: Arc<dyn EventBus>,
}

impl SessionStatusStage {
    /// Build the stage.
    pub fn new(handler: SessionStatusHandler, bus: Arc<dyn EventBus>) -> Self {
        Self { handler, bus }
    }
}

fn parse_bool_payload(payload: &[u8]) -> Option<bool> {
    serde_json::from_slice::<bool>(payload).ok()
}

fn parse_rpm_payload(payload: &[u8]) -> Option<u32> {
    serde_json::from_slice::<u32>(payload).ok()
}

#[async_trait]
impl Handler for SessionStatusStage {
    async fn admit(&mut self, event: StagedEvent) -> HandlerOutcome {
        if event.is_alert {
            return HandlerOutcome::Continue(event);
        }

        let signal = match event.event_id.0.as_str() {
            EXPLICIT_IGNITION_EVENT_ID => parse_bool_payload(&event.payload).map(IgnitionSignal::Explicit),
            RPM_EVENT_ID => parse_rpm_payload(&event.payload).map(IgnitionSignal::Rpm),
            _ => None,
        };

        if let Some(signal) = signal {
            if let Some(transition) = self.handler.observe(signal) {
                if let Err(e) = self.bus.publish(&CoreEvent::SessionTransition(transition)) {
                    warn!(error = %e, "failed to publish SessionStatus transition");
                }
            }
            // Ignition signal events themselves are always persisted.
            return HandlerOutcome::Continue(event);
        }

        if self.handler.admits(&event.event_id.0) {
            HandlerOutcome::Continue(event)
        } else {
            HandlerOutcome::Dropped(DropReason::OutOfSession)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_signal_drives_startup_then_shutdown() {
        let mut h = SessionStatusHandler::new(RpmIgnitionConfig::Uniform(false), vec![]);
        assert_eq!(h.observe(IgnitionSignal::Explicit(true)), Some(SessionTransition::Startup));
        assert!(h.session_in_progress());
        assert_eq!(h.observe(IgnitionSignal::Explicit(true)), None);
        assert_eq!(h.observe(IgnitionSignal::Explicit(false)), Some(SessionTransition::Shutdown));
        assert!(!h.session_in_progress());
    }

    #[test]
    fn rpm_inference_respects_independent_edges() {
        let mut h = SessionStatusHandler::new(
            RpmIgnitionConfig::PerEdge { ign_on: true, ign_off: false },
            vec![],
        );
        assert_eq!(h.observe(IgnitionSignal::Rpm(1500)), Some(SessionTransition::Startup));
        // off-edge disabled: RPM==0 should not end the session
        assert_eq!(h.observe(IgnitionSignal::Rpm(0)), None);
        assert!(h.session_in_progress());
    }

    #[test]
    fn out_of_session_event_dropped_unless_exempted() {
        let h = SessionStatusHandler::new(RpmIgnitionConfig::Uniform(false), vec!["Heartbeat".into()]);
        assert!(!h.admits("Speed"));
        assert!(h.admits("Heartbeat"));
    }
}
