//! Interval Validator (spec §4.4, stage 2): per-event-id minimum
//! inter-event interval, with `-1` meaning "drop every instance".

use std::collections::HashMap;

use async_trait::async_trait;

use crate::chain::{DropReason, Handler, HandlerOutcome, StagedEvent};

/// Holds per-event-id minimum intervals and the timestamp of the last
/// admitted instance of each.
pub struct IntervalValidator {
    min_interval_ms: HashMap<String, i64>,
    last_admitted_ms: HashMap<String, i64>,
}

impl IntervalValidator {
    /// Build a validator from the configured `DAM.Database.IntervalList`.
    pub fn new(min_interval_ms: HashMap<String, i64>) -> Self {
        Self {
            min_interval_ms,
            last_admitted_ms: HashMap::new(),
        }
    }

    /// Replace the configured interval table (spec §4.11 config reload).
    pub fn reload(&mut self, min_interval_ms: HashMap<String, i64>) {
        self.min_interval_ms = min_interval_ms;
    }

    /// `true` iff `(event_id, ts)` should be admitted: unconfigured event
    /// ids always pass; configured ids pass only if enough time elapsed
    /// since the last admitted instance; `-1` drops every instance.
    pub fn admit(&mut self, event_id: &str, timestamp_ms: i64) -> bool {
        let Some(&min_interval) = self.min_interval_ms.get(event_id) else {
            return true;
        };
        if min_interval < 0 {
            return false;
        }
        let admitted = match self.last_admitted_ms.get(event_id) {
            Some(&last) => timestamp_ms - last >= min_interval,
            None => true,
        };
        if admitted {
            self.last_admitted_ms.insert(event_id.to_string(), timestamp_ms);
        }
        admitted
    }
}

#[async_trait]
impl Handler for IntervalValidator {
    async fn admit(&mut self, event: StagedEvent) -> HandlerOutcome {
        if event.is_alert {
            return HandlerOutcome::Continue(event);
        }
        if IntervalValidator::admit(self, &event.event_id.0, event.timestamp_ms) {
            HandlerOutcome::Continue(event)
        } else {
            HandlerOutcome::Dropped(DropReason::IntervalNotElapsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_event_always_admitted() {
        let mut v = IntervalValidator::new(HashMap::new());
        assert!(v.admit("Speed", 0));
        assert!(v.admit("Speed", 1));
    }

    #[test]
    fn configured_interval_enforced() {
        let mut intervals = HashMap::new();
        intervals.insert("Speed".to_string(), 1000);
        let mut v = IntervalValidator::new(intervals);
        assert!(v.admit("Speed", 0));
        assert!(!v.admit("Speed", 500));
        assert!(v.admit("Speed", 1000));
    }

    #[test]
    fn negative_one_drops_every_instance() {
        let mut intervals = HashMap::new();
        intervals.insert("Debug".to_string(), -1);
        let mut v = IntervalValidator::new(intervals);
        assert!(!v.admit("Debug", 0));
        assert!(!v.admit("Debug", 10_000));
    }
}
