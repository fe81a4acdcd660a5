//! Activation Backoff (spec §4.8): exponential retry with jitter, state
//! persisted across restarts in local config.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Persisted backoff counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BackoffState {
    /// Consecutive failures since the last success.
    pub attempt: u32,
    /// Wall-clock epoch ms before which `proceed()` returns `false`.
    pub next_allowed_epoch_ms: i64,
}

/// Exponential backoff with a jitter term and a persisted next-allowed
/// instant, so a process restart doesn't reset the clock an adversarial
/// or misbehaving caller could otherwise exploit to retry immediately.
pub struct ActivationBackoff {
    state: BackoffState,
    base_delay_ms: i64,
    max_delay_ms: i64,
}

impl ActivationBackoff {
    /// Build a backoff controller from persisted state (or the default,
    /// zeroed state on first run).
    pub fn new(state: BackoffState, base_delay_ms: i64, max_delay_ms: i64) -> Self {
        Self { state, base_delay_ms, max_delay_ms }
    }

    /// Whether an activation attempt may proceed right now.
    pub fn proceed(&self, now_epoch_ms: i64) -> bool {
        now_epoch_ms >= self.state.next_allowed_epoch_ms
    }

    /// Clear the counter after a successful activation.
    pub fn reset(&mut self) {
        self.state = BackoffState::default();
    }

    /// Record a failure and push the next-allowed instant out
    /// exponentially, capped at `max_delay_ms`, with up to 20% jitter.
    pub fn calculate_next_retry(&mut self, now_epoch_ms: i64) {
        self.state.attempt = self.state.attempt.saturating_add(1);
        let exp_delay = self
            .base_delay_ms
            .saturating_mul(1i64 << self.state.attempt.min(20))
            .min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=(exp_delay / 5).max(1));
        self.state.next_allowed_epoch_ms = now_epoch_ms + exp_delay + jitter;
    }

    /// Current persisted state, for writing back to local config.
    pub fn state(&self) -> BackoffState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proceeds_immediately_with_fresh_state() {
        let backoff = ActivationBackoff::new(BackoffState::default(), 1000, 60_000);
        assert!(backoff.proceed(0));
    }

    #[test]
    fn failure_pushes_next_allowed_into_the_future() {
        let mut backoff = ActivationBackoff::new(BackoffState::default(), 1000, 60_000);
        backoff.calculate_next_retry(0);
        assert!(!backoff.proceed(0));
        assert!(backoff.state().next_allowed_epoch_ms >= 2000);
    }

    #[test]
    fn delay_is_capped() {
        let mut backoff = ActivationBackoff::new(BackoffState::default(), 1000, 5000);
        for _ in 0..10 {
            backoff.calculate_next_retry(0);
        }
        // capped delay plus at most 20% jitter
        assert!(backoff.state().next_allowed_epoch_ms <= 6000);
    }

    #[test]
    fn reset_clears_counter() {
        let mut backoff = ActivationBackoff::new(BackoffState::default(), 1000, 60_000);
        backoff.calculate_next_retry(0);
        backoff.reset();
        assert_eq!(backoff.state(), BackoffState::default());
        assert!(backoff.proceed(0));
    }
}
