//! Upload Mode Policy (spec §4.5): pure predicates over the configured
//! transport tables, with an atomic reload so the DB Writer and
//! granularity reducer never observe a half-updated table set.

use std::collections::HashSet;

use ignite_config::{UploadMode, UploadModeConfig};
use parking_lot::RwLock;

/// Snapshot of the upload-mode tables, queried by predicate methods.
pub struct UploadModePolicy {
    state: RwLock<UploadModeConfig>,
}

impl UploadModePolicy {
    /// Build a policy from an initial configuration.
    pub fn new(config: UploadModeConfig) -> Self {
        Self {
            state: RwLock::new(config),
        }
    }

    /// Atomically swap in a freshly reloaded configuration.
    pub fn reload(&self, config: UploadModeConfig) {
        *self.state.write() = config;
    }

    fn mode_supported(&self, mode: UploadMode) -> bool {
        self.state.read().supported_modes.contains(&mode)
    }

    fn event_supported_for(&self, event_id: &str, mode: UploadMode) -> bool {
        let cfg = self.state.read();
        if !cfg.supported_modes.contains(&mode) {
            return false;
        }
        if let Some(overrides) = cfg.event_list.get(&mode) {
            if overrides.iter().any(|e| e == event_id) {
                return true;
            }
            // An event explicitly overridden into a *different* mode is
            // excluded from this one even if it's in the default set.
            let overridden_elsewhere = cfg
                .event_list
                .iter()
                .filter(|(m, _)| **m != mode)
                .any(|(_, ids)| ids.iter().any(|e| e == event_id));
            if overridden_elsewhere {
                return false;
            }
        }
        cfg.default_mode.contains(&mode)
    }

    /// Whether `event_id` is eligible for the stream (per-event MQTT
    /// publish) transport.
    pub fn is_event_supported_for_stream(&self, event_id: &str) -> bool {
        self.event_supported_for(event_id, UploadMode::Stream)
    }

    /// Whether `event_id` is eligible for the batch (offline bulk upload)
    /// transport.
    pub fn is_event_supported_for_batch(&self, event_id: &str) -> bool {
        self.event_supported_for(event_id, UploadMode::Batch)
    }

    /// Global capability flag: is stream mode supported at all.
    pub fn is_stream_mode_supported(&self) -> bool {
        self.mode_supported(UploadMode::Stream)
    }

    /// Global capability flag: is batch mode supported at all.
    pub fn is_batch_mode_supported(&self) -> bool {
        self.mode_supported(UploadMode::Batch)
    }

    /// Whether anonymous (pre-activation) upload is permitted.
    pub fn is_anonymous_upload_supported(&self) -> bool {
        self.state.read().anonymous_upload_supported
    }

    /// Whether store-and-forward (buffering while offline) is supported.
    pub fn is_store_and_forward_supported(&self) -> bool {
        self.state.read().store_and_forward_supported
    }

    /// Every event id explicitly or by-default routed to the stream
    /// transport — the granularity reducer's mandatory-exemption set,
    /// since streamed events must never be deleted by reduction (spec
    /// §4.6).
    pub fn get_stream_mode_event_list(&self) -> HashSet<String> {
        self.state
            .read()
            .event_list
            .get(&UploadMode::Stream)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect()
    }

    /// Every event id explicitly routed to the batch transport.
    pub fn get_batch_mode_event_list(&self) -> HashSet<String> {
        self.state
            .read()
            .event_list
            .get(&UploadMode::Batch)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> UploadModeConfig {
        let mut event_list = HashMap::new();
        event_list.insert(UploadMode::Stream, vec!["Speed".to_string()]);
        event_list.insert(UploadMode::Batch, vec!["DTCStored".to_string()]);
        UploadModeConfig {
            supported_modes: vec![UploadMode::Stream, UploadMode::Batch],
            default_mode: vec![UploadMode::Batch],
            event_list,
            anonymous_upload_supported: false,
            store_and_forward_supported: true,
        }
    }

    #[test]
    fn explicit_override_wins() {
        let policy = UploadModePolicy::new(config());
        assert!(policy.is_event_supported_for_stream("Speed"));
        assert!(!policy.is_event_supported_for_batch("Speed"));
    }

    #[test]
    fn unlisted_event_falls_back_to_default_mode() {
        let policy = UploadModePolicy::new(config());
        assert!(policy.is_event_supported_for_batch("Unlisted"));
        assert!(!policy.is_event_supported_for_stream("Unlisted"));
    }

    #[test]
    fn reload_swaps_tables_atomically() {
        let policy = UploadModePolicy::new(config());
        let mut next = config();
        next.default_mode = vec![UploadMode::Stream];
        policy.reload(next);
        assert!(policy.is_event_supported_for_stream("Unlisted"));
    }
}
