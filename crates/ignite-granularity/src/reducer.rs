//! Orchestrates the granularity reduction run (spec §4.6): suspend
//! uploaders, apply policies in configured order until the goal is met,
//! fall back to FIFO, resume uploaders.

use std::collections::HashSet;
use std::sync::Arc;

use ignite_bus::{CoreEvent, EventBus, SuspendHandle};
use ignite_config::GranularityReductionConfig;
use ignite_handlers::UploadModePolicy;
use ignite_store_core::StorageEngine;
use ignite_store_sqlite::SqliteStore;
use tracing::{info, warn};

use crate::policies::{
    remove_alternate_similar_event, remove_repeated_trigger_events_leave_first_and_last,
    remove_trigger_event_post_files, Checkpoint,
};

/// Drives one reduction pass against `store` until `free_storage_gain_percent`
/// of `db_size_limit` is reclaimed or every policy (plus the FIFO fallback)
/// has run.
pub struct GranularityReducer {
    store: SqliteStore,
    config: GranularityReductionConfig,
    upload_policy: Arc<UploadModePolicy>,
    bus: Arc<dyn EventBus>,
    suspend: SuspendHandle,
    checkpoint: Option<Checkpoint>,
}

impl GranularityReducer {
    /// Build a reducer bound to `store`, reading exemptions from
    /// `upload_policy`'s stream-mode list plus `config.exempt_event_ids`.
    pub fn new(
        store: SqliteStore,
        config: GranularityReductionConfig,
        upload_policy: Arc<UploadModePolicy>,
        bus: Arc<dyn EventBus>,
        suspend: SuspendHandle,
    ) -> Self {
        Self {
            store,
            config,
            upload_policy,
            bus,
            suspend,
            checkpoint: None,
        }
    }

    fn exemption_set(&self) -> HashSet<String> {
        let mut set = self.upload_policy.get_stream_mode_event_list();
        set.extend(self.config.exempt_event_ids.iter().cloned());
        set
    }

    fn publish_report(&self, policy: &str, before: u64, after: u64) {
        let gained = before.saturating_sub(after);
        let _ = self.bus.publish(&CoreEvent::GranularityReductionReport {
            policy: policy.to_string(),
            db_size_before: before,
            db_size_after: after,
            db_size_gained: gained,
        });
    }

    /// Run one reduction pass. `db_size_limit` bounds the goal
    /// (`free_storage_gain_percent` of it).
    pub async fn reduce(&mut self, db_size_limit: u64) -> Result<(), ignite_store_core::StorageError> {
        self.suspend.suspend();
        let result = self.reduce_inner(db_size_limit).await;
        self.suspend.resume();
        result
    }

    async fn reduce_inner(&mut self, db_size_limit: u64) -> Result<(), ignite_store_core::StorageError> {
        let goal_bytes = (self.config.free_storage_gain_percent / 100.0) * db_size_limit as f64;
        let mut freed: f64 = 0.0;
        let exempt = self.exemption_set();

        for policy_name in self.config.policy_order.clone() {
            if freed >= goal_bytes {
                break;
            }
            let before = self.store.size_bytes().await?;
            let rows = self.store.events().all_ordered_by_rowid().await?;

            let deleted_ids = match policy_name.as_str() {
                "RemoveAlternateSimilarEvent" => {
                    let (ids, checkpoint) = remove_alternate_similar_event(&rows, &exempt, self.checkpoint);
                    self.checkpoint = checkpoint;
                    ids
                }
                "RemoveRepeatedTriggerEvents_LeaveFirstAndLast" => {
                    remove_repeated_trigger_events_leave_first_and_last(
                        &rows,
                        &self.config.pre_trigger_suffix,
                        &self.config.post_trigger_suffix,
                        &exempt,
                    )
                }
                "RemoveTriggerEventPostFiles" => {
                    remove_trigger_event_post_files(&rows, &self.config.post_trigger_suffix, &exempt)
                }
                other => {
                    warn!(policy = other, "unknown granularity reduction policy, skipping");
                    continue;
                }
            };

            if !deleted_ids.is_empty() {
                self.store.events().delete_by_ids(&deleted_ids).await?;
                self.store.vacuum().await?;
            }

            let after = self.store.size_bytes().await?;
            freed += before.saturating_sub(after) as f64;
            info!(policy = %policy_name, freed_bytes = before.saturating_sub(after), "granularity policy complete");
            self.publish_report(&policy_name, before, after);
        }

        if freed < goal_bytes {
            self.run_fifo_fallback().await?;
        }

        Ok(())
    }

    async fn run_fifo_fallback(&mut self) -> Result<(), ignite_store_core::StorageError> {
        let before = self.store.size_bytes().await?;
        let events = self.store.events();
        let ids = events.oldest_non_stream_ids(self.config.fifo_percent / 100.0).await?;

        if ids.is_empty() {
            return Ok(());
        }

        let rows = events.all_ordered_by_rowid().await?;
        let deleted_rows: Vec<_> = rows.iter().filter(|r| ids.contains(&r.id.unwrap_or(0))).collect();
        let from_ms = deleted_rows.iter().map(|r| r.timestamp_ms).min().unwrap_or(0);
        let to_ms = deleted_rows.iter().map(|r| r.timestamp_ms).max().unwrap_or(0);

        events.delete_by_ids(&ids).await?;
        self.store.vacuum().await?;
        let after = self.store.size_bytes().await?;

        let _ = self.bus.publish(&CoreEvent::DbOverLimit {
            action: "Purge".to_string(),
            events_deleted_from_ms: from_ms,
            events_deleted_to_ms: to_ms,
            is_invalid_timestamp_event: false,
        });
        self.publish_report("FIFO", before, after);
        Ok(())
    }
}
