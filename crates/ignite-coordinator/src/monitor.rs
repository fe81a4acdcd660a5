//! Size-triggered granularity reduction (spec §4.6): periodically compares
//! the store's on-disk size against `DAM.Database.dbSizeLimit` and runs one
//! reduction pass when it's exceeded. Also enforces the invalid-event
//! store's overflow purge (spec §4.10), which shares the same size
//! ceiling but isn't touched by the main reduction policies.

use std::sync::Arc;
use std::time::Duration;

use ignite_bus::{CoreEvent, EventBus};
use ignite_config::ConfigTree;
use ignite_granularity::GranularityReducer;
use ignite_store_core::StorageEngine;
use ignite_store_sqlite::SqliteStore;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{error, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Run until `shutdown` fires, checking store size every [`POLL_INTERVAL`].
pub async fn run(
    store: SqliteStore,
    config: Arc<ConfigTree>,
    mut reducer: GranularityReducer,
    bus: Arc<dyn EventBus>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                return;
            }
            _ = sleep(POLL_INTERVAL) => {}
        }

        let limit = config.snapshot().dam.database.db_size_limit;
        let size = match store.size_bytes().await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to read store size for granularity monitor");
                continue;
            }
        };
        if size > limit {
            if let Err(e) = reducer.reduce(limit).await {
                warn!(error = %e, "granularity reduction pass failed");
            }
        }

        purge_invalid_overflow(&store, &bus, limit).await;
    }
}

/// Purge the oldest quarantined rows while the store as a whole remains
/// over `limit` and the invalid-event table still has rows to give up.
/// Unlike the main reducer, this never suspends uploaders — nothing
/// uploads from the invalid-event table.
async fn purge_invalid_overflow(store: &SqliteStore, bus: &Arc<dyn EventBus>, limit: u64) {
    loop {
        let size = match store.size_bytes().await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to read store size for invalid-event purge");
                return;
            }
        };
        if size <= limit {
            return;
        }

        match store.invalid_events().purge_oldest().await {
            Ok(Some(timestamp_ms)) => {
                let _ = bus.publish(&CoreEvent::DbOverLimit {
                    action: "Purge".to_string(),
                    events_deleted_from_ms: timestamp_ms,
                    events_deleted_to_ms: timestamp_ms,
                    is_invalid_timestamp_event: true,
                });
            }
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to purge invalid-event overflow");
                return;
            }
        }
    }
}
