//! Typed `event`/`alert` table helpers (spec §4.1, §4.9).
//!
//! These sit alongside the generic [`ignite_store_core::StorageEngine`]
//! surface rather than replacing it: the upload worker and granularity
//! reducer want real `EventRecord`/`AlertRecord` values and SQL that
//! expresses ack/publish semantics directly, not a generic
//! `Row`/`SqlValue` round trip.

use ignite_store_core::StorageError;
use ignite_types::{AttachmentFailureReason, EventName, EventRecord, Mid, RowId};
use sqlx::{Row as _, SqlitePool};

use crate::to_backend_err;

/// Fields needed to insert a new event row; `id` and `mid` are assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Telemetry event identifier.
    pub event_id: EventName,
    /// Device-local timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Device timezone offset, milliseconds.
    pub timezone_ms: i32,
    /// Encrypted payload.
    pub payload_blob: Vec<u8>,
    /// Producing application id.
    pub app_id: String,
    /// MQTT topic, empty when untopiced.
    pub topic: String,
    /// Upload priority.
    pub priority: u8,
    /// Whether this event carries a file attachment.
    pub has_attach: bool,
    /// Eligible for the stream transport.
    pub stream_flag: bool,
    /// Eligible for the batch transport.
    pub batch_flag: bool,
    /// Reduction level; `0` for pristine inserts.
    pub granularity_level: u32,
    /// Set when an attachment was dropped rather than carried.
    pub attachment_failure_reason: Option<AttachmentFailureReason>,
}

/// Fields needed to insert a new alert row.
#[derive(Debug, Clone)]
pub struct NewAlert {
    /// Telemetry event identifier.
    pub event_id: EventName,
    /// Device-local timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Device timezone offset, milliseconds.
    pub timezone_ms: i32,
    /// Encrypted payload.
    pub payload_blob: Vec<u8>,
    /// Producing application id.
    pub app_id: String,
    /// MQTT topic, empty when untopiced.
    pub topic: String,
    /// Whether this alert carries a file attachment.
    pub has_attach: bool,
}

/// Narrows `query_unpublished` to a timestamp window, used by the
/// granularity reducer's session-bounded sweeps.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only rows with `timestamp_ms >= from`, if set.
    pub from_ms: Option<i64>,
    /// Only rows with `timestamp_ms <= to`, if set.
    pub to_ms: Option<i64>,
    /// Cap on rows returned.
    pub limit: Option<u32>,
}

fn reason_to_text(reason: Option<AttachmentFailureReason>) -> Option<&'static str> {
    reason.map(|r| match r {
        AttachmentFailureReason::BatchModeUnsupported => "BatchModeUnsupported",
    })
}

fn reason_from_text(text: Option<String>) -> Option<AttachmentFailureReason> {
    match text.as_deref() {
        Some("BatchModeUnsupported") => Some(AttachmentFailureReason::BatchModeUnsupported),
        _ => None,
    }
}

use ignite_types::AlertRecord;

fn row_to_alert(row: &sqlx::sqlite::SqliteRow) -> Result<AlertRecord, StorageError> {
    Ok(AlertRecord {
        id: Some(row.try_get("id").map_err(to_backend_err)?),
        event_id: EventName::new(row.try_get::<String, _>("event_id").map_err(to_backend_err)?),
        timestamp_ms: row.try_get("timestamp_ms").map_err(to_backend_err)?,
        timezone_ms: row.try_get("timezone_ms").map_err(to_backend_err)?,
        size: row.try_get::<i64, _>("size").map_err(to_backend_err)? as u32,
        has_attach: row.try_get::<i64, _>("has_attach").map_err(to_backend_err)? != 0,
        payload_blob: row.try_get("payload_blob").map_err(to_backend_err)?,
        app_id: row.try_get("app_id").map_err(to_backend_err)?,
        topic: row.try_get("topic").map_err(to_backend_err)?,
        mid: row.try_get("mid").map_err(to_backend_err)?,
    })
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<EventRecord, StorageError> {
    Ok(EventRecord {
        id: Some(row.try_get("id").map_err(to_backend_err)?),
        event_id: EventName::new(row.try_get::<String, _>("event_id").map_err(to_backend_err)?),
        timestamp_ms: row.try_get("timestamp_ms").map_err(to_backend_err)?,
        timezone_ms: row.try_get("timezone_ms").map_err(to_backend_err)?,
        size: row.try_get::<i64, _>("size").map_err(to_backend_err)? as u32,
        has_attach: row.try_get::<i64, _>("has_attach").map_err(to_backend_err)? != 0,
        priority: row.try_get::<i64, _>("priority").map_err(to_backend_err)? as u8,
        payload_blob: row.try_get("payload_blob").map_err(to_backend_err)?,
        app_id: row.try_get("app_id").map_err(to_backend_err)?,
        topic: row.try_get("topic").map_err(to_backend_err)?,
        mid: row.try_get("mid").map_err(to_backend_err)?,
        stream_flag: row.try_get::<i64, _>("stream_flag").map_err(to_backend_err)? != 0,
        batch_flag: row.try_get::<i64, _>("batch_flag").map_err(to_backend_err)? != 0,
        granularity_level: row.try_get::<i64, _>("granularity_level").map_err(to_backend_err)? as u32,
        attachment_failure_reason: reason_from_text(
            row.try_get("attachment_failure_reason").map_err(to_backend_err)?,
        ),
    })
}

/// Typed event/alert access bound to a pool.
pub struct EventStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EventStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one event row (spec §4.1 event admission).
    pub async fn insert_event(&self, ev: NewEvent) -> Result<RowId, StorageError> {
        let size = ev.payload_blob.len() as i64;
        let row = sqlx::query(
            r#"
            INSERT INTO event (
                event_id, timestamp_ms, timezone_ms, size, has_attach, priority,
                payload_blob, app_id, topic, mid, stream_flag, batch_flag,
                granularity_level, attachment_failure_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(ev.event_id.0)
        .bind(ev.timestamp_ms)
        .bind(ev.timezone_ms)
        .bind(size)
        .bind(ev.has_attach as i64)
        .bind(ev.priority as i64)
        .bind(ev.payload_blob)
        .bind(ev.app_id)
        .bind(ev.topic)
        .bind(ev.stream_flag as i64)
        .bind(ev.batch_flag as i64)
        .bind(ev.granularity_level as i64)
        .bind(reason_to_text(ev.attachment_failure_reason))
        .execute(self.pool)
        .await
        .map_err(to_backend_err)?;
        Ok(row.last_insert_rowid())
    }

    /// Insert a batch of events in one transaction. A row that fails to
    /// bind (never expected in practice) is skipped rather than aborting
    /// the whole batch, so one malformed producer entry can't block every
    /// other event in the same batch (spec §4.1: "partial failures ...
    /// tolerated").
    pub async fn insert_event_batch(&self, events: Vec<NewEvent>) -> Result<Vec<RowId>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(to_backend_err)?;
        let mut ids = Vec::with_capacity(events.len());
        for ev in events {
            let size = ev.payload_blob.len() as i64;
            let result = sqlx::query(
                r#"
                INSERT INTO event (
                    event_id, timestamp_ms, timezone_ms, size, has_attach, priority,
                    payload_blob, app_id, topic, mid, stream_flag, batch_flag,
                    granularity_level, attachment_failure_reason
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
                "#,
            )
            .bind(ev.event_id.0)
            .bind(ev.timestamp_ms)
            .bind(ev.timezone_ms)
            .bind(size)
            .bind(ev.has_attach as i64)
            .bind(ev.priority as i64)
            .bind(ev.payload_blob)
            .bind(ev.app_id)
            .bind(ev.topic)
            .bind(ev.stream_flag as i64)
            .bind(ev.batch_flag as i64)
            .bind(ev.granularity_level as i64)
            .bind(reason_to_text(ev.attachment_failure_reason))
            .execute(&mut *tx)
            .await;
            match result {
                Ok(r) => ids.push(r.last_insert_rowid()),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping one event from batch insert");
                }
            }
        }
        tx.commit().await.map_err(to_backend_err)?;
        Ok(ids)
    }

    /// Insert one alert row. Alerts always carry `priority = u8::MAX` and
    /// are always stream-eligible, so no flags are stored for them.
    pub async fn insert_alert(&self, alert: NewAlert) -> Result<RowId, StorageError> {
        let size = alert.payload_blob.len() as i64;
        let row = sqlx::query(
            r#"
            INSERT INTO alert (
                event_id, timestamp_ms, timezone_ms, size, has_attach,
                payload_blob, app_id, topic, mid
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(alert.event_id.0)
        .bind(alert.timestamp_ms)
        .bind(alert.timezone_ms)
        .bind(size)
        .bind(alert.has_attach as i64)
        .bind(alert.payload_blob)
        .bind(alert.app_id)
        .bind(alert.topic)
        .execute(self.pool)
        .await
        .map_err(to_backend_err)?;
        Ok(row.last_insert_rowid())
    }

    /// Events awaiting publish (`mid = 0`), ordered `timestamp_ms ASC, id
    /// ASC` (spec §4.9 upload ordering).
    pub async fn query_unpublished(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StorageError> {
        let mut sql = String::from("SELECT * FROM event WHERE mid = 0");
        if filter.from_ms.is_some() {
            sql.push_str(" AND timestamp_ms >= ?");
        }
        if filter.to_ms.is_some() {
            sql.push_str(" AND timestamp_ms <= ?");
        }
        sql.push_str(" ORDER BY timestamp_ms ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        if let Some(from) = filter.from_ms {
            query = query.bind(from);
        }
        if let Some(to) = filter.to_ms {
            query = query.bind(to);
        }
        let rows = query.fetch_all(self.pool).await.map_err(to_backend_err)?;
        rows.iter().map(row_to_event).collect()
    }

    /// Stamp the broker-assigned `mid` on a set of rows once they've been
    /// handed to the MQTT client for publish.
    pub async fn mark_published(&self, ids: &[RowId], mid: Mid) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("UPDATE event SET mid = ? WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql).bind(mid);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(self.pool).await.map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }

    /// Irrevocably delete rows once the broker has acked their `mid`
    /// (spec §4.9).
    pub async fn delete_by_mid(&self, mid: Mid) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM event WHERE mid = ?")
            .bind(mid)
            .execute(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }

    /// On restart, any row still carrying a nonzero `mid` was in flight
    /// when the process stopped and the broker's ack can no longer be
    /// trusted to arrive — reset it to unpublished so the upload loop
    /// picks it back up (spec §9 Open Question: mid-recovery on restart).
    pub async fn reset_stale_mid_on_restart(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("UPDATE event SET mid = 0 WHERE mid != 0")
            .execute(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }

    /// Current count of rows (used by the granularity reducer to gauge
    /// fraction-of-store for `fifo_percent`).
    pub async fn count(&self) -> Result<u64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM event")
            .fetch_one(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(count as u64)
    }

    /// Every row, ordered by `id ASC` — the granularity reducer's walk
    /// order for session-window partitioning (spec §4.6).
    pub async fn all_ordered_by_rowid(&self) -> Result<Vec<EventRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM event ORDER BY id ASC")
            .fetch_all(self.pool)
            .await
            .map_err(to_backend_err)?;
        rows.iter().map(row_to_event).collect()
    }

    /// Delete a set of rows by id. Used by every reduction policy; callers
    /// are responsible for never including a `stream_flag=1` row (spec
    /// §4.6's irreversibility guarantee).
    pub async fn delete_by_ids(&self, ids: &[RowId]) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM event WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(self.pool).await.map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }

    /// Alerts awaiting publish, ordered `timestamp_ms ASC, id ASC`.
    pub async fn query_unpublished_alerts(&self, limit: u32) -> Result<Vec<AlertRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM alert WHERE mid = 0 ORDER BY timestamp_ms ASC, id ASC LIMIT ?")
            .bind(limit)
            .fetch_all(self.pool)
            .await
            .map_err(to_backend_err)?;
        rows.iter().map(row_to_alert).collect()
    }

    /// Stamp the broker-assigned `mid` on a set of alert rows.
    pub async fn mark_alert_published(&self, ids: &[RowId], mid: Mid) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("UPDATE alert SET mid = ? WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql).bind(mid);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(self.pool).await.map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }

    /// Irrevocably delete alert rows once the broker has acked their `mid`.
    pub async fn delete_alert_by_mid(&self, mid: Mid) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM alert WHERE mid = ?")
            .bind(mid)
            .execute(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }

    /// On restart, reset any alert row left with a stale nonzero `mid`.
    pub async fn reset_stale_alert_mid_on_restart(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("UPDATE alert SET mid = 0 WHERE mid != 0")
            .execute(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }

    /// Ids of the oldest `fraction` of non-stream rows by `timestamp_ms`,
    /// for the FIFO fallback policy. Never selects a `stream_flag=1` row.
    pub async fn oldest_non_stream_ids(&self, fraction: f64) -> Result<Vec<RowId>, StorageError> {
        let (eligible,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM event WHERE stream_flag = 0")
            .fetch_one(self.pool)
            .await
            .map_err(to_backend_err)?;
        let take = ((eligible as f64) * fraction.clamp(0.0, 1.0)).round() as i64;
        if take <= 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id FROM event WHERE stream_flag = 0 ORDER BY timestamp_ms ASC, id ASC LIMIT ?",
        )
        .bind(take)
        .fetch_all(self.pool)
        .await
        .map_err(to_backend_err)?;
        rows.iter()
            .map(|r| r.try_get::<RowId, _>("id").map_err(to_backend_err))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::PathBuf;

    async fn open_memory() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::from_pool(pool, PathBuf::from(":memory:"), true, false)
            .await
            .unwrap()
    }

    fn sample_event(ts: i64) -> NewEvent {
        NewEvent {
            event_id: EventName::new("Speed"),
            timestamp_ms: ts,
            timezone_ms: 0,
            payload_blob: vec![1, 2, 3],
            app_id: "app".into(),
            topic: String::new(),
            priority: 0,
            has_attach: false,
            stream_flag: true,
            batch_flag: false,
            granularity_level: 0,
            attachment_failure_reason: None,
        }
    }

    #[tokio::test]
    async fn unpublished_rows_ordered_by_timestamp_then_id() {
        let store = open_memory().await;
        let events = store.events();
        events.insert_event(sample_event(300)).await.unwrap();
        events.insert_event(sample_event(100)).await.unwrap();
        events.insert_event(sample_event(100)).await.unwrap();

        let rows = events.query_unpublished(&EventFilter::default()).await.unwrap();
        let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(timestamps, vec![100, 100, 300]);
    }

    #[tokio::test]
    async fn mark_published_then_ack_deletes() {
        let store = open_memory().await;
        let events = store.events();
        let id = events.insert_event(sample_event(1)).await.unwrap();

        events.mark_published(&[id], 42).await.unwrap();
        let remaining = events.query_unpublished(&EventFilter::default()).await.unwrap();
        assert!(remaining.is_empty());

        let deleted = events.delete_by_mid(42).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(events.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn restart_resets_stale_mid() {
        let store = open_memory().await;
        let events = store.events();
        let id = events.insert_event(sample_event(1)).await.unwrap();
        events.mark_published(&[id], 7).await.unwrap();

        let reset = events.reset_stale_mid_on_restart().await.unwrap();
        assert_eq!(reset, 1);
        let pending = events.query_unpublished(&EventFilter::default()).await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}
