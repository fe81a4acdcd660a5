//! Invalid-event quarantine (spec §4.1): events whose timestamp fails
//! plausibility checks are parked here instead of the main event table, so
//! a bad clock can't poison granularity reduction or upload ordering.

use ignite_crypto::Envelope;
use ignite_store_core::StorageError;
use ignite_types::{synthetic, InvalidEventRecord, RowId};
use sqlx::{Row as _, SqlitePool};

use crate::to_backend_err;

/// Typed access to the `invalid_event` table.
pub struct InvalidEventStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> InvalidEventStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Quarantine a rejected event.
    pub async fn insert(&self, timestamp_ms: i64, payload_blob: Vec<u8>) -> Result<RowId, StorageError> {
        let row = sqlx::query(
            "INSERT INTO invalid_event (timestamp_ms, payload_blob) VALUES (?, ?)",
        )
        .bind(timestamp_ms)
        .bind(payload_blob)
        .execute(self.pool)
        .await
        .map_err(to_backend_err)?;
        Ok(row.last_insert_rowid())
    }

    /// Row count, for size-limit accounting.
    pub async fn count(&self) -> Result<u64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM invalid_event")
            .fetch_one(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(count as u64)
    }

    /// Delete the oldest row (by `timestamp_ms`, ties broken by `id`) to
    /// make room when the quarantine table itself exceeds its share of the
    /// storage budget. Returns the deleted row's timestamp, or `None` if
    /// the table was already empty.
    ///
    /// The caller is expected to publish the synthetic
    /// [`synthetic::DB_OVER_LIMIT`] event with
    /// `is_invalid_timestamp_event = true` after a successful purge —
    /// this method only performs the deletion.
    pub async fn purge_oldest(&self) -> Result<Option<i64>, StorageError> {
        let target: Option<(i64, i64)> = sqlx::query_as(
            "SELECT id, timestamp_ms FROM invalid_event ORDER BY timestamp_ms ASC, id ASC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await
        .map_err(to_backend_err)?;

        let Some((id, timestamp_ms)) = target else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM invalid_event WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(Some(timestamp_ms))
    }

    /// All quarantined rows, oldest first, with payloads decrypted through
    /// `envelope`. Used for diagnostic export; a decrypt failure on one row
    /// (e.g. it predates a key rotation) is logged and the row is skipped
    /// rather than failing the whole export.
    pub async fn all_decrypted(
        &self,
        envelope: &Envelope,
    ) -> Result<Vec<(InvalidEventRecord, Vec<u8>)>, StorageError> {
        let rows = sqlx::query("SELECT * FROM invalid_event ORDER BY timestamp_ms ASC, id ASC")
            .fetch_all(self.pool)
            .await
            .map_err(to_backend_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let record = InvalidEventRecord {
                id: Some(row.try_get("id").map_err(to_backend_err)?),
                timestamp_ms: row.try_get("timestamp_ms").map_err(to_backend_err)?,
                payload_blob: row.try_get("payload_blob").map_err(to_backend_err)?,
            };
            match envelope.open(&record.payload_blob, None) {
                Ok(plaintext) => out.push((record, plaintext)),
                Err(e) => {
                    tracing::warn!(
                        row_id = ?record.id,
                        error = %e,
                        "skipping invalid-event row that failed to decrypt"
                    );
                }
            }
        }
        Ok(out)
    }
}

/// Name of the synthetic event the caller should publish after a
/// successful [`InvalidEventStore::purge_oldest`] call.
pub const PURGE_SYNTHETIC_EVENT: &str = synthetic::DB_OVER_LIMIT;

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

    #[tokio::test]
    async fn purge_oldest_removes_lowest_timestamp() {
        let store = open_memory().await;
        let invalid = store.invalid_events();
        invalid.insert(500, vec![1]).await.unwrap();
        invalid.insert(100, vec![2]).await.unwrap();

        assert_eq!(invalid.purge_oldest().await.unwrap(), Some(100));
        assert_eq!(invalid.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn purge_oldest_on_empty_table_returns_none() {
        let store = open_memory().await;
        let invalid = store.invalid_events();
        assert_eq!(invalid.purge_oldest().await.unwrap(), None);
    }
}
