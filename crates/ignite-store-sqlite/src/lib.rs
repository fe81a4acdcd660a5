#![forbid(unsafe_code)]

//! **ignite-store-sqlite** – SQLite-backed [`StorageEngine`] for
//! ignite-client.
//!
//! A single [`sqlx::SqlitePool`] capped at one connection serializes every
//! write, matching spec §5's "concurrent queries are serialized through an
//! internal mutex" — the pool's connection-acquire queue *is* the mutex.
//! Schema migrations run via `PRAGMA user_version` (spec §4.1) and crash
//! recovery (spec §4.1, §7) walks `integrity_check` -> `vacuum` ->
//! drop-and-rebuild `event` -> rename-aside-and-start-fresh.

mod event_store;
mod invalid_store;
mod local_config;
mod migrations;
mod recovery;
mod service_settings;

pub use event_store::{EventFilter, EventStore, NewAlert, NewEvent};
pub use invalid_store::InvalidEventStore;
pub use local_config::LocalConfigStore;
pub use recovery::RecoveryOutcome;
pub use service_settings::ServiceSettingsStore;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use ignite_store_core::{Order, Projection, Row, Selection, SqlValue, StorageEngine, StorageError, Table};
use ignite_types::RowId;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Column, Row as _, SqlitePool, TypeInfo, ValueRef};
use tracing::{info, warn};

fn to_backend_err(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// SQLite-backed storage engine.
///
/// Clone is cheap: `SqlitePool` is an `Arc` handle internally.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if absent) the database at `path`, running migrations
    /// and, if needed, the crash-recovery chain before returning.
    ///
    /// `default_stream`/`default_batch` seed the v1->v2 migration's new
    /// columns from the Upload Mode Policy's configured default transport.
    pub async fn open(
        path: impl AsRef<Path>,
        default_stream: bool,
        default_batch: bool,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let pool = connect(&path).await?;

        match recovery::check_and_recover(&pool, &path, default_stream, default_batch).await? {
            RecoveryOutcome::Healthy => {}
            RecoveryOutcome::RebuiltEventTable => {
                warn!(path = %path.display(), "event table failed integrity check, rebuilt");
            }
            RecoveryOutcome::RenamedAndFresh { backup_path } => {
                warn!(
                    path = %path.display(),
                    backup = %backup_path.display(),
                    "database unrecoverable, renamed aside and started fresh"
                );
            }
        }

        let stored_version = migrations::get_user_version(&pool).await?;
        if stored_version < migrations::CURRENT_SCHEMA_VERSION {
            info!(
                from = stored_version,
                to = migrations::CURRENT_SCHEMA_VERSION,
                "running schema migrations"
            );
            migrations::run(&pool, stored_version, default_stream, default_batch).await?;
        }

        let store = Self { pool, path };
        store.reset_stale_mids().await?;
        Ok(store)
    }

    /// Build a store directly on an already-open pool, skipping file-level
    /// recovery. Used by tests and by in-memory (`:memory:`) stores.
    pub async fn from_pool(
        pool: SqlitePool,
        path: PathBuf,
        default_stream: bool,
        default_batch: bool,
    ) -> Result<Self, StorageError> {
        let stored_version = migrations::get_user_version(&pool).await?;
        migrations::run(&pool, stored_version, default_stream, default_batch).await?;
        let store = Self { pool, path };
        store.reset_stale_mids().await?;
        Ok(store)
    }

    /// Requeue any row left with a nonzero `mid` from an unclean shutdown —
    /// the broker's ack for it can no longer be trusted to arrive (spec §9
    /// Open Question: mid-recovery on restart).
    async fn reset_stale_mids(&self) -> Result<(), StorageError> {
        let events = self.events().reset_stale_mid_on_restart().await?;
        let alerts = self.events().reset_stale_alert_mid_on_restart().await?;
        if events > 0 || alerts > 0 {
            warn!(events, alerts, "requeued rows left with a stale mid from an unclean shutdown");
        }
        Ok(())
    }

    /// The pool backing this store, for submodules within this crate.
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Path to the backing database file (`:memory:` for in-memory stores).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Typed event-table helper API (spec §4.1, §4.9).
    pub fn events(&self) -> event_store::EventStore<'_> {
        event_store::EventStore::new(&self.pool)
    }

    /// Typed invalid-event quarantine API (spec §4.1).
    pub fn invalid_events(&self) -> InvalidEventStore<'_> {
        InvalidEventStore::new(&self.pool)
    }

    /// Typed local key/value config API (spec §3).
    pub fn local_config(&self) -> LocalConfigStore<'_> {
        LocalConfigStore::new(&self.pool)
    }

    /// Typed cloud-overlay persistence API (spec §4.11).
    pub fn service_settings(&self) -> service_settings::ServiceSettingsStore<'_> {
        service_settings::ServiceSettingsStore::new(&self.pool)
    }
}

async fn connect(path: &Path) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(to_backend_err)?
        .create_if_missing(true)
        .foreign_keys(true);

    // A single connection makes the pool itself the writer-serialization
    // point: every insert/update/remove acquires the same connection, so
    // writes from concurrent tasks queue rather than racing at the SQLite
    // level (spec §5).
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(to_backend_err)
}

fn sql_value_to_bind(v: &SqlValue) -> SqlValue {
    v.clone()
}

fn build_select(
    table: Table,
    projection: &Projection,
    selection: Option<&Selection>,
    order: Option<&Order>,
    limit: Option<u32>,
) -> (String, Vec<SqlValue>) {
    let cols = if projection.0.is_empty() {
        "*".to_string()
    } else {
        projection.0.join(", ")
    };
    let mut sql = format!("SELECT {cols} FROM {}", table.sql_name());
    let mut params = Vec::new();
    if let Some(sel) = selection {
        if !sel.clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&sel.clause);
            params.extend(sel.params.iter().map(sql_value_to_bind));
        }
    }
    if let Some(ord) = order {
        sql.push_str(&format!(
            " ORDER BY {} {}",
            ord.column,
            if ord.ascending { "ASC" } else { "DESC" }
        ));
    }
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }
    (sql, params)
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for p in params {
        query = match p {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Int(i) => query.bind(i),
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Blob(b) => query.bind(b),
            SqlValue::Real(r) => query.bind(r),
        };
    }
    query
}

fn row_to_neutral(row: &sqlx::sqlite::SqliteRow) -> Row {
    let mut out: Row = BTreeMap::new();
    for col in row.columns() {
        let name = col.name().to_string();
        let value = decode_column(row, col.ordinal());
        out.insert(name, value);
    }
    out
}

fn decode_column(row: &sqlx::sqlite::SqliteRow, idx: usize) -> SqlValue {
    let raw = match row.try_get_raw(idx) {
        Ok(r) => r,
        Err(_) => return SqlValue::Null,
    };
    if raw.is_null() {
        return SqlValue::Null;
    }
    match raw.type_info().name() {
        "TEXT" => row
            .try_get::<String, _>(idx)
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(idx)
            .map(SqlValue::Blob)
            .unwrap_or(SqlValue::Null),
        "REAL" => row
            .try_get::<f64, _>(idx)
            .map(SqlValue::Real)
            .unwrap_or(SqlValue::Null),
        _ => row
            .try_get::<i64, _>(idx)
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null),
    }
}

#[async_trait]
impl StorageEngine for SqliteStore {
    async fn query(
        &self,
        table: Table,
        projection: &Projection,
        selection: Option<&Selection>,
        order: Option<&Order>,
        limit: Option<u32>,
    ) -> Result<Vec<Row>, StorageError> {
        let (sql, params) = build_select(table, projection, selection, order, limit);
        let query = bind_params(sqlx::query(&sql), &params);
        let rows = query.fetch_all(&self.pool).await.map_err(to_backend_err)?;
        Ok(rows.iter().map(row_to_neutral).collect())
    }

    async fn insert(&self, table: Table, row: Row) -> Result<RowId, StorageError> {
        let cols: Vec<&String> = row.keys().collect();
        let placeholders = vec!["?"; cols.len()].join(", ");
        let col_list = cols
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({col_list}) VALUES ({placeholders})",
            table.sql_name()
        );
        let params: Vec<SqlValue> = cols.iter().map(|c| row[*c].clone()).collect();
        let query = bind_params(sqlx::query(&sql), &params);
        let result = query.execute(&self.pool).await.map_err(to_backend_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn update(&self, table: Table, row: Row, selection: &Selection) -> Result<bool, StorageError> {
        if row.is_empty() {
            return Ok(false);
        }
        let cols: Vec<&String> = row.keys().collect();
        let set_clause = cols
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE {} SET {set_clause}", table.sql_name());
        let mut params: Vec<SqlValue> = cols.iter().map(|c| row[*c].clone()).collect();
        if !selection.clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&selection.clause);
            params.extend(selection.params.iter().cloned());
        }
        let query = bind_params(sqlx::query(&sql), &params);
        let result = query.execute(&self.pool).await.map_err(to_backend_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, table: Table, selection: &Selection) -> Result<u64, StorageError> {
        let mut sql = format!("DELETE FROM {}", table.sql_name());
        let mut params = Vec::new();
        if !selection.clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&selection.clause);
            params.extend(selection.params.iter().cloned());
        }
        let query = bind_params(sqlx::query(&sql), &params);
        let result = query.execute(&self.pool).await.map_err(to_backend_err)?;
        Ok(result.rows_affected())
    }

    async fn vacuum(&self) -> Result<(), StorageError> {
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok(())
    }

    async fn size_bytes(&self) -> Result<u64, StorageError> {
        let (page_count,): (i64,) = sqlx::query_as("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(to_backend_err)?;
        let (page_size,): (i64,) = sqlx::query_as("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(to_backend_err)?;
        Ok((page_count * page_size).max(0) as u64)
    }

    async fn reset(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM event")
            .execute(&self.pool)
            .await
            .map_err(to_backend_err)?;
        sqlx::query("DELETE FROM alert")
            .execute(&self.pool)
            .await
            .map_err(to_backend_err)?;
        self.vacuum().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_memory() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("open in-memory sqlite");
        SqliteStore::from_pool(pool, PathBuf::from(":memory:"), true, false)
            .await
            .expect("run migrations")
    }

    #[tokio::test]
    async fn migrations_create_v2_columns() {
        let store = open_memory().await;
        let version = migrations::get_user_version(&store.pool).await.unwrap();
        assert_eq!(version, migrations::CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn generic_insert_and_query_roundtrip() {
        let store = open_memory().await;
        let mut row: Row = BTreeMap::new();
        row.insert("event_id".into(), SqlValue::Text("com.test.EVT".into()));
        row.insert("timestamp_ms".into(), SqlValue::Int(1000));
        row.insert("timezone_ms".into(), SqlValue::Int(0));
        row.insert("size".into(), SqlValue::Int(4));
        row.insert("payload_blob".into(), SqlValue::Blob(vec![1, 2, 3, 4]));
        row.insert("app_id".into(), SqlValue::Text("app".into()));
        row.insert("stream_flag".into(), SqlValue::Int(1));
        row.insert("batch_flag".into(), SqlValue::Int(0));

        let id = store.insert(Table::Event, row).await.unwrap();
        assert!(id > 0);

        let rows = store
            .query(Table::Event, &Projection::default(), None, None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get("event_id").and_then(|v| v.as_text()),
            Some("com.test.EVT")
        );
    }

    #[tokio::test]
    async fn remove_respects_selection() {
        let store = open_memory().await;
        let mut row: Row = BTreeMap::new();
        row.insert("key".into(), SqlValue::Text("a".into()));
        row.insert("value".into(), SqlValue::Text("1".into()));
        store.insert(Table::LocalConfig, row).await.unwrap();

        let deleted = store
            .remove(Table::LocalConfig, &Selection::eq("key", SqlValue::Text("a".into())))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }
}
