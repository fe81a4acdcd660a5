//! Sequential, additive schema migrations (spec §4.1).
//!
//! Each migration runs inside its own transaction and is written so a
//! partially-applied run is safe to retry (`CREATE TABLE IF NOT EXISTS`,
//! `ALTER TABLE ... ADD COLUMN` guarded by a column-existence check).
//! Migrations only ever add columns or tables — never drop data-bearing
//! columns.

use sqlx::{Sqlite, Transaction};

use ignite_store_core::StorageError;

/// Highest schema version this build knows how to open.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

fn to_backend_err(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Apply every migration needed to go from `stored` to
/// [`CURRENT_SCHEMA_VERSION`], each in its own transaction.
///
/// `default_stream`/`default_batch` seed the `stream_flag`/`batch_flag`
/// columns added by migration 2, consistent with the Upload Mode Policy's
/// configured `default_mode` at the time of migration (spec §4.1, §4.5).
pub async fn run(
    pool: &sqlx::SqlitePool,
    stored: i64,
    default_stream: bool,
    default_batch: bool,
) -> Result<(), StorageError> {
    if stored > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::SchemaTooNew {
            found: stored,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    let mut version = stored;
    if version < 1 {
        migrate_v0_to_v1(pool).await?;
        version = 1;
    }
    if version < 2 {
        migrate_v1_to_v2(pool, default_stream, default_batch).await?;
        version = 2;
    }
    set_user_version(pool, version).await?;
    Ok(())
}

/// Read the database's current `user_version` pragma.
pub async fn get_user_version(pool: &sqlx::SqlitePool) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(to_backend_err)?;
    Ok(row.0)
}

async fn set_user_version(pool: &sqlx::SqlitePool, version: i64) -> Result<(), StorageError> {
    // PRAGMA does not accept bound parameters; the value is our own
    // compile-time constant, never caller-supplied.
    sqlx::query(&format!("PRAGMA user_version = {version}"))
        .execute(pool)
        .await
        .map_err(to_backend_err)?;
    Ok(())
}

/// v0 -> v1: create the base schema (event/alert without the per-row
/// transport flags, invalid-event quarantine, upload-file chunks,
/// service-settings overlay, and local key/value config).
async fn migrate_v0_to_v1(pool: &sqlx::SqlitePool) -> Result<(), StorageError> {
    let mut tx: Transaction<'_, Sqlite> = pool.begin().await.map_err(to_backend_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            timezone_ms INTEGER NOT NULL,
            size INTEGER NOT NULL,
            has_attach INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL DEFAULT 0,
            payload_blob BLOB NOT NULL,
            app_id TEXT NOT NULL,
            topic TEXT NOT NULL DEFAULT '',
            mid INTEGER NOT NULL DEFAULT 0,
            attachment_failure_reason TEXT
        ) STRICT
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(to_backend_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            timezone_ms INTEGER NOT NULL,
            size INTEGER NOT NULL,
            has_attach INTEGER NOT NULL DEFAULT 0,
            payload_blob BLOB NOT NULL,
            app_id TEXT NOT NULL,
            topic TEXT NOT NULL DEFAULT '',
            mid INTEGER NOT NULL DEFAULT 0
        ) STRICT
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(to_backend_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invalid_event (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp_ms INTEGER NOT NULL,
            payload_blob BLOB NOT NULL
        ) STRICT
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(to_backend_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            split_index INTEGER NOT NULL,
            is_final_chunk INTEGER NOT NULL,
            file_size INTEGER NOT NULL
        ) STRICT
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(to_backend_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_settings (
            setting_id INTEGER PRIMARY KEY AUTOINCREMENT,
            service_id TEXT NOT NULL,
            setting_enum TEXT NOT NULL,
            value_json TEXT NOT NULL,
            response_status INTEGER NOT NULL DEFAULT 0,
            correlation_id TEXT NOT NULL DEFAULT '',
            is_from_device INTEGER NOT NULL DEFAULT 0
        ) STRICT
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(to_backend_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS local_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        ) STRICT
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(to_backend_err)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_mid ON event(mid)")
        .execute(&mut *tx)
        .await
        .map_err(to_backend_err)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_ts ON event(timestamp_ms)")
        .execute(&mut *tx)
        .await
        .map_err(to_backend_err)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_alert_mid ON alert(mid)")
        .execute(&mut *tx)
        .await
        .map_err(to_backend_err)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_invalid_ts ON invalid_event(timestamp_ms)")
        .execute(&mut *tx)
        .await
        .map_err(to_backend_err)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_service_settings_source ON service_settings(service_id)")
        .execute(&mut *tx)
        .await
        .map_err(to_backend_err)?;

    tx.commit().await.map_err(to_backend_err)?;
    Ok(())
}

/// v1 -> v2: add `stream_flag`, `batch_flag`, `granularity_level` to
/// `event`, defaulting from the Upload Mode Policy's configured default
/// mode so existing rows keep a valid, non-zero transport classification.
async fn migrate_v1_to_v2(
    pool: &sqlx::SqlitePool,
    default_stream: bool,
    default_batch: bool,
) -> Result<(), StorageError> {
    let mut tx: Transaction<'_, Sqlite> = pool.begin().await.map_err(to_backend_err)?;

    if !column_exists(&mut tx, "event", "stream_flag").await? {
        let default_val = default_stream as i64;
        sqlx::query(&format!(
            "ALTER TABLE event ADD COLUMN stream_flag INTEGER NOT NULL DEFAULT {default_val}"
        ))
        .execute(&mut *tx)
        .await
        .map_err(to_backend_err)?;
    }
    if !column_exists(&mut tx, "event", "batch_flag").await? {
        let default_val = default_batch as i64;
        sqlx::query(&format!(
            "ALTER TABLE event ADD COLUMN batch_flag INTEGER NOT NULL DEFAULT {default_val}"
        ))
        .execute(&mut *tx)
        .await
        .map_err(to_backend_err)?;
    }
    if !column_exists(&mut tx, "event", "granularity_level").await? {
        sqlx::query(
            "ALTER TABLE event ADD COLUMN granularity_level INTEGER NOT NULL DEFAULT 0",
        )
        .execute(&mut *tx)
        .await
        .map_err(to_backend_err)?;
    }

    tx.commit().await.map_err(to_backend_err)?;
    Ok(())
}

async fn column_exists(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    column: &str,
) -> Result<bool, StorageError> {
    let rows: Vec<(i64, String)> = sqlx::query_as(&format!("PRAGMA table_info({table})"))
        .fetch_all(&mut **tx)
        .await
        .map_err(to_backend_err)?
        .into_iter()
        .map(|row: (i64, String, String, i64, Option<String>, i64)| (row.0, row.1))
        .collect();
    Ok(rows.iter().any(|(_, name)| name == column))
}
