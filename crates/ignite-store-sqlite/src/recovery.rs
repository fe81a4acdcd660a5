//! Crash recovery chain (spec §4.1, §7): `integrity_check` -> `vacuum` ->
//! drop-and-rebuild the `event` table -> rename the file aside and start
//! fresh. Each step is tried only after the previous one fails to restore
//! a clean `integrity_check`, and the chain never blocks startup
//! indefinitely — the final step always succeeds by construction (a fresh
//! file has nothing to corrupt).

use std::path::{Path, PathBuf};

use ignite_store_core::StorageError;
use sqlx::SqlitePool;
use tracing::warn;

use crate::{connect, migrations, to_backend_err};

/// What the recovery chain had to do, if anything, to reach a healthy
/// database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// `integrity_check` passed on the first try; nothing was touched.
    Healthy,
    /// The `event` table was dropped and recreated; other tables survived.
    RebuiltEventTable,
    /// The database was unrecoverable even after rebuilding `event`; the
    /// file was renamed to `backup_path` and a fresh store was created at
    /// the original path.
    RenamedAndFresh {
        /// Where the corrupt file was moved.
        backup_path: PathBuf,
    },
}

async fn integrity_ok(pool: &SqlitePool) -> Result<bool, StorageError> {
    let (result,): (String,) = sqlx::query_as("PRAGMA integrity_check")
        .fetch_one(pool)
        .await
        .map_err(to_backend_err)?;
    Ok(result.eq_ignore_ascii_case("ok"))
}

/// Run the recovery chain against `pool`/`path`, returning a possibly
/// reopened pool (if the file had to be renamed aside) along with what
/// happened. The caller (`SqliteStore::open`) still runs migrations after
/// this returns.
pub async fn check_and_recover(
    pool: &SqlitePool,
    path: &Path,
    default_stream: bool,
    default_batch: bool,
) -> Result<RecoveryOutcome, StorageError> {
    if integrity_ok(pool).await.unwrap_or(false) {
        return Ok(RecoveryOutcome::Healthy);
    }

    warn!(path = %path.display(), "integrity_check failed, attempting vacuum");
    if sqlx::query("VACUUM").execute(pool).await.is_ok() && integrity_ok(pool).await.unwrap_or(false) {
        return Ok(RecoveryOutcome::Healthy);
    }

    warn!(path = %path.display(), "vacuum did not restore integrity, rebuilding event table");
    if rebuild_event_table(pool, default_stream, default_batch)
        .await
        .is_ok()
        && integrity_ok(pool).await.unwrap_or(false)
    {
        return Ok(RecoveryOutcome::RebuiltEventTable);
    }

    warn!(path = %path.display(), "rebuild failed, renaming database aside and starting fresh");
    rename_and_start_fresh(path).await
}

async fn rebuild_event_table(
    pool: &SqlitePool,
    default_stream: bool,
    default_batch: bool,
) -> Result<(), StorageError> {
    sqlx::query("DROP TABLE IF EXISTS event")
        .execute(pool)
        .await
        .map_err(to_backend_err)?;
    // Force the v0->v1 (and v1->v2) migrations to recreate `event` from
    // scratch; other tables are left untouched since only `event` was
    // dropped.
    let stored = migrations::get_user_version(pool).await.unwrap_or(0);
    let pre_event_version = stored.min(0);
    migrations::run(pool, pre_event_version, default_stream, default_batch).await
}

async fn rename_and_start_fresh(path: &Path) -> Result<RecoveryOutcome, StorageError> {
    let backup_path = path.with_extension("db.bk");
    if path.exists() {
        std::fs::rename(path, &backup_path).map_err(|e| StorageError::Backend(e.to_string()))?;
    }
    // Creating a fresh pool at the original path starts with an empty,
    // structurally sound file; `SqliteStore::open` will run migrations on
    // it immediately after we return.
    let _ = connect(path).await?;
    Ok(RecoveryOutcome::RenamedAndFresh { backup_path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn healthy_memory_db_reports_healthy() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let outcome = check_and_recover(&pool, Path::new(":memory:"), true, false)
            .await
            .unwrap();
        assert_eq!(outcome, RecoveryOutcome::Healthy);
    }
}
