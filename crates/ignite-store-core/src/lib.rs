#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ignite-store-core** – storage engine abstraction for ignite-client.
//!
//! This crate defines the engine's schema-agnostic CRUD surface
//! (`query`/`insert`/`update`/`remove`/transactions/`vacuum`/`size_bytes`/
//! `reset`, spec §4.1) plus the crash-recovery and migration contracts every
//! driver must honor. Concrete drivers (`ignite-store-sqlite`) implement
//! [`StorageEngine`] and may additionally expose richer, typed helper
//! methods for hot paths — the generic surface exists for the handful of
//! callers (the granularity reducer's generic sweep, diagnostics) that
//! genuinely want table-agnostic access, not as the only way in.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ignite_types::RowId;
use serde::{Deserialize, Serialize};

/// The five logical tables the engine partitions events into, plus the
/// key/value local-config table (spec §1, §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Pristine/reduced telemetry events awaiting upload or ack.
    Event,
    /// High-priority, always-stream alerts.
    Alert,
    /// Quarantined events with implausible timestamps.
    Invalid,
    /// Batch-mode file attachment chunks.
    UploadFile,
    /// Cloud-originated configuration overlay rows.
    ServiceSettings,
    /// Device-local persistent key/value state.
    LocalConfig,
}

impl Table {
    /// The SQL identifier backing this logical table.
    pub fn sql_name(self) -> &'static str {
        match self {
            Table::Event => "event",
            Table::Alert => "alert",
            Table::Invalid => "invalid_event",
            Table::UploadFile => "upload_file",
            Table::ServiceSettings => "service_settings",
            Table::LocalConfig => "local_config",
        }
    }
}

/// A single column value in the engine's neutral row representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// Signed 64-bit integer (also used for booleans, 0/1).
    Int(i64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes (encrypted payload blobs, digests).
    Blob(Vec<u8>),
    /// Floating point.
    Real(f64),
}

impl SqlValue {
    /// Unwrap as an integer, or `None` if this is not an [`SqlValue::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Unwrap as text, or `None` if this is not an [`SqlValue::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Unwrap as a blob, or `None` if this is not an [`SqlValue::Blob`].
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) => Some(b),
            _ => None,
        }
    }
}

/// An ordered column -> value map, used for both insert payloads and query
/// results. `BTreeMap` keeps column order deterministic for tests.
pub type Row = BTreeMap<String, SqlValue>;

/// Column list to fetch; empty means "all columns".
#[derive(Debug, Clone, Default)]
pub struct Projection(pub Vec<String>);

/// A `WHERE`-clause-shaped filter. `clause` uses `?` placeholders bound, in
/// order, from `params` — the same discipline `sqlx::query` enforces, kept
/// explicit here so callers never string-interpolate untrusted values.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// SQL boolean expression with positional `?` placeholders.
    pub clause: String,
    /// Values bound to the placeholders, in order.
    pub params: Vec<SqlValue>,
}

impl Selection {
    /// An unconditional selection matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// `column = value`.
    pub fn eq(column: &str, value: SqlValue) -> Self {
        Self {
            clause: format!("{column} = ?"),
            params: vec![value],
        }
    }
}

/// `ORDER BY column [ASC|DESC]`.
#[derive(Debug, Clone)]
pub struct Order {
    /// Column to sort by.
    pub column: String,
    /// Ascending when `true`, descending otherwise.
    pub ascending: bool,
}

/// Errors produced by the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying database driver returned an error.
    #[error("backend error: {0}")]
    Backend(String),
    /// A row failed to (de)serialize to/from its typed representation.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The requested schema version is newer than this build supports.
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// Version found in the database.
        found: i64,
        /// Highest version this build knows how to open.
        supported: i64,
    },
    /// Integrity check failed and could not be repaired by any recovery
    /// step (spec §4.1 crash recovery chain exhausted).
    #[error("database corrupt and unrecoverable after exhausting recovery steps")]
    Unrecoverable,
}

/// Schema-agnostic CRUD surface every storage driver must implement
/// (spec §4.1).
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Fetch rows matching `selection`, projected to `projection`, ordered
    /// by `order`, limited to `limit` rows.
    async fn query(
        &self,
        table: Table,
        projection: &Projection,
        selection: Option<&Selection>,
        order: Option<&Order>,
        limit: Option<u32>,
    ) -> Result<Vec<Row>, StorageError>;

    /// Insert one row, returning its assigned [`RowId`].
    async fn insert(&self, table: Table, row: Row) -> Result<RowId, StorageError>;

    /// Update rows matching `selection` with the columns present in `row`.
    /// Returns whether any row was updated.
    async fn update(&self, table: Table, row: Row, selection: &Selection) -> Result<bool, StorageError>;

    /// Delete rows matching `selection`. Returns the number of rows deleted.
    async fn remove(&self, table: Table, selection: &Selection) -> Result<u64, StorageError>;

    /// Run `vacuum` to reclaim free pages after deletions.
    async fn vacuum(&self) -> Result<(), StorageError>;

    /// Current on-disk size of the store, in bytes.
    async fn size_bytes(&self) -> Result<u64, StorageError>;

    /// Drop and recreate the event table, preserving local config and
    /// other tables. Used by the crash-recovery chain and by key rotation
    /// (spec §4.2: rotation clears the event store since old rows become
    /// undecryptable).
    async fn reset(&self) -> Result<(), StorageError>;
}
