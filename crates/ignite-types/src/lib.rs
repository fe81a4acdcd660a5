#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ignite-types** – canonical data model for the ignite-client telemetry core.
//!
//! This crate holds the row shapes persisted by the storage engine and the
//! handful of synthetic event kinds the core itself emits (overflow
//! summaries, session transitions, granularity reduction reports, …). It has
//! no I/O and no async runtime dependency — every other `ignite-*` crate
//! builds on top of these types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config_keys;

/// Opaque row identifier assigned by the storage engine (SQLite `rowid`).
pub type RowId = i64;

/// Broker-assigned MQTT message identifier. `0` means "not yet published".
pub type Mid = i64;

/// The telemetry event identifier string (e.g. `"Speed"`, `"IgnStatus"`),
/// distinct from [`RowId`] and from the storage engine's own [`Uuid`] keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventName(pub String);

impl EventName {
    /// Build a name from any string-like value.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Synthetic event kinds emitted by the core itself rather than by producers.
///
/// These are never rejected by the activation/session gates — they describe
/// the core's own behavior and must always reach the store.
pub mod synthetic {
    /// Emitted by the [`crate`] queue when a run of rejected events is
    /// finally followed by a successful admission.
    pub const EVENT_CACHE_OVERFLOW: &str = "EventCacheOverflow";
    /// Emitted by the session status handler on ignition transitions.
    pub const SESSION_STATUS: &str = "SessionStatus";
    /// One-shot event marking process launch; also a session-window marker
    /// consumed by the granularity reducer.
    pub const IGNITE_CLIENT_LAUNCHED: &str = "IgniteClientLaunched";
    /// Emitted after each granularity reduction policy runs.
    pub const GRANULARITY_REDUCTION: &str = "GranularityReduction";
    /// Emitted when the store (or invalid-event store) is purged for size.
    pub const DB_OVER_LIMIT: &str = "DBOverLimit";
    /// Emitted (as an alert) when the device's `deviceId` changes.
    pub const ACTIVATION_ALERT: &str = "Activation";
    /// Emitted (as an event) alongside [`ACTIVATION_ALERT`].
    pub const ACTIVATION_EVENT: &str = "ActivationEvent";
}

/// Reason recorded on `SessionStatus` synthetic events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionTransition {
    /// Ignition turned on / session started.
    Startup,
    /// Ignition turned off / session ended.
    Shutdown,
}

/// Why an event's attachment was dropped rather than uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentFailureReason {
    /// The event was forced into stream-only mode, which cannot carry files.
    BatchModeUnsupported,
}

/// The producer-to-writer wire contract for [`enqueue_event`](crate) calls:
/// what a producer thread hands the Event Queue, JSON-encoded into
/// `QueuedEvent::bytes` (the queue itself never interprets those bytes; this
/// is the shared encoding both sides agree on).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Telemetry event identifier.
    pub event_id: EventName,
    /// Device-local timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Device timezone offset, milliseconds.
    pub timezone_ms: i32,
    /// Producing application id.
    pub app_id: String,
    /// MQTT topic, empty when untopiced.
    pub topic: String,
    /// Plaintext payload, encrypted by the DB Writer stage just before
    /// insertion.
    pub payload: Vec<u8>,
    /// Whether a file attachment accompanies this event.
    pub has_attach: bool,
    /// Alerts bypass session/interval gating and use a dedicated table.
    pub is_alert: bool,
    /// Upload priority; ignored for alerts.
    pub priority: u8,
}

/// A stored telemetry event row (the `event` or `alert` table shape).
///
/// `mid = 0` means "awaiting publish"; a nonzero value is the
/// broker-assigned message id, deleted irrevocably on ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Storage-assigned row id; `None` before the first insert.
    pub id: Option<RowId>,
    /// Telemetry event identifier, e.g. `"Speed"`.
    pub event_id: EventName,
    /// Device-local timestamp in epoch milliseconds. Never resynchronized.
    pub timestamp_ms: i64,
    /// Device timezone offset in milliseconds, recorded alongside the
    /// timestamp since the core does not attempt clock resync.
    pub timezone_ms: i32,
    /// Size in bytes of the encrypted payload, used for storage accounting.
    pub size: u32,
    /// Whether this event carries a file attachment.
    pub has_attach: bool,
    /// Upload priority; alerts always sort ahead of plain events.
    pub priority: u8,
    /// Encrypted serialization of the event payload.
    pub payload_blob: Vec<u8>,
    /// Application that produced the event.
    pub app_id: String,
    /// MQTT topic for topiced events; empty when the event is untopiced.
    pub topic: String,
    /// Broker-assigned message id. `0` = not yet published.
    pub mid: Mid,
    /// Eligible for the online (per-event MQTT publish) transport.
    pub stream_flag: bool,
    /// Eligible for the offline (bulk HTTP upload with attachments) transport.
    pub batch_flag: bool,
    /// `0` for pristine events; positive values mark reduction survivors.
    pub granularity_level: u32,
    /// Set when an attachment was discarded rather than uploaded.
    pub attachment_failure_reason: Option<AttachmentFailureReason>,
}

impl EventRecord {
    /// An event accepted into the store must be eligible for at least one
    /// transport. See spec invariant: `stream_flag + batch_flag >= 1`.
    pub fn is_transportable(&self) -> bool {
        self.stream_flag || self.batch_flag
    }
}

/// Same shape as [`EventRecord`] but always stream-mode and higher priority;
/// stored in a dedicated table and uploaded on its own cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Storage-assigned row id; `None` before the first insert.
    pub id: Option<RowId>,
    /// Telemetry event identifier.
    pub event_id: EventName,
    /// Device-local timestamp in epoch milliseconds.
    pub timestamp_ms: i64,
    /// Device timezone offset in milliseconds.
    pub timezone_ms: i32,
    /// Size in bytes of the encrypted payload.
    pub size: u32,
    /// Whether this alert carries a file attachment.
    pub has_attach: bool,
    /// Encrypted serialization of the alert payload.
    pub payload_blob: Vec<u8>,
    /// Application that produced the alert.
    pub app_id: String,
    /// MQTT topic, reconstructed the same way as events.
    pub topic: String,
    /// Broker-assigned message id. `0` = not yet published.
    pub mid: Mid,
}

impl AlertRecord {
    /// Alerts bypass the upload-mode policy entirely; this exists only so
    /// callers can treat events and alerts uniformly where useful.
    pub fn priority() -> u8 {
        u8::MAX
    }
}

/// Quarantine row for events whose timestamp failed plausibility checks
/// (e.g. predates device activation time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidEventRecord {
    /// Storage-assigned row id; `None` before the first insert.
    pub id: Option<RowId>,
    /// Device-local timestamp in epoch milliseconds, as originally recorded.
    pub timestamp_ms: i64,
    /// Encrypted serialization of the rejected event.
    pub payload_blob: Vec<u8>,
}

/// Tracks a batch-mode file attachment split across chunks for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadFileRecord {
    /// Storage-assigned row id; `None` before the first insert.
    pub id: Option<RowId>,
    /// Path to the chunk file on local storage.
    pub file_path: String,
    /// Zero-based index of this chunk within the split file.
    pub split_index: u32,
    /// Whether this is the final chunk of the split file.
    pub is_final_chunk: bool,
    /// Size of this chunk in bytes.
    pub file_size: u64,
}

/// A cloud-originated configuration overlay row (spec §4.11): one
/// `(service_id, setting_enum)` pair keyed by source, where `setting_enum`
/// is the dotted configuration path `update_config` overlays onto the
/// config tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettingsRecord {
    /// Storage-assigned identifier for this setting row.
    pub setting_id: i64,
    /// The source that pushed this overlay ("keyed by source").
    pub service_id: String,
    /// Dotted configuration path, e.g. `"DAM.Database.dbSizeLimit"`.
    pub setting_enum: String,
    /// The overlay value, as raw JSON text.
    pub value_json: String,
    /// HTTP-style status the cloud reported for this setting's application.
    pub response_status: i32,
    /// Correlation id tying this row back to the originating cloud request.
    pub correlation_id: String,
    /// `true` when the overlay originated from this device rather than the
    /// cloud's own push (e.g. a locally staged default).
    pub is_from_device: bool,
}

/// A device-local persistent key/value pair (activation state, IVs, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConfigEntry {
    /// Well-known key, see [`config_keys`].
    pub key: String,
    /// Opaque string value; encryption, if any, is the caller's concern.
    pub value: String,
}

/// Well-known local-config keys (device-local persistent state).
pub mod local_config_keys {
    /// Stored `login` (device id) value.
    pub const LOGIN: &str = "login";
    /// Encrypted passcode.
    pub const PASSCODE: &str = "passcode";
    /// Access token expiration, monotonic-derived.
    pub const EXPIRATION_TIME: &str = "expirationTime";
    /// Token issue time.
    pub const ISSUE_TIME: &str = "issueTime";
    /// Persisted wall-clock activation timestamp.
    pub const ACTIVATION_TS: &str = "activationTS";
    /// Last seen `deviceId`, used to detect rotation.
    pub const LAST_DEVICE_ID: &str = "lastDeviceId";
    /// Decoded JWT claim fields cached across restarts.
    pub const DECODED_FIELDS: &str = "decodedFields";
    /// Per-process IV persisted for the crypto envelope.
    pub const ENVELOPE_IV: &str = "envelopeIv";
    /// Schema version marker used by the storage engine's migration runner.
    pub const SCHEMA_VERSION: &str = "schemaVersion";
    /// Persisted [`crate`] activation-backoff state (JSON).
    pub const ACTIVATION_BACKOFF_STATE: &str = "activationBackoffState";
}

/// Identity used to derive the activation key (VIN/serial) and the
/// qualifier fields posted during activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Activation qualifier id (VIN or serial, device-specific).
    pub qualifier_id: String,
    /// Vehicle identification number, when applicable.
    pub vin: String,
    /// Device serial number.
    pub serial: String,
    /// IMEI of the device's modem, when applicable.
    pub imei: String,
    /// Hardware version string.
    pub hw_version: String,
    /// Software version string.
    pub sw_version: String,
    /// Product type, used as the login OAuth `scope`.
    pub product_type: String,
    /// Device type hint sent to the activation endpoint.
    pub use_device_type: String,
}

/// Credentials issued by activation and stored atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationCredential {
    /// Cloud-assigned device id.
    pub device_id: String,
    /// Passcode to exchange for access tokens (plaintext in memory only).
    pub passcode: String,
}

/// A freshly issued access token plus its monotonic expiry instant.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Bearer token string.
    pub token: String,
    /// Seconds since epoch the token was issued at (`iat`).
    pub issued_at_epoch_s: u64,
    /// Seconds since epoch the token expires at (`exp`), pre-margin.
    pub expires_at_epoch_s: u64,
}

/// Unique identifier for an in-flight MQTT publish awaiting a broker ack.
pub type CorrelationId = Uuid;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_transportable_requires_one_flag() {
        let mut ev = sample_event();
        ev.stream_flag = false;
        ev.batch_flag = false;
        assert!(!ev.is_transportable());
        ev.batch_flag = true;
        assert!(ev.is_transportable());
    }

    fn sample_event() -> EventRecord {
        EventRecord {
            id: None,
            event_id: EventName::new("Speed"),
            timestamp_ms: 0,
            timezone_ms: 0,
            size: 0,
            has_attach: false,
            priority: 0,
            payload_blob: vec![],
            app_id: "app".into(),
            topic: String::new(),
            mid: 0,
            stream_flag: false,
            batch_flag: false,
            granularity_level: 0,
            attachment_failure_reason: None,
        }
    }

    #[test]
    fn event_name_display_roundtrips() {
        let n = EventName::from("DTCStored");
        assert_eq!(n.to_string(), "DTCStored");
    }
}
