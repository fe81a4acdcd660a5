//! Typed accessor structs mirroring the JSON configuration keys in spec §6.
//!
//! Per REDESIGN FLAGS (spec §9), subsystems never look up a dotted string
//! path at runtime — they hold one of these structs, produced once by
//! [`crate::ConfigTree::snapshot`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `HCPAuth.*` — activation/login endpoints and token margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HcpAuthConfig {
    /// `HCPAuth.activate_url`
    pub activate_url: String,
    /// `HCPAuth.auth_url`
    pub auth_url: String,
    /// `HCPAuth.token_marginPercent` — safety margin subtracted from TTL.
    #[serde(default = "default_margin_percent", rename = "token_marginPercent")]
    pub token_margin_percent: f64,
}

fn default_margin_percent() -> f64 {
    10.0
}

/// `DAM.Database.*` — storage engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `DAM.Database.dbStore`
    #[serde(rename = "dbStore")]
    pub db_store: String,
    /// `DAM.Database.dbSizeLimit`, bytes.
    #[serde(rename = "dbSizeLimit")]
    pub db_size_limit: u64,
    /// `DAM.Database.eventStoreRecordSize`, default 200, range [200, 500].
    #[serde(rename = "eventStoreRecordSize", default = "default_record_size")]
    pub event_store_record_size: u32,
    /// `DAM.Database.maxInsertEventInOneTxn`, default 50.
    #[serde(rename = "maxInsertEventInOneTxn", default = "default_max_insert")]
    pub max_insert_event_in_one_txn: u32,
    /// `DAM.Database.validateInterval`
    #[serde(rename = "validateInterval", default)]
    pub validate_interval: bool,
    /// `DAM.Database.IntervalList` — `{event_id: minimum_interval_ms}`.
    /// `-1` means "drop all instances of this event id".
    #[serde(rename = "IntervalList", default)]
    pub interval_list: HashMap<String, i64>,
    /// `DAM.Database.granularityReduction.*`
    #[serde(rename = "granularityReduction", default)]
    pub granularity_reduction: GranularityReductionConfig,
}

fn default_record_size() -> u32 {
    200
}

fn default_max_insert() -> u32 {
    50
}

/// `DAM.Database.granularityReduction.*` — reducer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GranularityReductionConfig {
    /// Percentage of `dbSizeLimit` the reducer must reclaim before stopping.
    #[serde(default = "default_free_gain")]
    pub free_storage_gain_percent: f64,
    /// Percentage of rows the FIFO fallback deletes, oldest first.
    #[serde(default = "default_fifo_percent")]
    pub fifo_percent: f64,
    /// Suffix identifying pre-trigger event ids (default `"BEF"`).
    #[serde(default = "default_pre_suffix")]
    pub pre_trigger_suffix: String,
    /// Suffix identifying post-trigger event ids (default `"AFT"`).
    #[serde(default = "default_post_suffix")]
    pub post_trigger_suffix: String,
    /// Event ids exempted from every reduction policy in addition to the
    /// mandatory stream-mode exemption.
    #[serde(default)]
    pub exempt_event_ids: Vec<String>,
    /// Order in which reduction policies are attempted.
    #[serde(default = "default_policy_order")]
    pub policy_order: Vec<String>,
}

fn default_free_gain() -> f64 {
    20.0
}

fn default_fifo_percent() -> f64 {
    20.0
}

fn default_pre_suffix() -> String {
    "BEF".to_string()
}

fn default_post_suffix() -> String {
    "AFT".to_string()
}

fn default_policy_order() -> Vec<String> {
    vec![
        "RemoveAlternateSimilarEvent".to_string(),
        "RemoveRepeatedTriggerEvents_LeaveFirstAndLast".to_string(),
        "RemoveTriggerEventPostFiles".to_string(),
    ]
}

/// `DAM.CpuProcessesLog.*` — queue backpressure thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// `DAM.CpuProcessesLog.eventQueueMaxSize`
    #[serde(rename = "eventQueueMaxSize")]
    pub queue_max_bytes: u64,
    /// `DAM.CpuProcessesLog.eventInsertWindowSize`
    #[serde(rename = "eventInsertWindowSize")]
    pub window_bytes: u64,
}

/// RPM-derived ignition inference toggle: either a single boolean applied
/// to both edges, or independent on/off edge toggles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpmIgnitionConfig {
    /// Same toggle for both the on-edge and off-edge.
    Uniform(bool),
    /// Independent toggles.
    PerEdge {
        /// Whether RPM > 0 should infer ignition-on.
        #[serde(rename = "IgnON")]
        ign_on: bool,
        /// Whether RPM == 0 should infer ignition-off.
        #[serde(rename = "IgnOFF")]
        ign_off: bool,
    },
}

impl Default for RpmIgnitionConfig {
    fn default() -> Self {
        RpmIgnitionConfig::Uniform(false)
    }
}

/// `DAM.*` gating configuration (activation gate, session gate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GateConfig {
    /// `DAM.UploadAfterActivation`
    #[serde(default)]
    pub upload_after_activation: bool,
    /// `DAM.ActivationValidatorExceptions`
    #[serde(default)]
    pub activation_validator_exceptions: Vec<String>,
    /// `DAM.SessionStatusExceptionEvent`
    #[serde(default)]
    pub session_status_exception_event: Vec<String>,
    /// `DAM.UseRpmForIgnition`
    #[serde(default)]
    pub use_rpm_for_ignition: RpmIgnitionConfig,
}

/// `MQTT.*` — upload cadence and topic reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// `MQTT.compression`
    #[serde(default = "default_true")]
    pub compression: bool,
    /// `MQTT.pub_topics.events.periodicity`, seconds.
    pub event_periodicity_s: u64,
    /// `MQTT.pub_topics.events.uploadEventCount`, clamped to `[20, 175]`.
    pub max_event_upload_cnt: u32,
    /// `MQTT.pub_topics.alerts.periodicity`, seconds.
    pub alert_periodicity_s: u64,
    /// `MQTT.ForceUploadEvents`
    #[serde(default)]
    pub force_upload_events: Vec<String>,
    /// `MQTT.topicprefix`
    pub topic_prefix: String,
}

fn default_true() -> bool {
    true
}

impl MqttConfig {
    /// Clamp the configured upload count into the mandated `[20, 175]`
    /// range (spec §4.9).
    pub fn clamped_max_event_upload_cnt(&self) -> u32 {
        self.max_event_upload_cnt.clamp(20, 175)
    }
}

/// Upload mode policy inputs (spec §4.5), nested under the JSON root as
/// `UploadMode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UploadModeConfig {
    /// Modes the device supports at all.
    #[serde(default)]
    pub supported_modes: Vec<UploadMode>,
    /// Modes used when an event id has no explicit override.
    #[serde(default)]
    pub default_mode: Vec<UploadMode>,
    /// Per-event-id overrides, keyed by mode.
    #[serde(default)]
    pub event_list: HashMap<UploadMode, Vec<String>>,
    /// Whether uploads are permitted before activation completes for
    /// anonymous (unauthenticated) event classes.
    #[serde(default)]
    pub anonymous_upload_supported: bool,
    /// Whether events may be queued locally while offline and forwarded
    /// once connectivity returns.
    #[serde(default = "default_true")]
    pub store_and_forward_supported: bool,
}

/// Transport classification for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Online, per-event MQTT publish.
    Stream,
    /// Offline, bulk HTTP upload with attachments.
    Batch,
}

/// Top-level configuration tree, mirroring the JSON document described in
/// spec §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgniteConfig {
    /// `HCPAuth.*`
    #[serde(rename = "HCPAuth")]
    pub hcp_auth: HcpAuthConfig,
    /// `DAM.Database.*`, `DAM.CpuProcessesLog.*`, and the gating keys.
    #[serde(rename = "DAM")]
    pub dam: DamConfig,
    /// `MQTT.*`
    #[serde(rename = "MQTT")]
    pub mqtt: MqttConfig,
    /// `UploadMode.*` (not under `DAM` in the original source's scattered
    /// keys, but grouped here for a single typed accessor).
    #[serde(rename = "UploadMode", default)]
    pub upload_mode: UploadModeConfig,
}

/// `DAM.*` sub-tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamConfig {
    /// `DAM.Database.*`
    #[serde(rename = "Database")]
    pub database: DatabaseConfig,
    /// `DAM.CpuProcessesLog.*`
    #[serde(rename = "CpuProcessesLog")]
    pub cpu_processes_log: QueueConfig,
    /// Gating configuration, flattened from several `DAM.*` keys.
    #[serde(flatten)]
    pub gate: GateConfig,
}
