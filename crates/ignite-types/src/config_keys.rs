//! Well-known configuration key paths recognized by the core (spec §6).
//!
//! These are plain string constants rather than a stringly-typed accessor
//! API — `ignite-config` builds the typed accessor structs on top of them.

/// HTTP activation endpoint.
pub const HCP_AUTH_ACTIVATE_URL: &str = "HCPAuth.activate_url";
/// HTTP login (token) endpoint.
pub const HCP_AUTH_AUTH_URL: &str = "HCPAuth.auth_url";
/// Safety margin percentage subtracted from the token TTL.
pub const HCP_AUTH_TOKEN_MARGIN_PERCENT: &str = "HCPAuth.token_marginPercent";

/// Storage engine file path.
pub const DAM_DATABASE_DB_STORE: &str = "DAM.Database.dbStore";
/// Byte ceiling before the granularity reducer runs.
pub const DAM_DATABASE_DB_SIZE_LIMIT: &str = "DAM.Database.dbSizeLimit";
/// Average record size hint, default 200, valid range [200, 500].
pub const DAM_DATABASE_EVENT_STORE_RECORD_SIZE: &str = "DAM.Database.eventStoreRecordSize";
/// Batch insert cap per transaction, default 50.
pub const DAM_DATABASE_MAX_INSERT_EVENT_IN_ONE_TXN: &str = "DAM.Database.maxInsertEventInOneTxn";
/// Enables/disables the interval validator stage.
pub const DAM_DATABASE_VALIDATE_INTERVAL: &str = "DAM.Database.validateInterval";
/// `{event_id: minimum_interval_ms}` map.
pub const DAM_DATABASE_INTERVAL_LIST: &str = "DAM.Database.IntervalList";
/// Prefix for the granularity reduction policy settings sub-tree.
pub const DAM_DATABASE_GRANULARITY_REDUCTION: &str = "DAM.Database.granularityReduction";

/// Backpressure high watermark.
pub const DAM_CPU_EVENT_QUEUE_MAX_SIZE: &str = "DAM.CpuProcessesLog.eventQueueMaxSize";
/// Backpressure hysteresis window size.
pub const DAM_CPU_EVENT_INSERT_WINDOW_SIZE: &str = "DAM.CpuProcessesLog.eventInsertWindowSize";

/// Gate events until the device is activated.
pub const DAM_UPLOAD_AFTER_ACTIVATION: &str = "DAM.UploadAfterActivation";
/// Event ids bypassing the activation gate.
pub const DAM_ACTIVATION_VALIDATOR_EXCEPTIONS: &str = "DAM.ActivationValidatorExceptions";
/// Event ids bypassing the session gate.
pub const DAM_SESSION_STATUS_EXCEPTION_EVENT: &str = "DAM.SessionStatusExceptionEvent";
/// RPM-derived ignition inference toggle (bool or `{IgnON, IgnOFF}`).
pub const DAM_USE_RPM_FOR_IGNITION: &str = "DAM.UseRpmForIgnition";

/// Gzip-compress MQTT publishes.
pub const MQTT_COMPRESSION: &str = "MQTT.compression";
/// Event-cycle periodicity, seconds.
pub const MQTT_PUB_TOPICS_EVENTS_PERIODICITY: &str = "MQTT.pub_topics.events.periodicity";
/// Max non-topiced events per publish, clamped to `[20, 175]`.
pub const MQTT_PUB_TOPICS_EVENTS_UPLOAD_COUNT: &str = "MQTT.pub_topics.events.uploadEventCount";
/// Alert-cycle periodicity, seconds.
pub const MQTT_PUB_TOPICS_ALERTS_PERIODICITY: &str = "MQTT.pub_topics.alerts.periodicity";
/// Event ids that trigger immediate upload regardless of periodicity.
pub const MQTT_FORCE_UPLOAD_EVENTS: &str = "MQTT.ForceUploadEvents";
/// Prefix used to reconstruct topiced-event publish topics.
pub const MQTT_TOPIC_PREFIX: &str = "MQTT.topicprefix";

/// Log sink configuration sub-tree (external collaborator).
pub const FILE_LOGGER: &str = "FileLogger";
