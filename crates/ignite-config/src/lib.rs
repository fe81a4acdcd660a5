#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ignite-config** – typed configuration tree for ignite-client.
//!
//! Loads the JSON configuration document described in spec §6 via the
//! `config` crate (file + environment layering), exposes it as the strongly
//! typed [`schema::IgniteConfig`] rather than stringly-typed path lookups
//! (spec §9 REDESIGN FLAGS), and supports the cloud-overlay rebuild cycle
//! `ignite-settings::update_config` drives.

pub mod schema;
mod tree;

pub use schema::{
    DamConfig, DatabaseConfig, GateConfig, GranularityReductionConfig, HcpAuthConfig,
    IgniteConfig, MqttConfig, QueueConfig, RpmIgnitionConfig, UploadMode, UploadModeConfig,
};
pub use tree::{ConfigError, ConfigTree};
