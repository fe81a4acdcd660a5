#![forbid(unsafe_code)]

//! **ignite-mqtt** – the MQTT Uploader (spec §4.9): the alert worker, the
//! event worker, and the topic-reconstruction/compression helpers they
//! share. The MQTT client itself is a trait ([`client::MqttClient`]); the
//! binary wires a real broker connection at startup.

pub mod alert_worker;
pub mod client;
pub mod compression;
pub mod event_worker;
pub mod topic;

pub use alert_worker::{AlertWorker, FailureCategory};
pub use client::{MqttClient, MqttError, PublishOutcome};
pub use event_worker::EventWorker;
