//! MQTT transport collaborator (spec §6). Modeled purely as a trait — no
//! concrete MQTT client crate is pulled in here; the binary wires a real
//! implementation (connection management, TLS, keepalive) at startup.

use async_trait::async_trait;

/// Errors a publish attempt can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MqttError {
    /// The client is not currently connected to the broker.
    #[error("not connected")]
    NotConnected,
    /// The publish call itself failed (broker rejected, transport error).
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

/// Outcome of a single publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Broker accepted the publish and assigned this message id.
    ///
    /// Spec §4.9's publish/ack protocol: `mid <= 0` means the broker could
    /// not be reached (treated as [`MqttError::NotConnected`] by callers
    /// rather than as this variant); a positive `mid` is the row's pending
    /// ack token until [`MqttClient::wait_for_ack`] resolves it.
    Accepted(i64),
}

/// A connected MQTT publisher. Implementations own reconnect, TLS, and
/// keepalive; this trait only exposes the publish/ack surface the upload
/// workers need.
#[async_trait]
pub trait MqttClient: Send + Sync {
    /// Publish `payload` to `topic` at at-least-once QoS. Returns the
    /// broker-assigned message id used to correlate the eventual ack.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<PublishOutcome, MqttError>;

    /// Block until the broker acks `mid`, or the implementation's own
    /// timeout elapses (treated by callers as a transient failure, not a
    /// disconnect).
    async fn wait_for_ack(&self, mid: i64) -> Result<(), MqttError>;

    /// Whether the client currently believes it holds a live connection.
    fn is_connected(&self) -> bool;
}
