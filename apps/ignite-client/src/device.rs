//! External-collaborator details the core doesn't read from [`ConfigTree`]:
//! the device's own identity and the broker/topic endpoints it connects to.

use ignite_types::DeviceIdentity;
use serde::Deserialize;

/// Loaded from `--device <path>`. Kept separate from the JSON configuration
/// tree because it identifies *this device*, not application behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProfile {
    pub identity: DeviceIdentity,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub alerts_topic: String,
    pub events_topic: String,
}
