//! HTTP transport collaborators (spec §6). Modeled purely as traits — no
//! concrete HTTP client crate is pulled in here; the binary wires a real
//! implementation at startup (spec scopes the transport itself out of this
//! core).

use async_trait::async_trait;

/// Outcome categories an HTTP call can report, matching spec §4.7's
/// `ERR_NETWORK` / `ERR_RESPONSE_DATA` / status-coded responses.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    /// The request never got a response (connect failure, timeout, …).
    #[error("network error")]
    Network,
    /// A response arrived but couldn't be parsed into the expected shape.
    #[error("response data error: {0}")]
    ResponseData(String),
    /// HTTP 401 — invalid credential.
    #[error("unauthorized")]
    Unauthorized,
    /// HTTP 400 — invalid scope (or otherwise malformed request).
    #[error("bad request")]
    BadRequest,
    /// Any other non-2xx status.
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
}

/// Body posted to the activation endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActivationRequest {
    /// Activation qualifier (VIN or serial).
    #[serde(rename = "qualifierId")]
    pub qualifier_id: String,
    /// Vehicle identification number.
    pub vin: String,
    /// Device serial number.
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
    /// Modem IMEI.
    pub imei: String,
    /// Hardware version string.
    #[serde(rename = "hwVersion")]
    pub hw_version: String,
    /// Software version string.
    #[serde(rename = "swVersion")]
    pub sw_version: String,
    /// Product type.
    #[serde(rename = "productType")]
    pub product_type: String,
    /// Device type hint.
    #[serde(rename = "useDeviceType")]
    pub use_device_type: String,
}

/// Parsed activation response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ActivationResponse {
    /// Cloud-assigned device id.
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Passcode used for subsequent logins.
    #[serde(rename = "passCode")]
    pub pass_code: String,
}

/// Response from the login endpoint: the raw bearer token plus, when the
/// JWT payload itself lacked `iat`/`exp`, the `Date:` response header as a
/// fallback clock source (spec §6).
#[derive(Debug, Clone)]
pub struct LoginResponse {
    /// Bearer token (typically a JWT).
    pub access_token: String,
    /// Raw `Date:` response header, RFC 1123 format, if present.
    pub date_header: Option<String>,
}

/// POSTs `{qualifierId, vin, serialNumber, imei, hwVersion, swVersion,
/// productType, useDeviceType}` to the activation URL.
#[async_trait]
pub trait ActivationClient: Send + Sync {
    /// Perform the activation POST.
    async fn activate(&self, req: &ActivationRequest, url: &str) -> Result<ActivationResponse, HttpError>;
}

/// POSTs `grant_type=client_credentials&scope=<product_type>` with HTTP
/// Basic auth to the login URL.
#[async_trait]
pub trait LoginClient: Send + Sync {
    /// Perform the login POST. `device_id`/`passcode` become the Basic
    /// auth credential; `scope` is the requested OAuth scope.
    async fn login(
        &self,
        device_id: &str,
        passcode: &str,
        scope: &str,
        url: &str,
    ) -> Result<LoginResponse, HttpError>;
}
