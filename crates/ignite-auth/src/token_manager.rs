//! Token Manager (spec §4.7): a process-wide singleton serializing
//! activation and login behind one mutex, so concurrent callers racing for
//! a fresh token during network recovery all observe a single refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ignite_bus::{CoreEvent, EventBus};
use ignite_crypto::{derive_passcode_key, CryptoError, Envelope};
use ignite_store_sqlite::SqliteStore;
use ignite_types::{local_config_keys, synthetic, AccessToken, DeviceIdentity, EventName};
use jsonwebtoken::{DecodingKey, Validation};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backoff::{ActivationBackoff, BackoffState};
use crate::http::{ActivationClient, ActivationRequest, HttpError, LoginClient};

/// Current lifecycle state of the Token Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No credential on file yet.
    NotActivated,
    /// An activation HTTP call is currently in flight.
    ActivationInProgress,
    /// A valid, unexpired token is held.
    ActivatedTokenValid,
    /// The last token expired; the next `get_token` triggers login.
    ActivatedTokenExpired,
    /// The broker rejected our credential at login (401/400).
    ActivatedLoginRejected,
    /// Activation is being held off by the backoff controller.
    Backoff,
    /// The last network call failed outright.
    NetworkError,
}

/// Errors surfaced to `get_token` callers.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The activation backoff controller rejected this attempt.
    #[error("activation backoff in effect")]
    Backoff,
    /// The HTTP transport failed outright.
    #[error("network error")]
    Network,
    /// A response could not be parsed into the expected shape.
    #[error("malformed response data")]
    ResponseData,
    /// The broker rejected the credential (401) or the scope (400).
    #[error("credential rejected")]
    CredentialRejected,
    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] ignite_store_core::StorageError),
    /// Envelope crypto failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<HttpError> for AuthError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Network => AuthError::Network,
            HttpError::Unauthorized | HttpError::BadRequest => AuthError::CredentialRejected,
            HttpError::ResponseData(_) | HttpError::UnexpectedStatus(_) => AuthError::ResponseData,
        }
    }
}

struct Inner {
    state: TokenState,
    token: Option<AccessToken>,
    token_issued_mono: Option<Instant>,
    ttl: Option<Duration>,
    activation_mono: Option<Instant>,
    backoff: ActivationBackoff,
}

/// The Token Manager singleton.
pub struct TokenManager {
    identity: DeviceIdentity,
    activate_url: String,
    auth_url: String,
    token_margin_percent: f64,
    activation_client: Arc<dyn ActivationClient>,
    login_client: Arc<dyn LoginClient>,
    store: SqliteStore,
    envelope_factory: Arc<dyn Fn(&[u8; 32]) -> Envelope + Send + Sync>,
    bus: Arc<dyn EventBus>,
    inner: Mutex<Inner>,
}

fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl TokenManager {
    /// Build the manager. `envelope_factory` builds an [`Envelope`] from a
    /// derived key and a fresh/persisted IV prefix — left to the caller so
    /// IV persistence (spec §4.2) stays in one place (`ignite-crypto`'s
    /// owner, not this crate).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: DeviceIdentity,
        activate_url: String,
        auth_url: String,
        token_margin_percent: f64,
        activation_client: Arc<dyn ActivationClient>,
        login_client: Arc<dyn LoginClient>,
        store: SqliteStore,
        envelope_factory: Arc<dyn Fn(&[u8; 32]) -> Envelope + Send + Sync>,
        bus: Arc<dyn EventBus>,
        backoff_state: BackoffState,
    ) -> Self {
        Self {
            identity,
            activate_url,
            auth_url,
            token_margin_percent,
            activation_client,
            login_client,
            store,
            envelope_factory,
            bus,
            inner: Mutex::new(Inner {
                state: TokenState::NotActivated,
                token: None,
                token_issued_mono: None,
                ttl: None,
                activation_mono: None,
                backoff: ActivationBackoff::new(backoff_state, 2_000, 300_000),
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> TokenState {
        self.inner.lock().await.state
    }

    /// Return the current valid token, activating/logging in as needed.
    pub async fn get_token(&self) -> Result<AccessToken, AuthError> {
        let mut guard = self.inner.lock().await;

        let login = self.store.local_config().get(local_config_keys::LOGIN).await?;
        let passcode = self.store.local_config().get(local_config_keys::PASSCODE).await?;

        if login.is_none() || passcode.is_none() {
            self.activate(&mut guard).await?;
        }

        let valid = match (&guard.token, guard.token_issued_mono, guard.ttl) {
            (Some(_), Some(issued), Some(ttl)) => issued.elapsed() < ttl,
            _ => false,
        };

        if valid {
            guard.state = TokenState::ActivatedTokenValid;
            return Ok(guard.token.clone().expect("checked Some above"));
        }

        guard.state = TokenState::ActivatedTokenExpired;
        self.login(&mut guard).await
    }

    async fn activate(&self, guard: &mut Inner) -> Result<(), AuthError> {
        let now = now_epoch_ms();
        if !guard.backoff.proceed(now) {
            guard.state = TokenState::Backoff;
            return Err(AuthError::Backoff);
        }

        guard.state = TokenState::ActivationInProgress;
        let req = ActivationRequest {
            qualifier_id: self.identity.qualifier_id.clone(),
            vin: self.identity.vin.clone(),
            serial_number: self.identity.serial.clone(),
            imei: self.identity.imei.clone(),
            hw_version: self.identity.hw_version.clone(),
            sw_version: self.identity.sw_version.clone(),
            product_type: self.identity.product_type.clone(),
            use_device_type: self.identity.use_device_type.clone(),
        };

        let response = match self.activation_client.activate(&req, &self.activate_url).await {
            Ok(resp) => resp,
            Err(e) => {
                guard.backoff.calculate_next_retry(now);
                guard.state = TokenState::NetworkError;
                return Err(e.into());
            }
        };

        guard.backoff.reset();
        guard.activation_mono = Some(Instant::now());

        let last_device_id = self
            .store
            .local_config()
            .get(local_config_keys::LAST_DEVICE_ID)
            .await?;
        let device_changed = last_device_id.as_deref() != Some(response.device_id.as_str());
        if device_changed {
            let had_previous = last_device_id.as_deref().is_some_and(|d| !d.is_empty());
            let _ = self.bus.publish(&CoreEvent::ActivationRotated {
                device_id: response.device_id.clone(),
                imei: self.identity.imei.clone(),
                serial_number: self.identity.serial.clone(),
                had_previous_device: had_previous,
            });
            info!(
                device_id = %response.device_id,
                had_previous,
                event = %EventName::new(synthetic::ACTIVATION_ALERT),
                "device activated with a new deviceId"
            );
        }

        let key = derive_passcode_key(&response.device_id, &self.identity.serial)?;
        let envelope = (self.envelope_factory)(&key);
        let encrypted_passcode = envelope.seal(response.pass_code.as_bytes(), None)?;

        self.store
            .local_config()
            .set(local_config_keys::LOGIN, &response.device_id)
            .await?;
        self.store
            .local_config()
            .set(
                local_config_keys::PASSCODE,
                &base64_encode(&encrypted_passcode),
            )
            .await?;
        self.store
            .local_config()
            .set(local_config_keys::LAST_DEVICE_ID, &response.device_id)
            .await?;

        Ok(())
    }

    /// At most one re-activation retry: a rejected login re-activates and
    /// logs in again, but a second rejection is a hard failure rather than
    /// an unbounded retry loop.
    async fn login(&self, guard: &mut Inner) -> Result<AccessToken, AuthError> {
        for attempt in 0..2 {
            let login = self
                .store
                .local_config()
                .get(local_config_keys::LOGIN)
                .await?
                .unwrap_or_default();
            let encoded_passcode = self
                .store
                .local_config()
                .get(local_config_keys::PASSCODE)
                .await?
                .unwrap_or_default();
            let encrypted_passcode = base64_decode(&encoded_passcode).unwrap_or_default();

            let key = derive_passcode_key(&login, &self.identity.serial)?;
            let envelope = (self.envelope_factory)(&key);
            let passcode_bytes = envelope.open(&encrypted_passcode, None)?;
            let passcode = String::from_utf8_lossy(&passcode_bytes).to_string();

            let login_mono = Instant::now();
            let response = match self
                .login_client
                .login(&login, &passcode, &self.identity.product_type, &self.auth_url)
                .await
            {
                Ok(resp) => resp,
                Err(HttpError::Unauthorized) | Err(HttpError::BadRequest) if attempt == 0 => {
                    guard.state = TokenState::ActivatedLoginRejected;
                    guard.token = None;
                    self.store.local_config().delete(local_config_keys::PASSCODE).await?;
                    self.activate(guard).await?;
                    continue;
                }
                Err(HttpError::Unauthorized) | Err(HttpError::BadRequest) => {
                    guard.state = TokenState::ActivatedLoginRejected;
                    return Err(AuthError::CredentialRejected);
                }
                Err(e) => {
                    guard.state = TokenState::NetworkError;
                    return Err(e.into());
                }
            };

            return self.finish_login(guard, response, login_mono).await;
        }

        unreachable!("loop always returns or continues exactly once before exhausting attempts")
    }

    async fn finish_login(
        &self,
        guard: &mut Inner,
        response: crate::http::LoginResponse,
        login_mono: Instant,
    ) -> Result<AccessToken, AuthError> {
        let (iat, exp) = parse_jwt_times(&response.access_token)
            .or_else(|| parse_date_header_fallback(response.date_header.as_deref()))
            .ok_or(AuthError::ResponseData)?;

        let ttl_s = (exp - iat).max(0) as f64;
        let margin = ttl_s * (self.token_margin_percent / 100.0);
        let ttl = Duration::from_secs_f64((ttl_s - margin).max(0.0));

        if let Some(activation_mono) = guard.activation_mono.take() {
            let drift_ms = (login_mono - activation_mono).as_millis() as i64;
            let activation_ts = now_epoch_ms() - drift_ms;
            let _ = self
                .store
                .local_config()
                .set(local_config_keys::ACTIVATION_TS, &activation_ts.to_string())
                .await;
        }

        guard.token = Some(AccessToken {
            token: response.access_token.clone(),
            issued_at_epoch_s: iat as u64,
            expires_at_epoch_s: exp as u64,
        });
        guard.token_issued_mono = Some(login_mono);
        guard.ttl = Some(ttl);
        guard.state = TokenState::ActivatedTokenValid;

        Ok(guard.token.clone().expect("just assigned"))
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}

#[derive(serde::Deserialize)]
struct JwtClaims {
    iat: Option<i64>,
    exp: Option<i64>,
}

fn parse_jwt_times(token: &str) -> Option<(i64, i64)> {
    use jsonwebtoken::Algorithm;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::RS256, Algorithm::ES256];
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let data = jsonwebtoken::decode::<JwtClaims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    match (data.claims.iat, data.claims.exp) {
        (Some(iat), Some(exp)) => Some((iat, exp)),
        _ => None,
    }
}

fn parse_date_header_fallback(date_header: Option<&str>) -> Option<(i64, i64)> {
    let header = date_header?;
    let parsed = chrono::DateTime::parse_from_rfc2822(header).ok()?;
    let iat = parsed.timestamp();
    warn!("JWT payload missing iat/exp, falling back to Date header");
    // Without an exp claim we can't know the real ttl; treat the response
    // as issued-now with no additional margin beyond the configured one.
    Some((iat, iat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_header_fallback_parses_rfc1123() {
        let (iat, exp) = parse_date_header_fallback(Some("Tue, 15 Nov 1994 08:12:31 GMT")).unwrap();
        assert_eq!(iat, exp);
    }

    #[test]
    fn missing_date_header_returns_none() {
        assert!(parse_date_header_fallback(None).is_none());
    }
}
