//! Concrete `reqwest`-backed implementations of the [`ActivationClient`] and
//! [`LoginClient`] collaborator traits `ignite-auth` leaves abstract.

use async_trait::async_trait;
use ignite_auth::{ActivationClient, ActivationRequest, ActivationResponse, HttpError, LoginClient, LoginResponse};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

fn status_to_err(status: StatusCode) -> HttpError {
    match status {
        StatusCode::UNAUTHORIZED => HttpError::Unauthorized,
        StatusCode::BAD_REQUEST => HttpError::BadRequest,
        other => HttpError::UnexpectedStatus(other.as_u16()),
    }
}

/// Shared reqwest client for both activation and login calls.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivationClient for ReqwestHttpClient {
    async fn activate(&self, req: &ActivationRequest, url: &str) -> Result<ActivationResponse, HttpError> {
        let resp = self
            .client
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(|_| HttpError::Network)?;

        if !resp.status().is_success() {
            return Err(status_to_err(resp.status()));
        }

        resp.json::<ActivationResponse>()
            .await
            .map_err(|e| HttpError::ResponseData(e.to_string()))
    }
}

#[derive(Deserialize)]
struct LoginBody {
    access_token: String,
}

#[async_trait]
impl LoginClient for ReqwestHttpClient {
    async fn login(&self, device_id: &str, passcode: &str, scope: &str, url: &str) -> Result<LoginResponse, HttpError> {
        let resp = self
            .client
            .post(url)
            .basic_auth(device_id, Some(passcode))
            .form(&[("grant_type", "client_credentials"), ("scope", scope)])
            .send()
            .await
            .map_err(|_| HttpError::Network)?;

        if !resp.status().is_success() {
            return Err(status_to_err(resp.status()));
        }

        let date_header = resp
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body: LoginBody = resp.json().await.map_err(|e| HttpError::ResponseData(e.to_string()))?;

        Ok(LoginResponse {
            access_token: body.access_token,
            date_header,
        })
    }
}
