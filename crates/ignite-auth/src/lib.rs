#![forbid(unsafe_code)]

//! **ignite-auth** – the Token Manager: activation, login, and the
//! activation backoff controller (spec §4.7, §4.8).
//!
//! HTTP transport is modeled as a trait ([`http::ActivationClient`],
//! [`http::LoginClient`]); this crate owns the protocol and state machine,
//! not the wire client.

pub mod backoff;
pub mod http;
pub mod token_manager;

pub use backoff::{ActivationBackoff, BackoffState};
pub use http::{ActivationClient, ActivationRequest, ActivationResponse, HttpError, LoginClient, LoginResponse};
pub use token_manager::{AuthError, TokenManager, TokenState};
