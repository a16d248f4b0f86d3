//! Webhook subscription handshake verification.
//!
//! Before Instagram delivers notifications to a webhook it sends a one-time
//! `GET` with three query parameters:
//!
//! - `hub.mode` - always `subscribe`
//! - `hub.verify_token` - the shared secret configured in the app dashboard
//! - `hub.challenge` - an opaque value that must be echoed back
//!
//! [`verify_subscription`] is pure and stateless: identical inputs always
//! produce identical results.
//!
//! # Example
//!
//! ```rust
//! use instarelay_server::verify::{verify_subscription, HandshakeParams, VerificationError};
//!
//! let params = HandshakeParams {
//!     mode: Some("subscribe".to_string()),
//!     verify_token: Some("secret".to_string()),
//!     challenge: Some("1158201444".to_string()),
//! };
//!
//! assert_eq!(verify_subscription(&params, "secret"), Ok("1158201444"));
//! assert_eq!(
//!     verify_subscription(&params, "other"),
//!     Err(VerificationError::TokenMismatch)
//! );
//! ```

use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info};

/// The only `hub.mode` value accepted.
pub const SUBSCRIBE_MODE: &str = "subscribe";

/// Reasons a handshake is refused. All of them map to `403 Forbidden`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// `hub.mode` was present but not `subscribe`.
    #[error("unsupported hub.mode: {0}")]
    UnsupportedMode(String),

    /// A required query parameter was absent.
    #[error("missing query parameter: {0}")]
    MissingParameter(&'static str),

    /// `hub.verify_token` did not match the configured secret.
    #[error("verify token mismatch")]
    TokenMismatch,
}

/// Query parameters of the handshake request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,

    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,

    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Verifies a subscription handshake and returns the challenge to echo.
///
/// The token comparison runs in constant time. Token values are never logged.
///
/// # Errors
///
/// Returns a [`VerificationError`] when the mode is not `subscribe`, the mode
/// or token is missing, or the token does not match `expected_token`.
pub fn verify_subscription<'a>(
    params: &'a HandshakeParams,
    expected_token: &str,
) -> Result<&'a str, VerificationError> {
    let mode = params
        .mode
        .as_deref()
        .ok_or(VerificationError::MissingParameter("hub.mode"))?;
    if mode != SUBSCRIBE_MODE {
        debug!(mode = %mode, "Webhook handshake rejected: unsupported mode");
        return Err(VerificationError::UnsupportedMode(mode.to_string()));
    }

    let token = params
        .verify_token
        .as_deref()
        .ok_or(VerificationError::MissingParameter("hub.verify_token"))?;
    if !tokens_match(token, expected_token) {
        debug!("Webhook handshake rejected: verify token mismatch");
        return Err(VerificationError::TokenMismatch);
    }

    // An absent challenge is echoed as an empty body.
    let challenge = params.challenge.as_deref().unwrap_or_default();

    info!("WEBHOOK_VERIFIED");
    Ok(challenge)
}

/// Constant-time string comparison. Length differences short-circuit, which
/// only leaks the secret's length.
fn tokens_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
