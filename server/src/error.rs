//! Error types for the InstaRelay server.
//!
//! This module defines the error type used by the HTTP layer. Component
//! errors live next to the component that produces them:
//!
//! - [`ConfigError`](crate::config::ConfigError) - configuration loading
//! - [`VerificationError`](crate::verify::VerificationError) - webhook handshake
//! - [`GraphApiError`](crate::instagram::GraphApiError) - upstream enrichment
//!
//! [`ServerError`] covers the failures that reach an HTTP response or abort
//! startup after configuration has loaded.

use thiserror::Error;

/// Top-level error type for the InstaRelay server.
///
/// # Error Categories
///
/// - **Payload errors**: Webhook bodies that do not match the expected shape
/// - **Internal errors**: Unexpected failures that don't fit other categories
#[derive(Debug, Error)]
pub enum ServerError {
    /// The inbound webhook payload could not be parsed.
    ///
    /// Answered with a 500 so the upstream platform redelivers.
    #[error("malformed webhook payload: {0}")]
    Payload(String),

    /// Unexpected internal server error.
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Creates a new internal error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use instarelay_server::error::ServerError;
    ///
    /// let err = ServerError::internal("failed to build HTTP client");
    /// assert!(matches!(err, ServerError::Internal(_)));
    /// ```
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn server_error_payload_displays_correctly() {
        let err = ServerError::Payload("missing field `entry`".to_string());
        assert_eq!(
            err.to_string(),
            "malformed webhook payload: missing field `entry`"
        );
    }

    #[test]
    fn server_error_internal_displays_correctly() {
        let err = ServerError::internal("listener closed");
        assert_eq!(err.to_string(), "internal server error: listener closed");
    }

    #[test]
    fn serde_error_converts_to_payload_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ServerError = parse_err.into();
        assert!(matches!(err, ServerError::Payload(_)));
    }

    #[test]
    fn serde_error_propagates_with_question_mark() {
        fn parse(body: &str) -> Result<serde_json::Value, ServerError> {
            Ok(serde_json::from_str(body)?)
        }

        assert!(parse("{}").is_ok());
        assert!(matches!(parse("{"), Err(ServerError::Payload(_))));
    }

    #[test]
    fn server_errors_have_no_source() {
        assert!(ServerError::Payload("x".to_string()).source().is_none());
        assert!(ServerError::internal("x").source().is_none());
    }
}
