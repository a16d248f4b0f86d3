//! Instagram Graph API client for message enrichment.
//!
//! Webhook notifications only carry account ids. [`InstagramClient`] looks up
//! a message through the Graph API to learn who sent it:
//!
//! ```text
//! GET {graph_url}/{api_version}/{message_id}?fields=id,created_time,from,to,message&access_token=...
//! ```
//!
//! # Architecture
//!
//! The client is cheap to clone and shared by every processing task. It:
//! - Bounds every call with a request timeout
//! - Makes exactly one attempt per message (no retries)
//! - Never writes the access token to logs
//!
//! # Example
//!
//! ```rust,ignore
//! use instarelay_server::instagram::InstagramClient;
//!
//! let client = InstagramClient::new("https://graph.instagram.com", "v22.0", timeout)?;
//! let info = client.fetch_message_info("aWdfZAG1faXRlbTox", &token).await?;
//! println!("sent by {:?}", info.from);
//! ```

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::MessageInfo;

/// Default timeout for Graph API requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Fields requested from the message endpoint.
const MESSAGE_FIELDS: &str = "id,created_time,from,to,message";

/// Errors that can occur when calling the Graph API.
#[derive(Debug, Error)]
pub enum GraphApiError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The Graph API could not be reached.
    #[error("graph api unavailable: {0}")]
    Unavailable(String),

    /// The Graph API answered with a non-success status.
    #[error("graph api returned {status}: {message}")]
    Status {
        /// HTTP status code returned.
        status: StatusCode,
        /// `error.message` from the response body, or the raw body.
        message: String,
    },

    /// The response body was not the expected JSON.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration error.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

/// Error envelope returned by the Graph API on failure.
#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    message: String,
}

/// Result of trying to enrich one message.
///
/// Enrichment failure is never fatal: the processor still relays the base
/// fields of the message.
#[derive(Debug)]
pub enum EnrichmentOutcome {
    /// Metadata was fetched successfully.
    Enriched(MessageInfo),
    /// No metadata is available; the reason is kept for logging.
    Unavailable(String),
}

impl EnrichmentOutcome {
    /// Returns the fetched metadata, if any.
    #[must_use]
    pub fn info(&self) -> Option<&MessageInfo> {
        match self {
            Self::Enriched(info) => Some(info),
            Self::Unavailable(_) => None,
        }
    }
}

impl From<Result<MessageInfo, GraphApiError>> for EnrichmentOutcome {
    fn from(result: Result<MessageInfo, GraphApiError>) -> Self {
        match result {
            Ok(info) => Self::Enriched(info),
            Err(err) => Self::Unavailable(err.to_string()),
        }
    }
}

/// Client for the Instagram Graph API message endpoint.
#[derive(Debug, Clone)]
pub struct InstagramClient {
    http_client: Client,
    base_url: String,
    api_version: String,
    timeout: Duration,
}

impl InstagramClient {
    /// Creates a new Graph API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Graph API root (e.g. `https://graph.instagram.com`)
    /// * `api_version` - Version path segment (e.g. `v22.0`)
    /// * `timeout` - Upper bound for each request
    ///
    /// # Errors
    ///
    /// Returns [`GraphApiError::Configuration`] if the HTTP client cannot be created.
    pub fn new(
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GraphApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let api_version = api_version.into().trim_matches('/').to_string();

        let http_client = Client::builder().timeout(timeout).build().map_err(|e| {
            GraphApiError::Configuration(format!("failed to create HTTP client: {e}"))
        })?;

        Ok(Self {
            http_client,
            base_url,
            api_version,
            timeout,
        })
    }

    /// Fetches metadata for a single message.
    ///
    /// # Errors
    ///
    /// - [`GraphApiError::Timeout`] - No response within the configured timeout
    /// - [`GraphApiError::Unavailable`] - Connection or transport failure
    /// - [`GraphApiError::Status`] - Non-success HTTP status
    /// - [`GraphApiError::InvalidResponse`] - Body is not valid message JSON
    pub async fn fetch_message_info(
        &self,
        message_id: &str,
        access_token: &str,
    ) -> Result<MessageInfo, GraphApiError> {
        let url = format!("{}/{}/{}", self.base_url, self.api_version, message_id);

        debug!(url = %url, "Fetching message information from Graph API");

        let response = self
            .http_client
            .get(&url)
            .query(&[("fields", MESSAGE_FIELDS), ("access_token", access_token)])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GraphErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            warn!(status = %status, message_id = %message_id, "Graph API request failed");
            return Err(GraphApiError::Status { status, message });
        }

        let info: MessageInfo = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GraphApiError::Timeout(self.timeout)
            } else {
                GraphApiError::InvalidResponse(format!(
                    "failed to parse message info: {}",
                    e.without_url()
                ))
            }
        })?;

        debug!(message_id = %info.id, "Fetched message information");

        Ok(info)
    }

    /// Fetches metadata and folds the result into an [`EnrichmentOutcome`].
    pub async fn enrich(&self, message_id: &str, access_token: &str) -> EnrichmentOutcome {
        self.fetch_message_info(message_id, access_token)
            .await
            .into()
    }

    /// Returns the configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Maps a transport-level reqwest error. The URL is stripped because it
    /// carries the access token as a query parameter.
    fn transport_error(&self, err: reqwest::Error) -> GraphApiError {
        if err.is_timeout() {
            return GraphApiError::Timeout(self.timeout);
        }

        let is_connect = err.is_connect();
        let err = err.without_url();
        if is_connect {
            GraphApiError::Unavailable(format!("connection failed: {err}"))
        } else {
            GraphApiError::Unavailable(format!("request failed: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(mock_server: &MockServer) -> InstagramClient {
        InstagramClient::new(mock_server.uri(), "v22.0", DEFAULT_REQUEST_TIMEOUT)
            .expect("failed to create test client")
    }

    // ==================== InstagramClient::new tests ====================

    #[test]
    fn new_trims_trailing_slashes() {
        let client = InstagramClient::new(
            "https://graph.instagram.com//",
            "/v22.0/",
            DEFAULT_REQUEST_TIMEOUT,
        )
        .expect("should create client");
        assert_eq!(client.base_url(), "https://graph.instagram.com");
        assert_eq!(client.api_version, "v22.0");
    }

    // ==================== fetch_message_info tests ====================

    #[tokio::test]
    async fn fetch_message_info_returns_info_on_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v22.0/m1"))
            .and(query_param("fields", MESSAGE_FIELDS))
            .and(query_param("access_token", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m1",
                "created_time": "2025-03-01T12:00:00+0000",
                "from": {"id": "A", "username": "alice"},
                "to": {"data": [{"id": "B", "username": "bob"}]},
                "message": "hi"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let info = client
            .fetch_message_info("m1", "test-token")
            .await
            .expect("should fetch info");

        assert_eq!(info.id, "m1");
        let from = info.from.expect("from should be present");
        assert_eq!(from.id, "A");
        assert_eq!(from.username.as_deref(), Some("alice"));
        assert_eq!(info.message.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn fetch_message_info_surfaces_graph_error_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v22.0/m1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "message": "Invalid OAuth access token",
                    "type": "OAuthException",
                    "code": 190
                }
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client.fetch_message_info("m1", "bad-token").await;

        match result {
            Err(GraphApiError::Status { status, message }) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "Invalid OAuth access token");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_message_info_keeps_raw_body_for_unknown_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v22.0/m1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client.fetch_message_info("m1", "token").await;

        assert!(matches!(
            result,
            Err(GraphApiError::Status { ref message, .. }) if message == "upstream down"
        ));
    }

    #[tokio::test]
    async fn fetch_message_info_rejects_malformed_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v22.0/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client.fetch_message_info("m1", "token").await;

        assert!(matches!(result, Err(GraphApiError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn fetch_message_info_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v22.0/m1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "m1"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let client = InstagramClient::new(mock_server.uri(), "v22.0", Duration::from_millis(100))
            .expect("should create client");
        let result = client.fetch_message_info("m1", "token").await;

        assert!(matches!(result, Err(GraphApiError::Timeout(_))));
    }

    #[tokio::test]
    async fn fetch_message_info_returns_unavailable_on_connection_error() {
        let client = InstagramClient::new("http://127.0.0.1:1", "v22.0", DEFAULT_REQUEST_TIMEOUT)
            .expect("should create client");

        let result = client.fetch_message_info("m1", "secret-token").await;

        match result {
            Err(GraphApiError::Unavailable(detail)) => {
                assert!(!detail.contains("secret-token"));
            }
            Err(GraphApiError::Timeout(_)) => {}
            other => panic!("expected Unavailable or Timeout, got {other:?}"),
        }
    }

    // ==================== enrich tests ====================

    #[tokio::test]
    async fn enrich_maps_success_to_enriched() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v22.0/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m1",
                "from": {"id": "A", "username": "alice"}
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let outcome = client.enrich("m1", "token").await;

        assert!(matches!(outcome, EnrichmentOutcome::Enriched(_)));
        assert_eq!(outcome.info().map(|i| i.id.as_str()), Some("m1"));
    }

    #[tokio::test]
    async fn enrich_maps_failure_to_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v22.0/m1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let outcome = client.enrich("m1", "token").await;

        assert!(matches!(outcome, EnrichmentOutcome::Unavailable(_)));
        assert!(outcome.info().is_none());
    }
}
