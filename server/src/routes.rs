//! HTTP route handlers for the InstaRelay server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /webhook` - Subscription handshake from Instagram
//! - `POST /webhook` - Inbound message notifications
//! - `GET /ws` - WebSocket endpoint for real-time subscribers
//! - `GET /health` - Health check endpoint
//!
//! The webhook routes are also served under `/instagram` so the callback URL
//! registered in the app dashboard can use either form.
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (verify token, Graph API settings)
//! - The broadcast hub that fans events out to WebSocket clients
//! - The webhook processor that enriches and relays messages
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use instarelay_server::routes::{create_router, AppState};
//! use instarelay_server::config::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config).expect("failed to build state");
//!     state.hub.initialize();
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{Message, WebSocket},
        rejection::QueryRejection,
        DefaultBodyLimit, Query, State, WebSocketUpgrade,
    },
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, debug_span, error, info, trace, warn, Span};

use crate::broadcast::{BroadcastHub, Subscription};
use crate::config::Config;
use crate::error::ServerError;
use crate::instagram::InstagramClient;
use crate::processor::WebhookProcessor;
use crate::types::WebhookPayload;
use crate::verify::{verify_subscription, HandshakeParams};

// ============================================================================
// Constants
// ============================================================================

/// Maximum body size for webhook notifications (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Body returned when a notification is accepted.
const EVENT_RECEIVED: &str = "EVENT_RECEIVED";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Fan-out hub for WebSocket subscribers.
    pub hub: BroadcastHub,

    /// Enriches inbound messages and emits them on the hub.
    pub processor: WebhookProcessor,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state from configuration.
    ///
    /// The hub is created unbound; call [`BroadcastHub::initialize`] once the
    /// server is ready to accept subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] if the Graph API client cannot be built.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let client = InstagramClient::new(
            config.graph_url.clone(),
            config.api_version.clone(),
            config.enrichment_timeout,
        )
        .map_err(|e| ServerError::internal(e.to_string()))?;
        let hub = BroadcastHub::with_capacity(config.hub_capacity);

        Ok(Self::with_components(config, hub, client))
    }

    /// Creates application state with a custom hub and Graph API client.
    ///
    /// Useful for testing or when the upstream endpoint is overridden.
    #[must_use]
    pub fn with_components(config: Config, hub: BroadcastHub, client: InstagramClient) -> Self {
        let processor = WebhookProcessor::new(client, hub.clone(), config.access_token.clone());

        Self {
            config: Arc::new(config),
            hub,
            processor,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// Every route is wrapped in request tracing and a permissive CORS policy
/// (any origin, `GET`/`POST`) so browser dashboards can subscribe directly.
/// Request spans record the path only: the handshake query string carries
/// the verify token.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .merge(webhook_router())
        .nest("/instagram", webhook_router())
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(cors)
                .layer(DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

fn request_span(request: &Request<Body>) -> Span {
    debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

fn webhook_router() -> Router<AppState> {
    Router::new().route("/webhook", get(get_webhook).post(post_webhook))
}

// ============================================================================
// Error Response Types
// ============================================================================

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

// ============================================================================
// GET /webhook - Subscription Handshake
// ============================================================================

/// GET /webhook - Confirms webhook ownership.
///
/// # Responses
///
/// - `200 OK` - Body is exactly `hub.challenge`
/// - `403 Forbidden` - Any other handshake, including an unparseable query;
///   empty body
async fn get_webhook(
    State(state): State<AppState>,
    query: Result<Query<HandshakeParams>, QueryRejection>,
) -> Response {
    let Query(params) = match query {
        Ok(query) => query,
        Err(rejection) => {
            debug!(reason = %rejection.body_text(), "Webhook handshake refused: malformed query");
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    match verify_subscription(&params, &state.config.verify_token) {
        Ok(challenge) => (StatusCode::OK, challenge.to_string()).into_response(),
        Err(err) => {
            debug!(reason = %err, "Webhook handshake refused");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

// ============================================================================
// POST /webhook - Message Notifications
// ============================================================================

/// POST /webhook - Accepts a message notification.
///
/// The payload is parsed synchronously; enrichment and emission run in a
/// background task so Instagram gets its acknowledgement immediately.
///
/// # Responses
///
/// - `200 OK` - Payload accepted (including payloads for other objects)
/// - `500 Internal Server Error` - Body is not a valid webhook payload
async fn post_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(err) => {
            error!(error = %err, body_len = body.len(), "Failed to process webhook payload");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(err.to_string()).with_code("invalid_payload")),
            )
                .into_response();
        }
    };

    info!(
        object = %payload.object,
        entries = payload.entry.len(),
        messages = payload.message_count(),
        "Webhook notification received"
    );

    let processor = state.processor.clone();
    tokio::spawn(async move {
        processor.process(payload).await;
    });

    (StatusCode::OK, EVENT_RECEIVED).into_response()
}

fn parse_payload(body: &[u8]) -> Result<WebhookPayload, ServerError> {
    Ok(serde_json::from_slice(body)?)
}

// ============================================================================
// GET /ws - WebSocket Subscription
// ============================================================================

/// GET /ws - WebSocket subscription endpoint.
///
/// Once connected, every hub emission is sent as a JSON text frame
/// `{"event": "...", "data": {...}}`. Messages from the client are ignored.
///
/// # Responses
///
/// - `101 Switching Protocols` - WebSocket upgrade successful
/// - `503 Service Unavailable` - Hub not initialized yet
async fn get_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if !state.hub.is_initialized() {
        warn!("WebSocket connection refused: broadcast hub not initialized");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("hub not ready").with_code("hub_not_ready")),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| async move {
        match state.hub.connect() {
            Some(subscription) => handle_websocket(socket, subscription).await,
            None => warn!("Broadcast hub unavailable after upgrade"),
        }
    })
}

/// Forwards hub frames to an established WebSocket until either side closes.
async fn handle_websocket(socket: WebSocket, mut subscription: Subscription) {
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let subscriber_id = subscription.id();

    let forward_task = tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Ok(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => {
                        trace!(subscriber_id = %subscriber_id, event = %frame.event, "Sending frame");
                        if let Err(err) = sender.send(Message::Text(json.into())).await {
                            debug!(error = %err, "Failed to send frame to WebSocket client");
                            break;
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "Failed to serialize hub frame");
                    }
                },
                Err(RecvError::Lagged(count)) => {
                    warn!(subscriber_id = %subscriber_id, skipped = count, "WebSocket client lagged, skipped events");
                }
                Err(RecvError::Closed) => {
                    debug!("Broadcast hub closed");
                    break;
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!(subscriber_id = %subscriber_id, "WebSocket client sent close frame");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "WebSocket error");
                break;
            }
        }
    }

    // Aborting drops the subscription, which deregisters the subscriber.
    forward_task.abort();
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Whether the broadcast hub accepts subscribers.
    pub hub_initialized: bool,

    /// Number of active WebSocket connections.
    pub connections: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        hub_initialized: state.hub.is_initialized(),
        connections: state.hub.subscriber_count(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
