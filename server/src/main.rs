//! InstaRelay Server - Main entry point.
//!
//! This binary starts the webhook relay with:
//! - Structured JSON logging
//! - `.env` loading for local development
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`instarelay_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! WEBHOOK_VERIFICATION="my-verify-token" \
//! INSTAGRAM_ACCESS_TOKEN="IGAA..." \
//! PORT=3000 \
//! cargo run --release --bin instarelay-server
//! ```

use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use instarelay_server::config::Config;
use instarelay_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is the normal case in production.
    let dotenv_loaded = dotenvy::dotenv().is_ok();

    init_logging();

    if dotenv_loaded {
        info!("Loaded environment from .env file");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  WEBHOOK_VERIFICATION   - Verify token configured for the Instagram webhook");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  INSTAGRAM_ACCESS_TOKEN - Graph API token used to enrich messages");
            eprintln!("  PORT                   - HTTP server port (default: 3000)");
            eprintln!("  INSTAGRAM_GRAPH_URL    - Graph API base URL (default: https://graph.instagram.com)");
            eprintln!("  INSTAGRAM_API_VERSION  - Graph API version (default: v22.0)");
            eprintln!("  ENRICHMENT_TIMEOUT_MS  - Enrichment request timeout (default: 5000)");
            eprintln!("  HUB_CHANNEL_CAPACITY   - Per-subscriber event buffer (default: 1000)");
            eprintln!("  RUST_LOG               - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    info!(
        port = config.port,
        graph_url = %config.graph_url,
        api_version = %config.api_version,
        enrichment = config.access_token.is_some(),
        enrichment_timeout_ms = config.enrichment_timeout.as_millis() as u64,
        "InstaRelay server starting"
    );

    let state = match AppState::new(config.clone()) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "Failed to build application state");
            return ExitCode::from(1);
        }
    };

    let hub = state.hub.clone();
    let app = create_router(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    // The listener is bound, so subscribers can now be accepted.
    hub.initialize();

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!(
        subscribers = hub.subscriber_count(),
        "Server shutdown complete"
    );
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` (default `info`, with request-level
/// detail from `tower_http`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGTERM or SIGINT is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
