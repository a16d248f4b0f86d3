//! Server configuration module.
//!
//! Parses configuration from environment variables for the InstaRelay server.
//! `main` loads a `.env` file first when one is present.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `WEBHOOK_VERIFICATION` | Yes | - | Shared secret for the webhook handshake |
//! | `INSTAGRAM_ACCESS_TOKEN` | No | - | Token used for message enrichment |
//! | `PORT` | No | 3000 | HTTP server port |
//! | `INSTAGRAM_GRAPH_URL` | No | `https://graph.instagram.com` | Graph API base URL |
//! | `INSTAGRAM_API_VERSION` | No | `v22.0` | Graph API version segment |
//! | `ENRICHMENT_TIMEOUT_MS` | No | 5000 | Upper bound for one enrichment call |
//! | `HUB_CHANNEL_CAPACITY` | No | 1000 | Events buffered per slow subscriber |

use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::broadcast::DEFAULT_CHANNEL_CAPACITY;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 3000;

/// Default Instagram Graph API base URL.
pub const DEFAULT_GRAPH_URL: &str = "https://graph.instagram.com";

/// Default Instagram Graph API version.
pub const DEFAULT_API_VERSION: &str = "v22.0";

/// Default upper bound for a single enrichment request.
const DEFAULT_ENRICHMENT_TIMEOUT_MS: u64 = 5_000;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// Server configuration parsed from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Shared secret the platform echoes back during the webhook handshake.
    pub verify_token: String,

    /// Access token for the Graph API. Enrichment is skipped when absent.
    pub access_token: Option<String>,

    /// HTTP server port.
    pub port: u16,

    /// Graph API base URL, without trailing slash.
    pub graph_url: String,

    /// Graph API version path segment (e.g. `v22.0`).
    pub api_version: String,

    /// Request timeout applied to every enrichment call.
    pub enrichment_timeout: Duration,

    /// Broadcast channel capacity for the subscriber hub.
    pub hub_capacity: usize,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `WEBHOOK_VERIFICATION` is missing or empty
    /// - A numeric variable does not parse or is zero
    ///
    /// # Example
    ///
    /// ```no_run
    /// use instarelay_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let verify_token = match env::var("WEBHOOK_VERIFICATION") {
            Ok(token) if !token.trim().is_empty() => token,
            Ok(_) => {
                return Err(ConfigError::invalid(
                    "WEBHOOK_VERIFICATION",
                    "cannot be empty",
                ))
            }
            Err(_) => {
                return Err(ConfigError::MissingEnvVar(
                    "WEBHOOK_VERIFICATION".to_string(),
                ))
            }
        };

        let access_token = env::var("INSTAGRAM_ACCESS_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        let port = parse_number("PORT", DEFAULT_PORT)?;
        let graph_url = env::var("INSTAGRAM_GRAPH_URL")
            .unwrap_or_else(|_| DEFAULT_GRAPH_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let api_version =
            env::var("INSTAGRAM_API_VERSION").unwrap_or_else(|_| DEFAULT_API_VERSION.to_string());
        let timeout_ms = parse_number("ENRICHMENT_TIMEOUT_MS", DEFAULT_ENRICHMENT_TIMEOUT_MS)?;
        let hub_capacity = parse_number("HUB_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY)?;

        if timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "ENRICHMENT_TIMEOUT_MS",
                "must be greater than zero",
            ));
        }

        if hub_capacity == 0 {
            return Err(ConfigError::invalid(
                "HUB_CHANNEL_CAPACITY",
                "must be greater than zero",
            ));
        }

        if access_token.is_none() {
            warn!(
                "INSTAGRAM_ACCESS_TOKEN is not set - messages will be relayed without \
                 contact enrichment"
            );
        }

        Ok(Self {
            verify_token,
            access_token,
            port,
            graph_url,
            api_version,
            enrichment_timeout: Duration::from_millis(timeout_ms),
            hub_capacity,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("verify_token", &"<redacted>")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("port", &self.port)
            .field("graph_url", &self.graph_url)
            .field("api_version", &self.api_version)
            .field("enrichment_timeout", &self.enrichment_timeout)
            .field("hub_capacity", &self.hub_capacity)
            .finish()
    }
}

/// Parse a numeric environment variable, falling back to `default` when unset.
fn parse_number<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid(name, format!("{e}"))),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => {
            Err(ConfigError::invalid(name, "contains invalid unicode"))
        }
    }
}
