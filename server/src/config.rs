//! Server configuration module.
//!
//! Parses configuration from environment variables for the Ripple server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `RIPPLE_ACCESS_TOKEN_SECRET` | Yes | - | Signing secret for access tokens |
//! | `RIPPLE_REFRESH_TOKEN_SECRET` | Yes | - | Signing secret for refresh tokens |
//! | `RIPPLE_STORE_URL` | No | `mem://` | Storage connection string |
//! | `RIPPLE_ACCESS_TOKEN_TTL_SECS` | No | 600 | Access-token validity window |
//! | `RIPPLE_REFRESH_TOKEN_TTL_SECS` | No | unset | Refresh-token expiry; unset = non-expiring |
//! | `PORT` | No | 3001 | HTTP server port |
//! | `RUST_LOG` | No | info | Log level filter |

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 3001;

/// Default access-token validity window (600 seconds).
const DEFAULT_ACCESS_TTL_SECS: u64 = 600;

/// Default storage connection string (in-process store).
const DEFAULT_STORE_URL: &str = "mem://";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// A numeric variable failed to parse.
    #[error("invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signing secret for access tokens.
    pub access_token_secret: String,

    /// Signing secret for refresh tokens. Must differ from the access
    /// secret so a leak of one does not compromise the other.
    pub refresh_token_secret: String,

    /// Storage connection string, dispatched on URL scheme.
    pub store_url: String,

    /// Access-token validity window.
    pub access_ttl: Duration,

    /// Refresh-token expiry. `None` preserves non-expiring refresh tokens;
    /// revocation then relies entirely on the persisted-value check.
    pub refresh_ttl: Option<Duration>,

    /// HTTP server port.
    pub port: u16,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Either token secret is missing or empty
    /// - The two secrets are identical
    /// - A numeric variable is not a valid number
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ripple_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let access_token_secret = require_env("RIPPLE_ACCESS_TOKEN_SECRET")?;
        let refresh_token_secret = require_env("RIPPLE_REFRESH_TOKEN_SECRET")?;
        let store_url =
            env::var("RIPPLE_STORE_URL").unwrap_or_else(|_| DEFAULT_STORE_URL.to_string());
        let access_ttl = Duration::from_secs(parse_secs(
            "RIPPLE_ACCESS_TOKEN_TTL_SECS",
            DEFAULT_ACCESS_TTL_SECS,
        )?);
        let refresh_ttl = parse_optional_secs("RIPPLE_REFRESH_TOKEN_TTL_SECS")?;
        let port = parse_port()?;

        let config = Self {
            access_token_secret,
            refresh_token_secret,
            store_url,
            access_ttl,
            refresh_ttl,
            port,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// The secrets must be distinct: sharing one value across both token
    /// kinds would let a refresh token pass access-token verification.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token_secret == self.refresh_token_secret {
            return Err(ConfigError::ValidationError(
                "access and refresh token secrets must differ".to_string(),
            ));
        }

        if self.access_ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "access token TTL must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Read a required, non-empty environment variable.
fn require_env(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

/// Parse a seconds-valued environment variable with a default.
fn parse_secs(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

/// Parse an optional seconds-valued environment variable.
///
/// Unset or empty means the policy is disabled.
fn parse_optional_secs(name: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => {
            let secs: u64 = value.parse()?;
            if secs == 0 {
                return Err(ConfigError::InvalidFormat {
                    var: name.to_string(),
                    message: "must be greater than zero when set".to_string(),
                });
            }
            Ok(Some(Duration::from_secs(secs)))
        }
        _ => Ok(None),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}
