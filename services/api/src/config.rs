//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The
//! `.env` file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    /// Durable token file; sessions survive process restarts through it.
    pub token_store_path: PathBuf,
    /// SOAP document-scan endpoint. Optional so deployments without the
    /// upload integration can still run; completion requests carrying
    /// signature payloads then fail cleanly.
    pub upload_url: Option<String>,
    pub upload_timeout: Duration,
    pub cors_origin: String,
    /// Whether SVG signature rasterization is requested. No converter
    /// backend ships in this build, so enabling it only changes the
    /// startup warning; the port stays pluggable.
    pub svg_conversion: bool,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for
    /// development, but this is skipped in test environments to ensure
    /// tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let token_store_path = std::env::var("TOKEN_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("driver_session_tokens.json"));

        let upload_url = std::env::var("UPLOAD_URL").ok();

        let upload_timeout_secs = match std::env::var("UPLOAD_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue(
                    "UPLOAD_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a valid number of seconds", raw),
                )
            })?,
            Err(_) => 30,
        };

        let cors_origin = std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".to_string());

        let svg_conversion = match std::env::var("SVG_CONVERSION") {
            Ok(raw) => match raw.to_lowercase().as_str() {
                "on" | "true" | "1" => true,
                "off" | "false" | "0" => false,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "SVG_CONVERSION".to_string(),
                        format!("'{}' is not one of on/off", raw),
                    ))
                }
            },
            Err(_) => false,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            token_store_path,
            upload_url,
            upload_timeout: Duration::from_secs(upload_timeout_secs),
            cors_origin,
            svg_conversion,
        })
    }
}
