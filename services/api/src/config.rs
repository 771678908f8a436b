//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::FixedOffset;
use std::net::SocketAddr;
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
    pub db_max_connections: u32,
    pub log_level: Level,
    pub cors_origin: String,
    /// The clinic's local offset from UTC, used to decide which day "today" is.
    pub clinic_offset: FixedOffset,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let db_max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u32>()
            .map_err(|e| {
                ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string(), e.to_string())
            })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = std::env::var("CORS_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Load Clinic Settings ---
        let offset_str =
            std::env::var("CLINIC_UTC_OFFSET_HOURS").unwrap_or_else(|_| "7".to_string());
        let clinic_offset = parse_offset_hours(&offset_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "CLINIC_UTC_OFFSET_HOURS".to_string(),
                format!("'{}' is not an offset between -23 and 23 hours", offset_str),
            )
        })?;

        Ok(Self {
            bind_address,
            database_url,
            db_max_connections,
            log_level,
            cors_origin,
            clinic_offset,
        })
    }
}

fn parse_offset_hours(value: &str) -> Option<FixedOffset> {
    let hours = value.trim().parse::<i32>().ok()?;
    FixedOffset::east_opt(hours.checked_mul(3600)?)
}
