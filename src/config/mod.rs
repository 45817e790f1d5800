//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `OUTBOX_BUS` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use outbox_bus::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Bus partition {}", config.bus.environment);
//! ```

mod bus;
mod error;
mod server;

pub use bus::BusConfig;
pub use error::{ConfigError, ValidationError};
pub use server::ServerConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Every section has defaults, so an empty environment yields a valid config.
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Delivery options (partition, leases, retry and cleanup horizons)
    #[serde(default)]
    pub bus: BusConfig,

    /// Server configuration (bind address, logging, read API)
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `OUTBOX_BUS` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `OUTBOX_BUS__BUS__ENVIRONMENT=Demo` -> `bus.environment = "Demo"`
    /// - `OUTBOX_BUS__SERVER__PORT=8080` -> `server.port = 8080`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("OUTBOX_BUS")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load configuration and reject it unless every value validates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` for out-of-range values.
    pub fn load_validated() -> Result<Self, ConfigError> {
        let config = Self::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// Invalid configuration is the only fatal startup condition.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.bus.validate()?;
        self.server.validate()?;
        Ok(())
    }
}
