//! # Application Configuration
//!
//! This module manages application configuration loaded from environment
//! variables. All configuration is validated on startup to fail fast if
//! misconfigured.
//!
//! ## Global Config Access
//!
//! Use [`core_config()`] to access the global configuration instance:
//!
//! ```rust,no_run
//! use lib_core::config::core_config;
//!
//! let config = core_config();
//! let uri = &config.mongodb_uri;
//! ```
//!
//! The config must be initialized once at application startup using
//! [`init_config()`].

use std::env;
use std::sync::OnceLock;

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// MongoDB connection URI for the authoritative message store
    pub mongodb_uri: String,

    /// Database holding the `messages` / `activated_chats` collections
    pub mongodb_database: String,

    /// Base URL of the search index service
    pub meilisearch_url: String,

    /// API key for the search index service, if it requires one
    pub meilisearch_api_key: Option<String>,

    /// Name of the search index mirroring the message store
    pub meilisearch_index: String,

    /// Number of message records per backfill batch
    ///
    /// Valid range: 1-10000. Larger batches cut round trips at the cost of
    /// memory per batch.
    pub backfill_batch_size: usize,

    /// Run a full index backfill when the service starts
    pub backfill_on_start: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        let mongodb_uri = env::var("MONGODB_URI")
            .map_err(|_| "MONGODB_URI must be set in environment")?;

        let mongodb_database = env::var("MONGODB_DATABASE")
            .unwrap_or_else(|_| "chatlog".to_string());

        let meilisearch_url = env::var("MEILISEARCH_URL")
            .unwrap_or_else(|_| "http://localhost:7700".to_string());

        let meilisearch_api_key = env::var("MEILISEARCH_API_KEY").ok();

        let meilisearch_index = env::var("MEILISEARCH_INDEX")
            .unwrap_or_else(|_| "messages".to_string());

        let backfill_batch_size = env::var("BACKFILL_BATCH_SIZE")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|e| format!("BACKFILL_BATCH_SIZE must be a valid number: {}", e))?;

        let backfill_on_start = env::var("BACKFILL_ON_START")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            mongodb_uri,
            mongodb_database,
            meilisearch_url,
            meilisearch_api_key,
            meilisearch_index,
            backfill_batch_size,
            backfill_on_start,
        })
    }

    /// Validate configuration values against operational rules.
    pub fn validate(&self) -> Result<(), String> {
        if !self.mongodb_uri.starts_with("mongodb") {
            return Err("MONGODB_URI must be a mongodb:// or mongodb+srv:// URI".to_string());
        }

        if !self.meilisearch_url.starts_with("http") {
            return Err("MEILISEARCH_URL must be an http(s) URL".to_string());
        }

        if self.backfill_batch_size < 1 || self.backfill_batch_size > 10_000 {
            return Err("BACKFILL_BATCH_SIZE must be between 1 and 10000".to_string());
        }

        if self.meilisearch_index.is_empty() {
            return Err("MEILISEARCH_INDEX must not be empty".to_string());
        }

        Ok(())
    }
}

/// Global configuration instance (initialized once at startup).
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Initialize the global configuration.
///
/// This should be called once at application startup, before any component
/// that needs configuration is used.
///
/// # Errors
///
/// Returns an error if:
/// - Environment variables are missing or invalid
/// - Configuration validation fails
/// - Config has already been initialized
pub fn init_config() -> Result<(), String> {
    let config = Config::from_env()?;
    config.validate()?;

    CONFIG.set(config)
        .map_err(|_| "Config has already been initialized".to_string())
}

/// Get a reference to the global configuration.
///
/// # Panics
///
/// Panics if [`init_config()`] has not been called yet. This ensures
/// configuration is always available when accessed.
pub fn core_config() -> &'static Config {
    CONFIG.get().expect("Config must be initialized with init_config() before use")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_database: "chatlog".to_string(),
            meilisearch_url: "http://localhost:7700".to_string(),
            meilisearch_api_key: None,
            meilisearch_index: "messages".to_string(),
            backfill_batch_size: 1000,
            backfill_on_start: false,
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_mongodb_uri() {
        let mut config = base_config();
        config.mongodb_uri = "postgres://localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = base_config();
        config.backfill_batch_size = 0;
        assert!(config.validate().is_err());
    }
}
