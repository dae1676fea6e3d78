//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use diet_assistant_core::ModelConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
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
    /// Server-wide fallback when neither the connection nor the user supplies a key.
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub chat_model: ModelConfig,
    pub realtime_model: ModelConfig,
    /// Applied to the HTTP client only; the relay itself never times out.
    pub model_timeout: Option<Duration>,
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Load Server and Database Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| "sqlite://diet_assistant.db".to_string());

        let db_max_connections = parse_var(&lookup, "DB_MAX_CONNECTIONS")?.unwrap_or(5);

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Load Model Settings ---
        let gemini_api_key = lookup("GEMINI_API_KEY").filter(|key| !key.trim().is_empty());
        let gemini_api_base = lookup("GEMINI_API_BASE")
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());

        let temperature = parse_var(&lookup, "MODEL_TEMPERATURE")?
            .unwrap_or(ModelConfig::DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue(
                "MODEL_TEMPERATURE".to_string(),
                format!("{} is outside 0.0..=2.0", temperature),
            ));
        }
        let chat_model = ModelConfig::new(
            lookup("CHAT_MODEL").unwrap_or_else(|| ModelConfig::CHAT_MODEL.to_string()),
            temperature,
        );
        let realtime_model = ModelConfig::new(
            lookup("REALTIME_MODEL").unwrap_or_else(|| ModelConfig::REALTIME_MODEL.to_string()),
            temperature,
        );

        let model_timeout = parse_var::<u64>(&lookup, "MODEL_TIMEOUT_SECS")?
            .map(Duration::from_secs);

        Ok(Self {
            bind_address,
            database_url,
            db_max_connections,
            log_level,
            cors_origin,
            gemini_api_key,
            gemini_api_base,
            chat_model,
            realtime_model,
            model_timeout,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.database_url, "sqlite://diet_assistant.db");
        assert_eq!(config.chat_model, ModelConfig::chat());
        assert_eq!(config.realtime_model, ModelConfig::realtime());
        assert!(config.gemini_api_key.is_none());
        assert!(config.model_timeout.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("CHAT_MODEL", "gemini-2.5-flash"),
            ("MODEL_TEMPERATURE", "0.7"),
            ("MODEL_TIMEOUT_SECS", "45"),
            ("GEMINI_API_KEY", "abc"),
        ])
        .unwrap();
        assert_eq!(config.chat_model.model, "gemini-2.5-flash");
        assert_eq!(config.chat_model.temperature, 0.7);
        assert_eq!(config.model_timeout, Some(Duration::from_secs(45)));
        assert_eq!(config.gemini_api_key.as_deref(), Some("abc"));
    }

    #[test]
    fn invalid_values_are_reported_with_their_key() {
        match config_from(&[("MODEL_TEMPERATURE", "hot")]) {
            Err(ConfigError::InvalidValue(key, _)) => assert_eq!(key, "MODEL_TEMPERATURE"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
        assert!(config_from(&[("MODEL_TEMPERATURE", "3.5")]).is_err());
        assert!(config_from(&[("BIND_ADDRESS", "nowhere")]).is_err());
    }
}
