use gemini_realtime::{DEFAULT_API_VERSION, DEFAULT_MODEL};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: SecretString,
    pub speech_api_key: SecretString,
    pub gemini_model: String,
    pub gemini_api_version: String,
    pub restart_pause: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:9083".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                ConfigError::MissingVar("GOOGLE_API_KEY (or GEMINI_API_KEY)".to_string())
            })?;
        let speech_api_key =
            std::env::var("SPEECH_API_KEY").unwrap_or_else(|_| gemini_api_key.clone());

        let gemini_model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let gemini_api_version = std::env::var("GEMINI_API_VERSION")
            .unwrap_or_else(|_| DEFAULT_API_VERSION.to_string());

        let restart_pause_str =
            std::env::var("RESTART_PAUSE_MS").unwrap_or_else(|_| "2000".to_string());
        let restart_pause = restart_pause_str
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| {
                ConfigError::InvalidValue("RESTART_PAUSE_MS".to_string(), e.to_string())
            })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            gemini_api_key: SecretString::from(gemini_api_key),
            speech_api_key: SecretString::from(speech_api_key),
            gemini_model,
            gemini_api_version,
            restart_pause,
            log_level,
        })
    }
}
