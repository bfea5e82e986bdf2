//! services/reader/src/config.rs
//!
//! Defines the reader's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use crate::engine::EngineSettings;
use std::path::PathBuf;
use std::str::FromStr;
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
    pub api_url: String,
    pub audio_url: String,
    pub state_path: PathBuf,
    /// Bearer token to sign in with at startup, if any.
    pub token: Option<String>,
    pub log_level: Level,
    pub audio_edition: String,
    pub text_edition: String,
    pub translation: Option<String>,
    pub persist_debounce: Duration,
    pub dwell: Duration,
    pub prefetch_settle: Duration,
    pub auto_advance: bool,
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

        // --- Backend Endpoints ---
        let api_url = std::env::var("READER_API_URL")
            .map_err(|_| ConfigError::MissingVar("READER_API_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let audio_url = std::env::var("READER_AUDIO_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("{api_url}/api/audio"));

        let state_path = std::env::var("READER_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./reader-state.json"));

        let token = std::env::var("READER_TOKEN").ok().filter(|t| !t.trim().is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Editions ---
        let audio_edition =
            std::env::var("READER_EDITION").unwrap_or_else(|_| "ar.alafasy".to_string());
        let text_edition =
            std::env::var("READER_TEXT_EDITION").unwrap_or_else(|_| "quran-uthmani".to_string());
        let translation = match std::env::var("READER_TRANSLATION") {
            Ok(value) if value.trim().is_empty() || value == "none" => None,
            Ok(value) => Some(value),
            Err(_) => Some("en.sahih".to_string()),
        };

        // --- Engine Timings ---
        let persist_debounce = millis_var("READER_PERSIST_DEBOUNCE_MS", 2000)?;
        let dwell = millis_var("READER_DWELL_MS", 2000)?;
        let prefetch_settle = millis_var("READER_PREFETCH_SETTLE_MS", 500)?;
        let auto_advance = parsed_var("READER_AUTO_ADVANCE", true)?;

        Ok(Self {
            api_url,
            audio_url,
            state_path,
            token,
            log_level,
            audio_edition,
            text_edition,
            translation,
            persist_debounce,
            dwell,
            prefetch_settle,
            auto_advance,
        })
    }

    /// The engine tunables derived from this configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            audio_edition: self.audio_edition.clone(),
            text_edition: self.text_edition.clone(),
            translation: self.translation.clone(),
            persist_debounce: self.persist_debounce,
            dwell: self.dwell,
            prefetch_settle: self.prefetch_settle,
            auto_advance: self.auto_advance,
            ..EngineSettings::default()
        }
    }
}

fn parsed_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn millis_var(name: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    parsed_var(name, default_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_url_is_reported() {
        std::env::remove_var("READER_API_URL");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "READER_API_URL"));
    }

    #[test]
    fn millis_parse_errors_name_the_variable() {
        std::env::set_var("READER_TEST_BAD_MS", "soon");
        let err = millis_var("READER_TEST_BAD_MS", 10).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "READER_TEST_BAD_MS"));
        std::env::remove_var("READER_TEST_BAD_MS");
    }

    #[test]
    fn unset_millis_fall_back_to_default() {
        assert_eq!(
            millis_var("READER_TEST_UNSET_MS", 250).unwrap(),
            Duration::from_millis(250)
        );
    }
}
