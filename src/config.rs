//! Global configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::{AppError, Result};

/// Backend API connectivity settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ApiConfig {
    /// Base URL that generation endpoints are resolved against.
    pub base_url: String,
    /// TCP/TLS connect timeout. The stream itself has no overall deadline.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

/// Stream consumption settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Silence bound after which a live session fails with a timeout.
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_seconds: u64,
    /// Largest accepted SSE line or accumulated frame payload.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Capacity of the controller's inbound message queue.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            silence_timeout_seconds: default_silence_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl StreamConfig {
    /// Silence bound as a [`Duration`].
    #[must_use]
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_seconds)
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_silence_timeout() -> u64 {
    300
}

fn default_max_frame_bytes() -> usize {
    1_048_576
}

fn default_inbox_capacity() -> usize {
    64
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Backend API settings.
    pub api: ApiConfig,
    /// Stream consumption settings.
    #[serde(default)]
    pub stream: StreamConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed API base URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `base_url` is not an absolute URL.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api.base_url)
            .map_err(|err| AppError::Config(format!("base_url invalid: {err}")))
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.api.connect_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        let url = self.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "base_url must use http or https, got {}",
                url.scheme()
            )));
        }

        if self.api.connect_timeout_seconds == 0 {
            return Err(AppError::Config(
                "connect_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.stream.silence_timeout_seconds == 0 {
            return Err(AppError::Config(
                "silence_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.stream.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "max_frame_bytes must be greater than zero".into(),
            ));
        }

        if self.stream.inbox_capacity == 0 {
            return Err(AppError::Config(
                "inbox_capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
