use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log verbosity accepted in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Tuning knobs of the upload pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// How long the transfer waits for the progress channel to open
    pub channel_ready_timeout_ms: u64,
    /// Minimum spacing between two frontend progress publications
    pub publish_interval_ms: u64,
    /// Number of rates averaged for client-measured speed
    pub frontend_window: usize,
    /// Number of rates averaged for server-reported speed
    pub backend_window: usize,
    /// Displayed ceiling while progress comes from the client side
    pub frontend_cap: f64,
    /// Displayed ceiling while progress comes from the server
    pub backend_cap: f64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            channel_ready_timeout_ms: 5_000,
            publish_interval_ms: 500,
            frontend_window: 3,
            backend_window: 5,
            frontend_cap: 90.0,
            backend_cap: 99.0,
        }
    }
}

impl UploaderConfig {
    pub fn channel_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_ready_timeout_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

/// Application configuration, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_max_files: usize,
    pub uploader: UploaderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api/v1".to_string(),
            log_level: LogLevel::Info,
            log_to_file: true,
            log_max_files: 5,
            uploader: UploaderConfig::default(),
        }
    }
}

impl AppConfig {
    /// `~/.ossdrive`
    pub fn config_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Failed to get user home directory")?;
        Ok(home_dir.join(".ossdrive"))
    }

    pub fn log_dir() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|_| PathBuf::from(".ossdrive"))
            .join("logs")
    }

    /// Load from the default location
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::config_dir()?.join("config.json"))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(target: "config", path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: AppConfig =
            serde_json::from_str(&content).context("Failed to parse config file")?;

        tracing::debug!(target: "config", path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        tracing::info!(target: "config", path = %path.display(), "Persisted config");
        Ok(())
    }
}
