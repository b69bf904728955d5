use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

/// Configuration for the logging system
pub struct LogConfig {
    /// Directory where log files will be stored
    pub log_dir: PathBuf,
    /// Prefix for log file names
    pub file_prefix: String,
    /// Maximum number of log files to keep (rotation)
    pub max_files: usize,
    /// Whether to write logs to file
    pub log_to_file: bool,
    /// Log level filter string
    pub log_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: AppConfig::log_dir(),
            file_prefix: "ossdrive".to_string(),
            max_files: 5,
            log_to_file: true,
            log_level: "info".to_string(),
        }
    }
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            log_dir: AppConfig::log_dir(),
            file_prefix: "ossdrive".to_string(),
            max_files: config.log_max_files,
            log_to_file: config.log_to_file,
            log_level: config.log_level.as_str().to_string(),
        }
    }
}

/// Initialize the logging system with stdout and optional file output
///
/// # Log Targets
/// - `uploader::manager` - Upload queue
/// - `uploader::coordinator` - Per-file state machine
/// - `uploader::transfer` - Byte transfer and fallback
/// - `uploader::channel` - Server progress stream
/// - `optimistic` - Speculative list mutations
/// - `events` - Event broadcasting
/// - `config` - Configuration loading
/// - `main` - Application lifecycle
///
/// # Example
/// ```bash
/// RUST_LOG=uploader=debug,optimistic=trace cargo run
/// ```
pub fn init_logging(config: LogConfig) -> Result<LogGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Separate branches due to tracing-subscriber's type system: each
    // subscriber stack gets its own stdout layer
    let worker_guard = if config.log_to_file {
        std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix(&config.file_prefix)
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(&config.log_dir)
            .context("Failed to create file appender")?;

        let (non_blocking_file, worker_guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer()
            .compact()
            .with_writer(non_blocking_file)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stdout_layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;

        Some(worker_guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;

        None
    };

    tracing::info!(
        target: "main",
        log_dir = %config.log_dir.display(),
        max_files = config.max_files,
        log_to_file = config.log_to_file,
        log_level = %config.log_level,
        "Logging system initialized"
    );

    Ok(LogGuard {
        _worker_guard: worker_guard,
    })
}

/// Human-readable stdout layer, generic over the subscriber it stacks on
fn stdout_layer<S>() -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .compact()
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_ansi(true)
}

/// Keeps the non-blocking file writer alive; logs are flushed on drop
pub struct LogGuard {
    _worker_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        tracing::info!(target: "main", "Flushing logs before shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert_eq!(config.file_prefix, "ossdrive");
        assert_eq!(config.max_files, 5);
        assert!(config.log_to_file);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_log_config_from_app_config() {
        let mut app = AppConfig::default();
        app.log_level = LogLevel::Warn;
        app.log_to_file = false;
        app.log_max_files = 2;

        let config = LogConfig::from(&app);
        assert_eq!(config.log_level, "warn");
        assert!(!config.log_to_file);
        assert_eq!(config.max_files, 2);
    }

    #[test]
    fn test_init_logging_installs_global_subscriber_once() {
        let dir = tempfile::tempdir().unwrap();
        let with_file = LogConfig {
            log_dir: dir.path().join("logs"),
            log_level: "debug".to_string(),
            ..LogConfig::default()
        };
        let guard = init_logging(with_file).unwrap();
        assert!(dir.path().join("logs").is_dir());

        // The stdout-only stack builds too, but a subscriber is already installed
        let stdout_only = LogConfig {
            log_dir: dir.path().join("unused"),
            log_to_file: false,
            ..LogConfig::default()
        };
        assert!(init_logging(stdout_only).is_err());
        assert!(!dir.path().join("unused").exists());
        drop(guard);
    }
}
