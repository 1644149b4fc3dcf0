//! Tracing subscriber setup.
//!
//! Console output goes through a `fmt` layer in text or JSON form. When a log
//! directory is configured, a second layer writes plain text to a
//! daily-rotated file through a non-blocking writer.

use std::path::Path;

use thiserror::Error;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use spindle_config::{LogFormat, LoggingConfig};

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },

    #[error("Failed to prepare log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create log file appender: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the filter: `RUST_LOG` wins, then the configured directives.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter).map_err(|e| TelemetryError::Filter {
        filter: config.filter.clone(),
        message: e.to_string(),
    })
}

fn file_appender(directory: &Path, config: &LoggingConfig) -> Result<RollingFileAppender, TelemetryError> {
    std::fs::create_dir_all(directory)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_log_files)
        .build(directory)?;
    Ok(appender)
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process. It is `None` when no log directory is set.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>, TelemetryError> {
    let filter = env_filter(config)?;

    let console = match config.format {
        LogFormat::Text => fmt::layer()
            .with_target(true)
            .with_ansi(config.ansi)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
    };

    let (file, guard) = match config.directory {
        Some(ref directory) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(directory, config)?);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    debug!(
        "Tracing initialized (format: {:?}, log directory: {:?})",
        config.format, config.directory
    );
    Ok(guard)
}
