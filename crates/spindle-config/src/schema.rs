//! Configuration schema definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use spindle_runloop::{DriverConfig, EscapePolicy};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Console log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Colored console output (text format only).
    #[serde(default = "default_true")]
    pub ansi: bool,

    /// Directory for daily-rotated log files. No file output when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Rotated files kept on disk.
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
            ansi: default_true(),
            directory: None,
            file_prefix: default_file_prefix(),
            max_log_files: default_max_log_files(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_file_prefix() -> String {
    "spindle".to_string()
}

fn default_max_log_files() -> usize {
    30
}
