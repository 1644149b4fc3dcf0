//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error into a [`ConfigError::InvalidValue`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();
        Self::validate_driver(config, &mut result);
        Self::validate_logging(config, &mut result);
        result
    }

    fn validate_driver(config: &Config, result: &mut ValidationResult) {
        if config.driver.queue_capacity == 0 {
            result.add_error(ValidationError::new(
                "driver.queue_capacity",
                "queue_capacity must be greater than 0",
            ));
        }

        if config.driver.max_block_ms == Some(0) {
            result.add_warning(ValidationWarning::new(
                "driver.max_block_ms",
                "max_block_ms = 0 never blocks, the loop will busy-poll",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let logging = &config.logging;

        if logging.filter.trim().is_empty() {
            result.add_error(ValidationError::new(
                "logging.filter",
                "filter cannot be empty",
            ));
        }

        if let Some(ref directory) = logging.directory {
            if logging.file_prefix.is_empty() {
                result.add_error(ValidationError::new(
                    "logging.file_prefix",
                    "file_prefix cannot be empty when a log directory is set",
                ));
            }
            if logging.max_log_files == 0 {
                result.add_error(ValidationError::new(
                    "logging.max_log_files",
                    "max_log_files must be greater than 0",
                ));
            }
            if !directory.exists() {
                result.add_warning(ValidationWarning::new(
                    "logging.directory",
                    format!("Log directory does not exist and will be created: {:?}", directory),
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
