//! # Spindle Config
//!
//! TOML configuration for a Spindle process: the driver settings
//! (`[driver]`) and the logging setup (`[logging]`).

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
