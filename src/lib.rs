//! # Spindle
//!
//! Single-threaded cooperative task scheduler. This crate bundles the
//! scheduling kernel ([`spindle_runloop`]), configuration loading
//! ([`spindle_config`]) and tracing setup ([`telemetry`]).
//!
//! ```rust,no_run
//! use spindle::{ConfigLoader, Driver};
//!
//! let config = ConfigLoader::from_env().unwrap();
//! let _guard = spindle::telemetry::init_tracing(&config.logging).unwrap();
//!
//! let driver = Driver::with_config(config.driver);
//! driver.defer(|_, _| {
//!     tracing::info!("first tick");
//!     Ok(())
//! });
//! driver.run().unwrap();
//! ```

pub mod telemetry;

pub use spindle_config::{
    Config, ConfigError, ConfigLoader, ConfigValidator, LogFormat, LoggingConfig,
};
pub use spindle_runloop::*;
