//! Configuration module for the weft runtime.
//!
//! Layered configuration (defaults, files, environment, programmatic
//! overrides) loaded with figment, plus validation.  Plugin settings live
//! under `plugins.<token name>` and are bound to tokens by
//! [`WeftRuntime::bind_config`](crate::WeftRuntime::bind_config).

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig, WeftConfig,
};
pub use validation::validate_config;
