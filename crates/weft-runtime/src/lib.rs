//! weft Runtime - configuration, logging and lifecycle for weft applications.
//!
//! This crate provides:
//! - Layered configuration (`ConfigLoader`, `WeftConfig`)
//! - Logging setup driven by that configuration (`LoggingBuilder`)
//! - The application lifecycle (`WeftRuntime`): register, start, serve, stop
//!
//! ```ignore
//! use weft_runtime::WeftRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut runtime = WeftRuntime::new();
//!
//!     runtime.bind_config(&DATABASE_URL)?;
//!     runtime.app_mut()?.register(&POOL, pool_plugin());
//!
//!     // Resolves the app, serves until Ctrl+C, then runs cleanup hooks
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Plugin configuration
//!
//! Each table under `[plugins]` is keyed by a token name.
//! [`WeftRuntime::bind_config`] deserializes the table into the token's
//! type and configures it on the app:
//!
//! ```toml
//! [plugins.Greeting]
//! text = "hello"
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, Profile, WeftConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, RuntimeStats, WeftRuntime};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
