//! Runtime error types.

use thiserror::Error;
use weft_core::{BoxError, CleanupError, ResolveError};

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The application failed to resolve.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Configuration loading, validation or binding failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A plugin cleanup hook failed during shutdown.
    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    /// A request was dispatched before `start` or after `stop`.
    #[error("Runtime is not running")]
    NotRunning,

    /// The application was already resolved; registrations are closed.
    #[error("Runtime already started; registrations are closed")]
    AlreadyStarted,

    /// A request failed inside the middleware chain.
    #[error("Request dispatch failed: {0}")]
    Dispatch(#[source] BoxError),

    /// Installing the shutdown signal handler failed.
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
