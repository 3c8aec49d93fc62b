//! Error types for weft-core.

use std::any::Any;

use thiserror::Error;
use tower::BoxError;

/// Errors raised while resolving an [`App`](crate::App).
///
/// Every variant is fatal: [`App::resolve`](crate::App::resolve) stops at the
/// first one and the application is never partially initialised.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A required token was depended upon but never registered.
    #[error("Missing registration for token: \"{token}\"{}", required_by_suffix(.required_by))]
    MissingRegistration {
        /// Name of the missing token.
        token: String,
        /// Plugins on the resolution path that led to the missing token,
        /// outermost first.
        required_by: Vec<String>,
    },

    /// A token was reached again while it was still being resolved.
    #[error("Cannot resolve circular dependency: {token}")]
    CircularDependency {
        /// Name of the token that closed the cycle.
        token: String,
    },

    /// A literal value was registered but nothing depends on it.
    #[error("Registered token without depending on it: {token}")]
    ExtraneousRegistration {
        /// Name of the unused token.
        token: String,
    },

    /// A token without a usable name was used for registration.
    #[error("Invalid token: {reason}")]
    InvalidToken {
        /// What was wrong with the token.
        reason: String,
    },

    /// A `provides`, `middleware` factory, or enhancer returned an error.
    #[error("Plugin registered with token \"{token}\" failed: {source}")]
    Provider {
        /// Name of the token whose plugin failed.
        token: String,
        /// The application error.
        #[source]
        source: BoxError,
    },

    /// A dependency was required through [`Deps::require`](crate::Deps::require)
    /// but resolved to no value.
    #[error("Dependency \"{token}\" resolved to no value")]
    UndefinedDependency {
        /// Name of the dependency token.
        token: String,
    },
}

fn required_by_suffix(required_by: &[String]) -> String {
    if required_by.is_empty() {
        return String::new();
    }
    let names: Vec<String> = required_by.iter().map(|n| format!("\"{n}\"")).collect();
    format!(
        ", which is required by plugins registered with tokens: {}",
        names.join(", ")
    )
}

impl ResolveError {
    pub(crate) fn provider(token: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Provider {
            token: token.into(),
            source: source.into(),
        }
    }
}

/// Result type for resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors raised by the middleware composer during a request.
///
/// These surface as the error of the composed future, boxed into a
/// [`BoxError`]; use `downcast_ref::<DispatchError>()` to inspect them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A `next` continuation was run more than once.
    #[error("next() called multiple times")]
    NextCalledMultipleTimes,

    /// A middleware panicked while being invoked or polled.
    #[error("middleware panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }
}

/// A plugin's `cleanup` hook failed.
#[derive(Debug, Error)]
#[error("Cleanup for token \"{token}\" failed: {source}")]
pub struct CleanupError {
    /// Name of the token whose cleanup failed.
    pub token: String,
    /// The application error.
    #[source]
    pub source: BoxError,
}
