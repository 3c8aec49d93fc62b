//! # weft-core
//!
//! Token-keyed dependency resolution and onion-model middleware composition.
//!
//! This crate provides:
//! - [`Token`]: typed, identity-bearing registry keys
//! - [`Plugin`]: descriptors declaring dependencies, a service factory, a
//!   middleware factory and a cleanup hook
//! - [`App`]: the registration facade, resolved once into a [`ResolvedApp`]
//! - [`compose`]: the async middleware composer, also usable as a
//!   `tower::Service`
//! - [`memoize`]: per-request memoization on top of [`Context`]
//!
//! Resolution is synchronous and happens once at startup; request dispatch
//! is async and shares the resolved singletons across requests.

pub mod app;
pub mod compose;
pub mod context;
pub mod error;
pub mod memoize;
pub mod middleware;
pub mod plugin;
pub mod registry;
pub mod token;

mod resolver;

pub use app::{App, ResolvedApp, ResolvedStats, UNNAMED_PLUGIN};
pub use compose::{Composed, compose};
pub use context::{Context, ContextId};
pub use error::{CleanupError, DispatchError, ResolveError, ResolveResult};
pub use memoize::{Memoized, memoize};
pub use middleware::{Middleware, MiddlewareFuture, Next};
pub use plugin::{Dependencies, Deps, Enhanced, Plugin, Registered};
pub use registry::Aliaser;
pub use token::{Token, TokenId, TokenKind, TokenRef};

/// Boxed application error carried through plugins and middleware.
pub use tower::BoxError;
