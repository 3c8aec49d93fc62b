//! # weft
//!
//! Token-keyed dependency resolution and onion-model middleware for async
//! Rust.
//!
//! ## Overview
//!
//! An application is a set of *registrations*: each [`Token`](prelude::Token)
//! names a value, and each value is either a literal or a
//! [`Plugin`](prelude::Plugin) that declares dependencies on other tokens,
//! provides a service, contributes a middleware and may clean up at
//! shutdown.  Resolution instantiates every plugin exactly once, in
//! dependency order, and rejects cycles, missing registrations and literals
//! nothing depends on.
//!
//! ```text
//! register ──▶ resolve ──▶ compose ──▶ handle(ctx) ... ──▶ cleanup
//!   tokens      plugins     onion        middleware          hooks
//! ```
//!
//! - **Core** (`weft-core`): tokens, plugins, the resolver and `compose`
//! - **Runtime** (`weft-runtime`): configuration, logging and lifecycle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use weft::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let name: Token<String> = Token::new("Name");
//!
//!     let mut runtime = WeftRuntime::new();
//!     let app = runtime.app_mut()?;
//!     app.register(&name, Arc::new("world".to_string()));
//!     app.middleware_with(Dependencies::new().with("name", &name), move |deps| {
//!         let name = deps.get(&name).unwrap_or_default();
//!         Middleware::new(move |_ctx, next: Next| {
//!             info!(%name, "hello");
//!             next.run()
//!         })
//!     });
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use weft_core as core;
pub use weft_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use weft::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use weft_runtime::{RuntimeError, RuntimeResult, WeftConfig, WeftRuntime};

    // Registration
    pub use weft_core::{App, Dependencies, Deps, Enhanced, Plugin, Registered, ResolvedApp, Token};

    // Middleware
    pub use weft_core::{BoxError, Context, Middleware, Next, compose, memoize};

    // Logging macros
    pub use weft_runtime::prelude::*;
}
