//! The application facade.
//!
//! [`App`] collects registrations; [`App::resolve`] consumes it and yields a
//! [`ResolvedApp`] holding the singleton services, the ordered middleware
//! and the composed request chain.  A failed resolve leaves nothing behind,
//! and a resolved app cannot be resolved again.
//!
//! ```rust,ignore
//! let mut app = App::new();
//! app.configure(&GREETING, "hello".to_string());
//! app.register(&GREETER, greeter_plugin());
//! app.middleware(timing());
//!
//! let resolved = app.resolve()?;
//! let ctx = resolved.simulate(Context::new()).await?;
//! resolved.cleanup().await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future;
use parking_lot::Mutex;
use tower::BoxError;
use tracing::{debug, debug_span, error, info, warn};

use crate::compose::{Composed, compose};
use crate::context::Context;
use crate::error::{CleanupError, ResolveResult};
use crate::middleware::Middleware;
use crate::plugin::{Dependencies, Deps, Enhanced, Plugin, Registered, ServiceArc, downcast, erase_enhancer};
use crate::registry::{Aliaser, Registry};
use crate::resolver::{PendingCleanup, Resolver};
use crate::token::{Token, TokenId};

/// Diagnostic name of tokens created for anonymous plugins.
pub const UNNAMED_PLUGIN: &str = "UnnamedPlugin";

/// An application under construction.
#[derive(Default)]
pub struct App {
    registry: Registry,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under `token`, replacing any earlier value.
    ///
    /// Accepts a [`Plugin`], an `Arc<T>`, an `Option<Arc<T>>` or a
    /// [`Registered`].  The returned [`Aliaser`] scopes aliases to this
    /// registration.
    pub fn register<T>(&mut self, token: &Token<T>, value: impl Into<Registered<T>>) -> Aliaser<'_>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry
            .register(token.erased(), value.into().into_erased());
        Aliaser::new(&mut self.registry, token.erased().clone())
    }

    /// Registers a plugin under a fresh anonymous token.
    pub fn register_plugin<T>(&mut self, plugin: Plugin<T>) -> Aliaser<'_>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let token = Token::<T>::new(UNNAMED_PLUGIN);
        self.register(&token, plugin)
    }

    /// Registers a zero-dependency plugin providing `value`.
    ///
    /// Unlike a literal registration, a configured value need not be
    /// depended upon.
    pub fn configure<T>(&mut self, token: &Token<T>, value: impl Into<Arc<T>>) -> Aliaser<'_>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let value: Arc<T> = value.into();
        self.register(token, Plugin::<T>::new().provides(move |_| Arc::clone(&value)))
    }

    /// Appends a middleware that needs no dependencies.
    pub fn middleware(&mut self, middleware: Middleware) {
        self.register_plugin(Plugin::<()>::new().middleware(move |_, _| middleware.clone()));
    }

    /// Appends a middleware built from resolved dependencies.
    pub fn middleware_with<F>(&mut self, deps: Dependencies, f: F)
    where
        F: Fn(&Deps) -> Middleware + Send + Sync + 'static,
    {
        self.register_plugin(Plugin::<()>::new().deps(deps).middleware(move |deps, _| f(deps)));
    }

    /// Wraps the service of `token` with `f` at resolve time.
    ///
    /// Enhancers run in registration order, each receiving the previous
    /// result, which is `None` when the token resolved to no value.
    /// Returning a [`Plugin`] lets the enhancer declare its own
    /// dependencies and middleware.
    pub fn enhance<T, F, E>(&mut self, token: &Token<T>, f: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Option<Arc<T>>) -> E + Send + Sync + 'static,
        E: Into<Enhanced<T>>,
    {
        self.registry.enhance(token.erased(), erase_enhancer(f));
    }

    /// Number of tokens holding a value.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instantiates every plugin once, in dependency order.
    ///
    /// # Errors
    ///
    /// Returns the first [`ResolveError`](crate::ResolveError) encountered.
    /// The app is consumed either way.
    pub fn resolve(self) -> ResolveResult<ResolvedApp> {
        let span = debug_span!("resolve", registrations = self.registry.len());
        let _enter = span.enter();

        match Resolver::new(&self.registry).run() {
            Ok(resolution) => {
                info!(
                    plugins = resolution.plugins,
                    middleware = resolution.middleware.len(),
                    services = resolution.services.len(),
                    "Application resolved"
                );
                let composed = compose(resolution.middleware.iter().cloned());
                Ok(ResolvedApp {
                    services: resolution.services,
                    middleware: resolution.middleware,
                    composed,
                    cleanups: Mutex::new(resolution.cleanups),
                    plugins: resolution.plugins,
                })
            }
            Err(e) => {
                error!(error = %e, "Application failed to resolve");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("registrations", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Counts describing a resolved application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedStats {
    pub plugins: usize,
    pub middleware: usize,
    pub services: usize,
    pub pending_cleanups: usize,
}

/// A fully resolved application.
///
/// Immutable apart from its one-shot cleanup list; share it behind an `Arc`
/// to serve concurrent requests.
pub struct ResolvedApp {
    services: HashMap<TokenId, Option<ServiceArc>>,
    middleware: Vec<Middleware>,
    composed: Composed,
    cleanups: Mutex<Vec<PendingCleanup>>,
    plugins: usize,
}

impl ResolvedApp {
    /// The collected middleware, in dependency order.
    pub fn middleware(&self) -> &[Middleware] {
        &self.middleware
    }

    /// The composed request chain.
    pub fn compose(&self) -> Composed {
        self.composed.clone()
    }

    /// The composed request chain as a single middleware, for mounting in
    /// another chain.
    pub fn handler(&self) -> Middleware {
        self.composed.clone().into_middleware()
    }

    /// Returns the resolved service for `token`.
    ///
    /// `None` if the token was never resolved or resolved to no value.
    pub fn get<T>(&self, token: &Token<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .get(&token.id())
            .and_then(Option::as_ref)
            .and_then(downcast::<T>)
    }

    /// Runs `ctx` through the composed chain and hands it back.
    pub async fn simulate(&self, ctx: Context) -> Result<Arc<Context>, BoxError> {
        let ctx = Arc::new(ctx);
        self.composed.call(Some(Arc::clone(&ctx)), None).await?;
        Ok(ctx)
    }

    /// Runs every plugin's cleanup hook concurrently.
    ///
    /// All hooks run even if some fail; the first failure is returned.
    /// Hooks run once: later calls are no-ops.
    pub async fn cleanup(&self) -> Result<(), CleanupError> {
        let pending = std::mem::take(&mut *self.cleanups.lock());
        if pending.is_empty() {
            debug!("No cleanup hooks to run");
            return Ok(());
        }
        debug!(hooks = pending.len(), "Running cleanup hooks");

        let results = future::join_all(pending.into_iter().map(|cleanup| {
            let fut = (cleanup.hook)(cleanup.service);
            let token = cleanup.token;
            async move { fut.await.map_err(|source| (token, source)) }
        }))
        .await;

        let mut first = None;
        for result in results {
            if let Err((token, source)) = result {
                warn!(token = %token, error = %source, "Cleanup hook failed");
                if first.is_none() {
                    first = Some(CleanupError {
                        token: token.name().to_string(),
                        source,
                    });
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins
    }

    pub fn stats(&self) -> ResolvedStats {
        ResolvedStats {
            plugins: self.plugins,
            middleware: self.middleware.len(),
            services: self.services.values().filter(|s| s.is_some()).count(),
            pending_cleanups: self.cleanups.lock().len(),
        }
    }
}

impl std::fmt::Debug for ResolvedApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedApp")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
