//! Middleware functions and their `next` continuations.
//!
//! A [`Middleware`] is an async function of `(Arc<Context>, Next)`.  Calling
//! [`Next::run`] hands control to the rest of the chain; whatever the
//! middleware does after awaiting it runs on the way back up.
//!
//! ```rust,ignore
//! let timing = Middleware::new(|ctx: Arc<Context>, next: Next| async move {
//!     let start = Instant::now();
//!     let result = next.run().await;
//!     ctx.set_state(Elapsed(start.elapsed()));
//!     result
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tower::BoxError;

use crate::compose::Dispatch;
use crate::context::Context;

/// Future returned by every middleware and continuation.
pub type MiddlewareFuture = BoxFuture<'static, Result<(), BoxError>>;

type MiddlewareFn = dyn Fn(Arc<Context>, Next) -> MiddlewareFuture + Send + Sync;
type TerminalFn = dyn Fn() -> MiddlewareFuture + Send + Sync;

// =============================================================================
// Middleware
// =============================================================================

/// A type-erased, cheaply clonable middleware function.
#[derive(Clone)]
pub struct Middleware {
    inner: Arc<MiddlewareFn>,
}

impl Middleware {
    /// Wraps an async function as a middleware.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Context>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx: Arc<Context>, next: Next| f(ctx, next).boxed()),
        }
    }

    /// A middleware that only forwards to `next`.
    pub fn passthrough() -> Self {
        Self::new(|_ctx, next: Next| next.run())
    }

    pub(crate) fn invoke(&self, ctx: Arc<Context>, next: Next) -> MiddlewareFuture {
        (self.inner)(ctx, next)
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware").finish_non_exhaustive()
    }
}

// =============================================================================
// Next
// =============================================================================

#[derive(Clone)]
enum NextKind {
    Noop,
    Terminal(Arc<TerminalFn>),
    Chain { dispatch: Arc<Dispatch>, index: usize },
}

/// The continuation handed to a middleware.
///
/// `Next` is `Clone` so it can be moved into spawned work, but the chain
/// accepts only one run per position: running the same continuation twice
/// fails with [`DispatchError::NextCalledMultipleTimes`](crate::DispatchError::NextCalledMultipleTimes).
#[derive(Clone)]
pub struct Next {
    kind: NextKind,
}

impl Next {
    /// A continuation that completes immediately.
    pub fn noop() -> Self {
        Self {
            kind: NextKind::Noop,
        }
    }

    /// Wraps an async function as a terminal continuation.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            kind: NextKind::Terminal(Arc::new(move || f().boxed())),
        }
    }

    pub(crate) fn chain(dispatch: Arc<Dispatch>, index: usize) -> Self {
        Self {
            kind: NextKind::Chain { dispatch, index },
        }
    }

    /// Runs the rest of the chain.
    ///
    /// The downstream middleware is invoked synchronously; the returned
    /// future drives it to completion.
    pub fn run(&self) -> MiddlewareFuture {
        match &self.kind {
            NextKind::Noop => future::ok(()).boxed(),
            NextKind::Terminal(f) => f(),
            NextKind::Chain { dispatch, index } => dispatch.dispatch(*index),
        }
    }
}

impl Default for Next {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            NextKind::Noop => f.write_str("Next::Noop"),
            NextKind::Terminal(_) => f.write_str("Next::Terminal"),
            NextKind::Chain { index, .. } => f.debug_struct("Next").field("index", index).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_noop_next_completes() {
        assert!(Next::noop().run().await.is_ok());
        assert!(Next::default().run().await.is_ok());
    }

    #[tokio::test]
    async fn test_terminal_next_runs_function() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let next = Next::from_fn(move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        next.run().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_passthrough_forwards() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let terminal = Next::from_fn(move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        Middleware::passthrough()
            .invoke(Arc::new(Context::new()), terminal)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
