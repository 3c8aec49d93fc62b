//! Onion-model composition of middleware.
//!
//! [`compose`] turns an ordered list of [`Middleware`] into one
//! [`Composed`] dispatcher.  Calling it runs middleware 0, whose `next`
//! runs middleware 1, and so on; after the last middleware the caller's
//! terminal `next` runs.  Code after `next.run().await` therefore unwinds
//! in reverse order:
//!
//! ```text
//!   m0 ──▶ m1 ──▶ m2 ──▶ terminal
//!   m0 ◀── m1 ◀── m2 ◀──┘
//! ```
//!
//! Each position accepts one dispatch per call.  Errors returned by any
//! middleware propagate unchanged; panics are caught and surface as
//! [`DispatchError::Panicked`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::FutureExt;
use futures::future;
use parking_lot::Mutex;
use tower::{BoxError, Service};

use crate::context::Context;
use crate::error::DispatchError;
use crate::middleware::{Middleware, MiddlewareFuture, Next};

/// State of one composed call.
pub(crate) struct Dispatch {
    chain: Arc<[Middleware]>,
    ctx: Arc<Context>,
    terminal: Next,
    /// Highest index dispatched so far.
    dispatched: Mutex<Option<usize>>,
}

impl Dispatch {
    pub(crate) fn dispatch(self: &Arc<Self>, index: usize) -> MiddlewareFuture {
        {
            let mut dispatched = self.dispatched.lock();
            if dispatched.is_some_and(|last| index <= last) {
                return future::err(BoxError::from(DispatchError::NextCalledMultipleTimes)).boxed();
            }
            *dispatched = Some(index);
        }

        let invoke = || match self.chain.get(index) {
            Some(middleware) => middleware.invoke(
                Arc::clone(&self.ctx),
                Next::chain(Arc::clone(self), index + 1),
            ),
            None => self.terminal.run(),
        };

        match panic::catch_unwind(AssertUnwindSafe(invoke)) {
            Ok(fut) => AssertUnwindSafe(fut)
                .catch_unwind()
                .map(|outcome| match outcome {
                    Ok(result) => result,
                    Err(payload) => Err(DispatchError::from_panic(payload).into()),
                })
                .boxed(),
            Err(payload) => future::err(BoxError::from(DispatchError::from_panic(payload))).boxed(),
        }
    }
}

/// A composed middleware chain.
///
/// Cheap to clone; every call gets its own dispatch state, so one
/// `Composed` serves any number of concurrent requests.
#[derive(Clone)]
pub struct Composed {
    chain: Arc<[Middleware]>,
}

/// Composes middleware into a single dispatcher.
///
/// `None` entries are skipped, so optional contributions can be passed
/// through without filtering.
pub fn compose<I, M>(items: I) -> Composed
where
    I: IntoIterator<Item = M>,
    M: Into<Option<Middleware>>,
{
    let chain: Vec<Middleware> = items.into_iter().filter_map(Into::into).collect();
    Composed {
        chain: chain.into(),
    }
}

impl Composed {
    /// Runs the chain for one request.
    ///
    /// A missing context is replaced by a fresh [`Context`]; a missing
    /// terminal continuation by [`Next::noop`].
    pub fn call(&self, ctx: Option<Arc<Context>>, next: Option<Next>) -> MiddlewareFuture {
        let dispatch = Arc::new(Dispatch {
            chain: Arc::clone(&self.chain),
            ctx: ctx.unwrap_or_default(),
            terminal: next.unwrap_or_default(),
            dispatched: Mutex::new(None),
        });
        dispatch.dispatch(0)
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Wraps the whole chain as one middleware, for nesting.
    pub fn into_middleware(self) -> Middleware {
        Middleware::new(move |ctx, next| self.call(Some(ctx), Some(next)))
    }
}

impl From<Composed> for Middleware {
    fn from(composed: Composed) -> Self {
        composed.into_middleware()
    }
}

impl std::fmt::Debug for Composed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composed")
            .field("len", &self.chain.len())
            .finish()
    }
}

impl Service<Arc<Context>> for Composed {
    type Response = ();
    type Error = BoxError;
    type Future = MiddlewareFuture;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<Context>) -> Self::Future {
        Composed::call(self, Some(ctx), None)
    }
}
