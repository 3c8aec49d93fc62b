//! Per-request memoization.
//!
//! [`memoize`] wraps a function of the request [`Context`] so it runs at
//! most once per context.  The cached value lives inside the context and is
//! dropped with it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::Context;

static NEXT_MEMO_KEY: AtomicU64 = AtomicU64::new(1);

/// A function of the context, evaluated once per context.
pub struct Memoized<A> {
    key: u64,
    init: Arc<dyn Fn(&Context) -> A + Send + Sync>,
}

/// Creates a [`Memoized`] from `f`.
///
/// ```rust,ignore
/// let session = memoize(|ctx: &Context| load_session(ctx));
/// let a = session.get(&ctx);
/// let b = session.get(&ctx); // cached
/// ```
pub fn memoize<A, F>(f: F) -> Memoized<A>
where
    A: Clone + Send + Sync + 'static,
    F: Fn(&Context) -> A + Send + Sync + 'static,
{
    Memoized {
        key: NEXT_MEMO_KEY.fetch_add(1, Ordering::Relaxed),
        init: Arc::new(f),
    }
}

impl<A> Memoized<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Returns the value for `ctx`, computing it on first access.
    pub fn get(&self, ctx: &Context) -> A {
        ctx.memoized(self.key, || (self.init)(ctx))
    }
}

impl<A> Clone for Memoized<A> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            init: Arc::clone(&self.init),
        }
    }
}

impl<A> std::fmt::Debug for Memoized<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_once_per_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let memo = memoize(move |ctx: &Context| {
            c.fetch_add(1, Ordering::SeqCst);
            ctx.id().get()
        });

        let first = Context::new();
        let second = Context::new();

        assert_eq!(memo.get(&first), first.id().get());
        assert_eq!(memo.get(&first), first.id().get());
        assert_eq!(memo.get(&second), second.id().get());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_distinct_memos_do_not_collide() {
        let a = memoize(|_: &Context| "a".to_string());
        let b = memoize(|_: &Context| "b".to_string());
        let ctx = Context::new();

        assert_eq!(a.get(&ctx), "a");
        assert_eq!(b.get(&ctx), "b");
        assert_eq!(a.clone().get(&ctx), "a");
    }

    #[test]
    fn test_memo_can_read_other_memo() {
        let base = memoize(|_: &Context| 20_u32);
        let b = base.clone();
        let derived = memoize(move |ctx: &Context| b.get(ctx) + 1);

        let ctx = Context::new();
        assert_eq!(derived.get(&ctx), 21);
        assert_eq!(base.get(&ctx), 20);
    }
}
