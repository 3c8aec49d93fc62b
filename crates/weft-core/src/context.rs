//! Per-request context threaded through the middleware chain.
//!
//! One [`Context`] is created per incoming request and shared (via `Arc`)
//! with every middleware in the composed chain.  It carries:
//!
//! - A process-unique [`ContextId`], the identity used by
//!   [`memoize`](crate::memoize::memoize).
//! - A typed **state map**: one value per type, written and read by
//!   middleware on the way down and back up the onion.
//! - The memoization table, dropped together with the context.
//!
//! Singleton services produced at resolve time are shared by all requests;
//! anything request-scoped belongs here.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// The request context handed to every middleware.
///
/// # Example
///
/// ```rust,ignore
/// let mw = Middleware::new(|ctx: Arc<Context>, next: Next| async move {
///     ctx.set_state(RequestPath("/health".into()));
///     next.run().await
/// });
/// ```
pub struct Context {
    id: ContextId,
    state: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    memo: Mutex<HashMap<u64, Arc<dyn Any + Send + Sync>>>,
}

impl Context {
    /// Creates an empty context with a fresh identity.
    pub fn new() -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            state: Mutex::new(HashMap::new()),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Stores a value in the state map.
    ///
    /// Only one value per type can be stored; subsequent calls overwrite.
    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        self.state.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a cloned value from the state map.
    pub fn get_state<T: Clone + 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Returns `true` if a value of type `T` exists in the state map.
    pub fn has_state<T: 'static>(&self) -> bool {
        self.state.lock().contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns a value from the state map.
    pub fn take_state<T: 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Mutates the stored `T` in place, inserting `T::default()` first if absent.
    pub fn update_state<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Default + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let slot = state
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()) as Box<dyn Any + Send + Sync>);
        match slot.downcast_mut::<T>() {
            Some(value) => f(value),
            None => f(&mut T::default()),
        }
    }

    /// Returns the memoized value under `key`, computing it with `init` on
    /// first access.
    ///
    /// The lock is not held while `init` runs, so `init` may itself read
    /// other memoized values of this context.  If two callers race, the
    /// first stored value wins and both observe it.
    pub(crate) fn memoized<A>(&self, key: u64, init: impl FnOnce() -> A) -> A
    where
        A: Clone + Send + Sync + 'static,
    {
        if let Some(value) = self.memo.lock().get(&key).and_then(|v| v.downcast_ref::<A>()) {
            return value.clone();
        }
        let computed = init();
        let mut memo = self.memo.lock();
        if let Some(value) = memo.get(&key).and_then(|v| v.downcast_ref::<A>()) {
            return value.clone();
        }
        memo.insert(key, Arc::new(computed.clone()));
        computed
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id.0)
            .field("state_entries", &self.state.lock().len())
            .finish_non_exhaustive()
    }
}
