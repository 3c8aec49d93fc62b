//! Plugin descriptors and the values a token can be registered with.
//!
//! A [`Plugin<T>`] declares named dependencies and, optionally, how to
//! produce a service of type `T` from them, how to derive a request
//! [`Middleware`] from them, and how to release the service on shutdown.
//!
//! ```rust,ignore
//! let greeter = Plugin::<Greeter>::new()
//!     .dep("name", &NAME)
//!     .provides(|deps| Greeter::new(deps.get(&NAME)))
//!     .middleware(|_deps, greeter| {
//!         Middleware::new(move |ctx, next| {
//!             let greeter = greeter.clone();
//!             async move {
//!                 if let Some(g) = &greeter {
//!                     ctx.set_state(g.greet());
//!                 }
//!                 next.run().await
//!             }
//!         })
//!     });
//! ```
//!
//! Internally every plugin is stored type-erased ([`ErasedPlugin`]); services
//! travel as `Arc<dyn Any + Send + Sync>` wrapping the `Arc<T>` and are
//! downcast back at the edges.

use std::any::{Any, type_name};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tower::BoxError;

use crate::error::{ResolveError, ResolveResult};
use crate::middleware::Middleware;
use crate::token::{Token, TokenRef};

/// A type-erased service: an `Arc<T>` boxed as `Any`.
pub(crate) type ServiceArc = Arc<dyn Any + Send + Sync>;

pub(crate) type ProvideFn = Arc<dyn Fn(&Deps) -> Result<Option<ServiceArc>, BoxError> + Send + Sync>;
pub(crate) type MiddlewareFactoryFn =
    Arc<dyn Fn(&Deps, Option<&ServiceArc>) -> Result<Middleware, BoxError> + Send + Sync>;
pub(crate) type CleanupFn =
    Arc<dyn Fn(ServiceArc) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
pub(crate) type EnhancerFn = Arc<dyn Fn(Option<&ServiceArc>) -> ErasedValue + Send + Sync>;

pub(crate) fn erase<T>(service: Arc<T>) -> ServiceArc
where
    T: ?Sized + Send + Sync + 'static,
{
    Arc::new(service)
}

pub(crate) fn downcast<T>(service: &ServiceArc) -> Option<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    (**service).downcast_ref::<Arc<T>>().cloned()
}

// =============================================================================
// Dependencies
// =============================================================================

#[derive(Clone)]
pub(crate) struct Dependency {
    pub(crate) name: Arc<str>,
    pub(crate) token: TokenRef,
}

fn push_dependency(entries: &mut Vec<Dependency>, dependency: Dependency) {
    match entries.iter_mut().find(|d| d.name == dependency.name) {
        Some(existing) => *existing = dependency,
        None => entries.push(dependency),
    }
}

/// An ordered set of named dependency declarations.
///
/// Used where dependencies are declared apart from a [`Plugin`], e.g.
/// [`App::middleware_with`](crate::App::middleware_with).  Declaring the
/// same name twice keeps the position of the first and the token of the
/// last.
#[derive(Clone, Default)]
pub struct Dependencies {
    entries: Vec<Dependency>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dependency on `token` under `name`.
    pub fn with<D: ?Sized>(mut self, name: impl Into<Arc<str>>, token: &Token<D>) -> Self {
        push_dependency(
            &mut self.entries,
            Dependency {
                name: name.into(),
                token: token.erased().clone(),
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|d| (&d.name, &d.token)))
            .finish()
    }
}

// =============================================================================
// Deps: resolved dependencies handed to plugin callbacks
// =============================================================================

struct DepEntry {
    name: Arc<str>,
    token: TokenRef,
    service: Option<ServiceArc>,
}

/// The resolved dependencies of one plugin.
///
/// Services are looked up by the token that was declared, or by the
/// declared name.  An optional dependency that was never registered, or a
/// dependency registered as [`Registered::undefined`], reads as `None`.
#[derive(Default)]
pub struct Deps {
    entries: Vec<DepEntry>,
}

impl Deps {
    pub(crate) fn push(&mut self, name: Arc<str>, token: TokenRef, service: Option<ServiceArc>) {
        self.entries.push(DepEntry {
            name,
            token,
            service,
        });
    }

    /// Returns the service resolved for `token`, if any.
    pub fn get<T>(&self, token: &Token<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .iter()
            .find(|e| e.token.id() == token.id())
            .and_then(|e| e.service.as_ref())
            .and_then(downcast::<T>)
    }

    /// Like [`get`](Self::get), but an undefined service is an error.
    pub fn require<T>(&self, token: &Token<T>) -> ResolveResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get(token).ok_or_else(|| ResolveError::UndefinedDependency {
            token: token.name().to_string(),
        })
    }

    /// Returns the service declared under `name`, if any.
    pub fn named<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .iter()
            .find(|e| &*e.name == name)
            .and_then(|e| e.service.as_ref())
            .and_then(downcast::<T>)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| &*e.name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Deps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|e| (&e.name, e.service.is_some())),
            )
            .finish()
    }
}

// =============================================================================
// Plugin<T>
// =============================================================================

/// A plugin with its service type erased.
#[derive(Clone, Default)]
pub(crate) struct ErasedPlugin {
    pub(crate) deps: Vec<Dependency>,
    pub(crate) provides: Option<ProvideFn>,
    pub(crate) middleware: Option<MiddlewareFactoryFn>,
    pub(crate) cleanup: Option<CleanupFn>,
}

/// Descriptor of a unit of functionality producing a service of type `T`.
///
/// Every callback is optional.  A plugin without `provides` resolves to an
/// undefined service; a plugin without `middleware` contributes nothing to
/// the request chain.
pub struct Plugin<T: ?Sized> {
    inner: ErasedPlugin,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T> Plugin<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: ErasedPlugin::default(),
            _marker: PhantomData,
        }
    }

    /// Declares a dependency on `token`, exposed to callbacks under `name`.
    pub fn dep<D: ?Sized>(mut self, name: impl Into<Arc<str>>, token: &Token<D>) -> Self {
        push_dependency(
            &mut self.inner.deps,
            Dependency {
                name: name.into(),
                token: token.erased().clone(),
            },
        );
        self
    }

    /// Declares every dependency in `deps`.
    pub fn deps(mut self, deps: Dependencies) -> Self {
        for dependency in deps.entries {
            push_dependency(&mut self.inner.deps, dependency);
        }
        self
    }

    /// Sets the service factory.
    pub fn provides<F, S>(self, f: F) -> Self
    where
        F: Fn(&Deps) -> S + Send + Sync + 'static,
        S: Into<Arc<T>>,
    {
        self.try_provides(move |deps| Ok::<_, BoxError>(f(deps)))
    }

    /// Sets a fallible service factory.
    ///
    /// An error aborts resolution with [`ResolveError::Provider`].
    pub fn try_provides<F, S, E>(mut self, f: F) -> Self
    where
        F: Fn(&Deps) -> Result<S, E> + Send + Sync + 'static,
        S: Into<Arc<T>>,
        E: Into<BoxError>,
    {
        self.inner.provides = Some(Arc::new(
            move |deps: &Deps| -> Result<Option<ServiceArc>, BoxError> {
                match f(deps) {
                    Ok(service) => Ok(Some(erase::<T>(service.into()))),
                    Err(e) => Err(e.into()),
                }
            },
        ));
        self
    }

    /// Sets a service factory that may produce no value.
    pub fn provides_optional<F>(mut self, f: F) -> Self
    where
        F: Fn(&Deps) -> Option<Arc<T>> + Send + Sync + 'static,
    {
        self.inner.provides = Some(Arc::new(
            move |deps: &Deps| -> Result<Option<ServiceArc>, BoxError> {
                Ok(f(deps).map(erase::<T>))
            },
        ));
        self
    }

    /// Sets the middleware factory.
    ///
    /// It runs once at resolve time, after `provides`, and receives the
    /// plugin's own service.
    pub fn middleware<F>(self, f: F) -> Self
    where
        F: Fn(&Deps, Option<Arc<T>>) -> Middleware + Send + Sync + 'static,
    {
        self.try_middleware(move |deps, service| Ok::<_, BoxError>(f(deps, service)))
    }

    /// Sets a fallible middleware factory.
    pub fn try_middleware<F, E>(mut self, f: F) -> Self
    where
        F: Fn(&Deps, Option<Arc<T>>) -> Result<Middleware, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.inner.middleware = Some(Arc::new(
            move |deps: &Deps, service: Option<&ServiceArc>| -> Result<Middleware, BoxError> {
                f(deps, service.and_then(downcast::<T>)).map_err(Into::into)
            },
        ));
        self
    }

    /// Sets the shutdown hook, run by
    /// [`ResolvedApp::cleanup`](crate::ResolvedApp::cleanup) with the
    /// resolved service.
    pub fn cleanup<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.inner.cleanup = Some(Arc::new(move |service: ServiceArc| {
            match downcast::<T>(&service) {
                Some(service) => {
                    let fut = f(service);
                    async move { fut.await.map_err(Into::<BoxError>::into) }.boxed()
                }
                None => future::err(BoxError::from(format!(
                    "service is not of type {}",
                    type_name::<T>()
                )))
                .boxed(),
            }
        }));
        self
    }

    pub fn has_provides(&self) -> bool {
        self.inner.provides.is_some()
    }

    pub fn has_middleware(&self) -> bool {
        self.inner.middleware.is_some()
    }

    pub(crate) fn into_erased(self) -> ErasedPlugin {
        self.inner
    }
}

impl<T> Default for Plugin<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for Plugin<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Plugin<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("service", &type_name::<T>())
            .field(
                "deps",
                &self.inner.deps.iter().map(|d| &*d.name).collect::<Vec<_>>(),
            )
            .field("provides", &self.inner.provides.is_some())
            .field("middleware", &self.inner.middleware.is_some())
            .field("cleanup", &self.inner.cleanup.is_some())
            .finish()
    }
}

// =============================================================================
// Registered<T> / Enhanced<T>
// =============================================================================

/// What a token can be registered with.
pub enum Registered<T: ?Sized> {
    /// A literal service.  `None` registers an explicit "no value".
    Value(Option<Arc<T>>),
    /// A plugin producing the service.
    Plugin(Plugin<T>),
}

impl<T> Registered<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub fn value(value: impl Into<Arc<T>>) -> Self {
        Self::Value(Some(value.into()))
    }

    /// A literal registration with no value.
    pub fn undefined() -> Self {
        Self::Value(None)
    }

    pub fn is_plugin(&self) -> bool {
        matches!(self, Self::Plugin(_))
    }

    pub(crate) fn into_erased(self) -> ErasedValue {
        match self {
            Self::Value(value) => ErasedValue::Literal(value.map(erase::<T>)),
            Self::Plugin(plugin) => ErasedValue::Plugin(plugin.into_erased()),
        }
    }
}

impl<T: ?Sized> From<Plugin<T>> for Registered<T> {
    fn from(plugin: Plugin<T>) -> Self {
        Self::Plugin(plugin)
    }
}

impl<T: ?Sized> From<Arc<T>> for Registered<T> {
    fn from(value: Arc<T>) -> Self {
        Self::Value(Some(value))
    }
}

impl<T: ?Sized> From<Option<Arc<T>>> for Registered<T> {
    fn from(value: Option<Arc<T>>) -> Self {
        Self::Value(value)
    }
}

/// What an enhancer returns: a replacement service, or a plugin that
/// produces one from its own dependencies.
pub enum Enhanced<T: ?Sized> {
    /// A replacement service.  `None` leaves the token without a value.
    Value(Option<Arc<T>>),
    Plugin(Plugin<T>),
}

impl<T> Enhanced<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn into_erased(self) -> ErasedValue {
        match self {
            Self::Value(service) => ErasedValue::Literal(service.map(erase::<T>)),
            Self::Plugin(plugin) => ErasedValue::Plugin(plugin.into_erased()),
        }
    }
}

impl<T: ?Sized> From<Arc<T>> for Enhanced<T> {
    fn from(service: Arc<T>) -> Self {
        Self::Value(Some(service))
    }
}

impl<T: ?Sized> From<Option<Arc<T>>> for Enhanced<T> {
    fn from(service: Option<Arc<T>>) -> Self {
        Self::Value(service)
    }
}

impl<T: ?Sized> From<Plugin<T>> for Enhanced<T> {
    fn from(plugin: Plugin<T>) -> Self {
        Self::Plugin(plugin)
    }
}

/// A registered value with its service type erased.
#[derive(Clone)]
pub(crate) enum ErasedValue {
    Literal(Option<ServiceArc>),
    Plugin(ErasedPlugin),
}

impl ErasedValue {
    pub(crate) fn is_plugin(&self) -> bool {
        matches!(self, Self::Plugin(_))
    }
}

pub(crate) fn erase_enhancer<T, F, E>(f: F) -> EnhancerFn
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(Option<Arc<T>>) -> E + Send + Sync + 'static,
    E: Into<Enhanced<T>>,
{
    Arc::new(move |service: Option<&ServiceArc>| {
        Into::<Enhanced<T>>::into(f(service.and_then(downcast::<T>))).into_erased()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shout: Send + Sync {
        fn shout(&self) -> String;
    }

    struct Loud;

    impl Shout for Loud {
        fn shout(&self) -> String {
            "HEY".into()
        }
    }

    #[test]
    fn test_erase_roundtrip_sized_and_unsized() {
        let erased = erase(Arc::new(5_u32));
        assert_eq!(downcast::<u32>(&erased).as_deref(), Some(&5));
        assert!(downcast::<String>(&erased).is_none());

        let shout: Arc<dyn Shout> = Arc::new(Loud);
        let erased = erase(shout);
        assert_eq!(downcast::<dyn Shout>(&erased).unwrap().shout(), "HEY");
    }

    #[test]
    fn test_deps_lookup_by_token_and_name() {
        let port: Token<u16> = Token::new("Port");
        let host: Token<String> = Token::new("Host");

        let mut deps = Deps::default();
        deps.push("port".into(), port.erased().clone(), Some(erase(Arc::new(8080_u16))));
        deps.push("host".into(), host.optional().erased().clone(), None);

        assert_eq!(deps.get(&port).as_deref(), Some(&8080));
        assert_eq!(deps.named::<u16>("port").as_deref(), Some(&8080));
        assert!(deps.get(&host).is_none());
        assert!(matches!(
            deps.require(&host),
            Err(ResolveError::UndefinedDependency { token }) if token == "Host"
        ));
        assert_eq!(deps.names().collect::<Vec<_>>(), vec!["port", "host"]);
    }

    #[test]
    fn test_duplicate_dependency_name_keeps_last_token() {
        let a: Token<u8> = Token::new("A");
        let b: Token<u8> = Token::new("B");

        let plugin = Plugin::<u8>::new().dep("x", &a).dep("y", &a).dep("x", &b);
        let erased = plugin.into_erased();

        assert_eq!(erased.deps.len(), 2);
        assert_eq!(&*erased.deps[0].name, "x");
        assert_eq!(erased.deps[0].token.id(), b.id());
    }

    #[test]
    fn test_provides_erases_service() {
        let plugin = Plugin::<String>::new().provides(|_| "hello".to_string());
        assert!(plugin.has_provides());
        assert!(!plugin.has_middleware());

        let provides = plugin.into_erased().provides.unwrap();
        let service = provides(&Deps::default()).unwrap().unwrap();
        assert_eq!(downcast::<String>(&service).as_deref().map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_try_provides_surfaces_error() {
        let plugin = Plugin::<String>::new().try_provides(|_| Err::<String, _>("no config"));
        let provides = plugin.into_erased().provides.unwrap();
        let err = provides(&Deps::default()).unwrap_err();
        assert_eq!(err.to_string(), "no config");
    }

    #[test]
    fn test_registered_conversions() {
        assert!(matches!(Registered::<u8>::undefined(), Registered::Value(None)));
        assert!(matches!(Registered::<u8>::value(3_u8), Registered::Value(Some(_))));
        assert!(Registered::from(Plugin::<u8>::new()).is_plugin());
        assert!(!Registered::from(Arc::new(1_u8)).is_plugin());
        assert!(matches!(
            Registered::<u8>::from(None).into_erased(),
            ErasedValue::Literal(None)
        ));
    }

    #[test]
    fn test_cleanup_receives_typed_service() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let plugin = Plugin::<usize>::new().cleanup(move |service: Arc<usize>| {
            let s = Arc::clone(&s);
            async move {
                s.store(*service, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        });

        let cleanup = plugin.into_erased().cleanup.unwrap();
        tokio_test::block_on(cleanup(erase(Arc::new(42_usize)))).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 42);

        let err = tokio_test::block_on(cleanup(erase(Arc::new("wrong")))).unwrap_err();
        assert!(err.to_string().contains("usize"));
    }
}
