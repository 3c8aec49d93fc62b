//! One resolve pass over a [`Registry`].
//!
//! Resolution walks the plugin list in registration order and resolves each
//! token depth-first: dependencies are resolved (and their middleware
//! collected) before the plugin that declares them.  Every token is
//! instantiated at most once; later lookups hit the per-pass state map.
//!
//! Per token the resolver:
//!
//! 1. redirects the token through the caller's aliases,
//! 2. returns the cached service if the token is already resolved,
//! 3. fails with [`ResolveError::CircularDependency`] if the token is still
//!    being resolved further up the stack,
//! 4. yields `None` for a missing optional token, or fails with
//!    [`ResolveError::MissingRegistration`] for a missing required one,
//! 5. resolves the registered literal or plugin,
//! 6. applies enhancers in registration order.
//!
//! After the walk every literal registration must have been depended upon.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::error::{ResolveError, ResolveResult};
use crate::middleware::Middleware;
use crate::plugin::{CleanupFn, Deps, ErasedPlugin, ErasedValue, ServiceArc};
use crate::registry::Registry;
use crate::token::{TokenId, TokenRef};

enum State {
    Resolving,
    Resolved(Option<ServiceArc>),
}

/// A cleanup hook bound to the service it releases.
pub(crate) struct PendingCleanup {
    pub(crate) token: TokenRef,
    pub(crate) service: ServiceArc,
    pub(crate) hook: CleanupFn,
}

/// Output of a successful resolve pass.
pub(crate) struct Resolution {
    pub(crate) services: HashMap<TokenId, Option<ServiceArc>>,
    pub(crate) middleware: Vec<Middleware>,
    pub(crate) cleanups: Vec<PendingCleanup>,
    pub(crate) plugins: usize,
}

pub(crate) struct Resolver<'r> {
    registry: &'r Registry,
    states: HashMap<TokenId, State>,
    /// Labels of the plugins whose dependencies are being resolved,
    /// outermost first.
    stack: Vec<String>,
    depended_on: HashSet<TokenId>,
    middleware: Vec<Middleware>,
    cleanups: Vec<PendingCleanup>,
    plugins: usize,
}

impl<'r> Resolver<'r> {
    pub(crate) fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            states: HashMap::new(),
            stack: Vec::new(),
            depended_on: HashSet::new(),
            middleware: Vec::new(),
            cleanups: Vec::new(),
            plugins: 0,
        }
    }

    pub(crate) fn run(mut self) -> ResolveResult<Resolution> {
        if let Some(reason) = self.registry.first_invalid() {
            return Err(ResolveError::InvalidToken {
                reason: reason.to_string(),
            });
        }

        for root in self.registry.plugin_roots() {
            self.resolve_token(&root, false)?;
        }

        if let Some(unused) = self
            .registry
            .records()
            .find(|r| r.is_literal() && !self.depended_on.contains(&r.token.id()))
        {
            return Err(ResolveError::ExtraneousRegistration {
                token: unused.token.name().to_string(),
            });
        }

        let services = self
            .states
            .into_iter()
            .filter_map(|(id, state)| match state {
                State::Resolved(service) => Some((id, service)),
                State::Resolving => None,
            })
            .collect();

        Ok(Resolution {
            services,
            middleware: self.middleware,
            cleanups: self.cleanups,
            plugins: self.plugins,
        })
    }

    /// Resolves a declared dependency through the dependent's aliases.
    fn resolve_dependency(
        &mut self,
        declared: &TokenRef,
        aliases: &HashMap<TokenId, TokenRef>,
    ) -> ResolveResult<Option<ServiceArc>> {
        self.depended_on.insert(declared.id());
        let target = match aliases.get(&declared.id()) {
            Some(destination) => {
                trace!(from = %declared, to = %destination, "Following alias");
                self.depended_on.insert(destination.id());
                destination
            }
            None => declared,
        };
        let optional = declared.is_optional() || target.is_optional();
        self.resolve_token(target, optional)
    }

    fn resolve_token(&mut self, token: &TokenRef, optional: bool) -> ResolveResult<Option<ServiceArc>> {
        match self.states.get(&token.id()) {
            Some(State::Resolved(service)) => return Ok(service.clone()),
            Some(State::Resolving) => {
                return Err(ResolveError::CircularDependency {
                    token: token.name().to_string(),
                });
            }
            None => {}
        }

        let registry = self.registry;
        let Some((record, value)) = registry
            .get(token.id())
            .and_then(|record| record.value.as_ref().map(|value| (record, value)))
        else {
            if optional {
                trace!(token = %token, "Optional token not registered");
                return Ok(None);
            }
            return Err(ResolveError::MissingRegistration {
                token: token.name().to_string(),
                required_by: self.stack.clone(),
            });
        };

        self.states.insert(token.id(), State::Resolving);

        let mut service = match value {
            ErasedValue::Literal(service) => service.clone(),
            ErasedValue::Plugin(plugin) => {
                self.resolve_plugin(record.token.name().to_string(), plugin, &record.aliases, &record.token)?
            }
        };

        for enhancer in &record.enhancers {
            service = match enhancer(service.as_ref()) {
                ErasedValue::Literal(service) => service,
                ErasedValue::Plugin(plugin) => self.resolve_plugin(
                    format!("EnhancerOf<{}>", record.token.name()),
                    &plugin,
                    &record.aliases,
                    &record.token,
                )?,
            };
        }

        debug!(token = %token, defined = service.is_some(), "Token resolved");
        self.states
            .insert(token.id(), State::Resolved(service.clone()));
        Ok(service)
    }

    fn resolve_plugin(
        &mut self,
        label: String,
        plugin: &ErasedPlugin,
        aliases: &HashMap<TokenId, TokenRef>,
        owner: &TokenRef,
    ) -> ResolveResult<Option<ServiceArc>> {
        self.stack.push(label);
        let mut deps = Deps::default();
        for dependency in &plugin.deps {
            let service = self.resolve_dependency(&dependency.token, aliases)?;
            deps.push(dependency.name.clone(), dependency.token.clone(), service);
        }
        let label = self.stack.pop().unwrap_or_default();

        let service = match &plugin.provides {
            Some(provides) => provides(&deps).map_err(|e| ResolveError::provider(&label, e))?,
            None => None,
        };

        if let Some(factory) = &plugin.middleware {
            let middleware =
                factory(&deps, service.as_ref()).map_err(|e| ResolveError::provider(&label, e))?;
            trace!(plugin = %label, position = self.middleware.len(), "Middleware collected");
            self.middleware.push(middleware);
        }

        if let (Some(hook), Some(service)) = (&plugin.cleanup, &service) {
            self.cleanups.push(PendingCleanup {
                token: owner.clone(),
                service: service.clone(),
                hook: hook.clone(),
            });
        }

        self.plugins += 1;
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::plugin::{Plugin, Registered, downcast, erase_enhancer};
    use crate::registry::Aliaser;
    use crate::token::Token;

    fn register<T>(registry: &mut Registry, token: &Token<T>, value: impl Into<Registered<T>>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        registry.register(token.erased(), value.into().into_erased());
    }

    fn service<T>(resolution: &Resolution, token: &Token<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        resolution
            .services
            .get(&token.id())
            .and_then(|s| s.as_ref())
            .and_then(downcast::<T>)
    }

    #[test]
    fn test_singleton_under_fan_in() {
        let shared: Token<usize> = Token::new("Shared");
        let left: Token<usize> = Token::new("Left");
        let right: Token<usize> = Token::new("Right");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut registry = Registry::default();
        let c = Arc::clone(&calls);
        register(
            &mut registry,
            &shared,
            Plugin::<usize>::new().provides(move |_| c.fetch_add(1, Ordering::SeqCst) + 10),
        );
        for token in [&left, &right] {
            let s = shared.clone();
            register(
                &mut registry,
                token,
                Plugin::<usize>::new()
                    .dep("shared", &shared)
                    .provides(move |deps| *deps.get(&s).unwrap() + 1),
            );
        }

        let resolution = Resolver::new(&registry).run().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(service(&resolution, &left).as_deref(), Some(&11));
        assert_eq!(service(&resolution, &right).as_deref(), Some(&11));
        assert_eq!(resolution.plugins, 3);
    }

    #[test]
    fn test_cycle_detected_before_provides() {
        let a: Token<u8> = Token::new("A");
        let b: Token<u8> = Token::new("B");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut registry = Registry::default();
        let (ca, cb) = (Arc::clone(&calls), Arc::clone(&calls));
        register(
            &mut registry,
            &a,
            Plugin::<u8>::new().dep("b", &b).provides(move |_| {
                ca.fetch_add(1, Ordering::SeqCst);
                1_u8
            }),
        );
        register(
            &mut registry,
            &b,
            Plugin::<u8>::new().dep("a", &a).provides(move |_| {
                cb.fetch_add(1, Ordering::SeqCst);
                2_u8
            }),
        );

        let err = Resolver::new(&registry).run().err().unwrap();
        assert_eq!(err.to_string(), "Cannot resolve circular dependency: A");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_self_dependency_is_circular() {
        let a: Token<u8> = Token::new("Selfish");
        let mut registry = Registry::default();
        register(&mut registry, &a, Plugin::<u8>::new().dep("me", &a).provides(|_| 1_u8));

        let err = Resolver::new(&registry).run().err().unwrap();
        assert!(matches!(err, ResolveError::CircularDependency { token } if token == "Selfish"));
    }

    #[test]
    fn test_missing_registration_lists_requiring_plugins() {
        let outer: Token<u8> = Token::new("Outer");
        let inner: Token<u8> = Token::new("Inner");
        let missing: Token<u8> = Token::new("Missing");

        let mut registry = Registry::default();
        register(&mut registry, &outer, Plugin::<u8>::new().dep("inner", &inner));
        register(&mut registry, &inner, Plugin::<u8>::new().dep("missing", &missing));

        let err = Resolver::new(&registry).run().err().unwrap();
        assert_eq!(
            err.to_string(),
            "Missing registration for token: \"Missing\", which is required by plugins \
             registered with tokens: \"Outer\", \"Inner\""
        );
    }

    #[test]
    fn test_optional_missing_is_none_required_missing_fails() {
        let maybe: Token<String> = Token::new("Maybe");
        let seen = Arc::new(AtomicUsize::new(0));

        let mut registry = Registry::default();
        let s = Arc::clone(&seen);
        let optional = maybe.optional();
        register(
            &mut registry,
            &Token::<u8>::new("Consumer"),
            Plugin::<u8>::new().dep("maybe", &optional).provides(move |deps| {
                if deps.get(&optional).is_none() {
                    s.fetch_add(1, Ordering::SeqCst);
                }
                0_u8
            }),
        );
        Resolver::new(&registry).run().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        let mut registry = Registry::default();
        register(&mut registry, &Token::<u8>::new("Consumer"), Plugin::<u8>::new().dep("maybe", &maybe));
        let err = Resolver::new(&registry).run().err().unwrap();
        assert!(matches!(err, ResolveError::MissingRegistration { token, .. } if token == "Maybe"));
    }

    #[test]
    fn test_extraneous_literal_rejected() {
        let unused: Token<u8> = Token::new("Unused");
        let mut registry = Registry::default();
        register(&mut registry, &unused, Arc::new(1_u8));

        let err = Resolver::new(&registry).run().err().unwrap();
        assert_eq!(err.to_string(), "Registered token without depending on it: Unused");
    }

    #[test]
    fn test_aliases_apply_only_to_owner() {
        let logger: Token<String> = Token::new("Logger");
        let quiet: Token<String> = Token::new("QuietLogger");
        let aliased: Token<String> = Token::new("Aliased");
        let plain: Token<String> = Token::new("Plain");

        let mut registry = Registry::default();
        register(&mut registry, &logger, Arc::new("loud".to_string()));
        register(&mut registry, &quiet, Arc::new("quiet".to_string()));

        let l = logger.clone();
        register(
            &mut registry,
            &aliased,
            Plugin::<String>::new()
                .dep("logger", &logger)
                .provides(move |deps| deps.get(&l).unwrap().to_string()),
        );
        Aliaser::new(&mut registry, aliased.erased().clone()).alias(&logger, &quiet);

        let l = logger.clone();
        register(
            &mut registry,
            &plain,
            Plugin::<String>::new()
                .dep("logger", &logger)
                .provides(move |deps| deps.get(&l).unwrap().to_string()),
        );

        let resolution = Resolver::new(&registry).run().unwrap();
        assert_eq!(service(&resolution, &aliased).as_deref().map(String::as_str), Some("quiet"));
        assert_eq!(service(&resolution, &plain).as_deref().map(String::as_str), Some("loud"));
    }

    #[test]
    fn test_alias_destination_counts_as_depended_on() {
        let source: Token<u8> = Token::new("Source");
        let destination: Token<u8> = Token::new("Destination");
        let owner: Token<u8> = Token::new("Owner");

        let mut registry = Registry::default();
        register(&mut registry, &destination, Arc::new(7_u8));
        let s = source.clone();
        register(
            &mut registry,
            &owner,
            Plugin::<u8>::new().dep("n", &source).provides(move |deps| *deps.get(&s).unwrap()),
        );
        Aliaser::new(&mut registry, owner.erased().clone()).alias(&source, &destination);

        let resolution = Resolver::new(&registry).run().unwrap();
        assert_eq!(service(&resolution, &owner).as_deref(), Some(&7));
    }

    #[test]
    fn test_enhancers_compose_in_order() {
        let word: Token<String> = Token::new("Word");
        let reader: Token<String> = Token::new("Reader");

        let mut registry = Registry::default();
        register(&mut registry, &word, Arc::new("s".to_string()));
        registry.enhance(word.erased(), erase_enhancer(|s: Option<Arc<String>>| {
            Arc::new(format!("e1({})", s.as_deref().map_or("", String::as_str)))
        }));
        registry.enhance(word.erased(), erase_enhancer(|s: Option<Arc<String>>| {
            Arc::new(format!("e2({})", s.as_deref().map_or("", String::as_str)))
        }));
        let w = word.clone();
        register(
            &mut registry,
            &reader,
            Plugin::<String>::new().dep("word", &word).provides(move |deps| deps.get(&w).unwrap().to_string()),
        );

        let resolution = Resolver::new(&registry).run().unwrap();
        assert_eq!(
            service(&resolution, &reader).as_deref().map(String::as_str),
            Some("e2(e1(s))")
        );
    }

    #[test]
    fn test_service_without_value_can_be_enhanced() {
        let nothing: Token<u8> = Token::new("NoProvides");
        let seen = Arc::new(AtomicUsize::new(0));

        let mut registry = Registry::default();
        register(&mut registry, &nothing, Plugin::<u8>::new());
        let s = Arc::clone(&seen);
        registry.enhance(
            nothing.erased(),
            erase_enhancer(move |n: Option<Arc<u8>>| {
                if n.is_none() {
                    s.fetch_add(1, Ordering::SeqCst);
                }
                Arc::new(5_u8)
            }),
        );

        let resolution = Resolver::new(&registry).run().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(service(&resolution, &nothing).as_deref(), Some(&5));
    }

    #[test]
    fn test_enhancer_can_clear_a_service() {
        let word: Token<String> = Token::new("Word");
        let mut registry = Registry::default();
        register(&mut registry, &word, Plugin::<String>::new().provides(|_| "w".to_string()));
        registry.enhance(word.erased(), erase_enhancer(|_: Option<Arc<String>>| None::<Arc<String>>));

        let resolution = Resolver::new(&registry).run().unwrap();
        assert!(service(&resolution, &word).is_none());
    }

    #[test]
    fn test_enhancer_plugin_missing_dependency_is_labelled() {
        let target: Token<u8> = Token::new("Target");
        let helper: Token<u8> = Token::new("Helper");

        let mut registry = Registry::default();
        register(&mut registry, &target, Plugin::<u8>::new().provides(|_| 1_u8));
        let h = helper.clone();
        registry.enhance(
            target.erased(),
            erase_enhancer(move |_: Option<Arc<u8>>| Plugin::<u8>::new().dep("helper", &h)),
        );

        let err = Resolver::new(&registry).run().err().unwrap();
        assert_eq!(
            err.to_string(),
            "Missing registration for token: \"Helper\", which is required by plugins \
             registered with tokens: \"EnhancerOf<Target>\""
        );
    }

    #[test]
    fn test_middleware_follows_dependency_order() {
        let first: Token<u8> = Token::new("First");
        let second: Token<u8> = Token::new("Second");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut registry = Registry::default();
        let o = Arc::clone(&order);
        register(
            &mut registry,
            &second,
            Plugin::<u8>::new().dep("first", &first).middleware(move |_, _| {
                o.lock().push("second");
                Middleware::passthrough()
            }),
        );
        let o = Arc::clone(&order);
        register(
            &mut registry,
            &first,
            Plugin::<u8>::new().middleware(move |_, _| {
                o.lock().push("first");
                Middleware::passthrough()
            }),
        );

        let resolution = Resolver::new(&registry).run().unwrap();
        assert_eq!(resolution.middleware.len(), 2);
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_provider_error_is_wrapped() {
        let broken: Token<u8> = Token::new("Broken");
        let mut registry = Registry::default();
        register(
            &mut registry,
            &broken,
            Plugin::<u8>::new().try_provides(|_| Err::<u8, _>("disk on fire")),
        );

        let err = Resolver::new(&registry).run().err().unwrap();
        assert!(matches!(&err, ResolveError::Provider { token, .. } if token == "Broken"));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_invalid_token_fails_before_instantiation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::default();
        let c = Arc::clone(&calls);
        register(
            &mut registry,
            &Token::<u8>::new("Fine"),
            Plugin::<u8>::new().provides(move |_| c.fetch_add(1, Ordering::SeqCst) as u8),
        );
        register(&mut registry, &Token::<u8>::new(" "), Arc::new(1_u8));

        let err = Resolver::new(&registry).run().err().unwrap();
        assert!(matches!(err, ResolveError::InvalidToken { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
