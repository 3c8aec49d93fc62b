//! Token registrations.
//!
//! The [`Registry`] owns one [`Record`] per token id, holding the registered
//! value (literal or plugin), the aliases that apply while resolving that
//! value's own dependencies, and the enhancers wrapping its service.  It also
//! keeps the **plugin list**: the de-duplicated registration order of every
//! token ever registered with a plugin.
//!
//! The registry never resolves anything; [`Resolver`](crate::resolver) walks
//! it once the [`App`](crate::App) is consumed.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use crate::plugin::{EnhancerFn, ErasedValue};
use crate::token::{Token, TokenId, TokenRef};

/// Everything registered against one token.
pub(crate) struct Record {
    pub(crate) token: TokenRef,
    pub(crate) value: Option<ErasedValue>,
    /// Source token id → destination token.
    pub(crate) aliases: HashMap<TokenId, TokenRef>,
    pub(crate) enhancers: Vec<EnhancerFn>,
}

impl Record {
    fn new(token: TokenRef) -> Self {
        Self {
            token,
            value: None,
            aliases: HashMap::new(),
            enhancers: Vec::new(),
        }
    }

    pub(crate) fn is_literal(&self) -> bool {
        matches!(self.value, Some(ErasedValue::Literal(_)))
    }

    pub(crate) fn is_plugin(&self) -> bool {
        self.value.as_ref().is_some_and(ErasedValue::is_plugin)
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    records: HashMap<TokenId, Record>,
    /// Record ids in first-touch order.
    order: Vec<TokenId>,
    plugins: Vec<TokenId>,
    invalid: Vec<String>,
}

impl Registry {
    fn check(&mut self, token: &TokenRef, action: &str) -> bool {
        if token.is_valid() {
            return true;
        }
        let reason = format!("cannot {action} a token with a blank name (id {})", token.id().get());
        error!(token_id = token.id().get(), "{reason}");
        self.invalid.push(reason);
        false
    }

    fn record_mut(&mut self, token: &TokenRef) -> &mut Record {
        let id = token.id();
        if !self.records.contains_key(&id) {
            self.order.push(id);
        }
        self.records
            .entry(id)
            .or_insert_with(|| Record::new(token.clone()))
    }

    /// Stores `value` under `token`, replacing any earlier value.
    ///
    /// Aliases and enhancers attached to the token survive.
    pub(crate) fn register(&mut self, token: &TokenRef, value: ErasedValue) {
        if !self.check(token, "register") {
            return;
        }
        let is_plugin = value.is_plugin();
        let record = self.record_mut(token);
        if record.value.is_some() {
            warn!(token = %token, "Token registered again; replacing previous value");
        }
        record.value = Some(value);

        if is_plugin && !self.plugins.contains(&token.id()) {
            self.plugins.push(token.id());
        }
        debug!(token = %token, plugin = is_plugin, "Token registered");
    }

    /// Redirects `source` to `destination` while resolving `owner`'s
    /// dependencies.
    pub(crate) fn alias(&mut self, owner: &TokenRef, source: &TokenRef, destination: &TokenRef) {
        if !(self.check(source, "alias") && self.check(destination, "alias")) {
            return;
        }
        debug!(owner = %owner, from = %source, to = %destination, "Alias registered");
        self.record_mut(owner)
            .aliases
            .insert(source.id(), destination.clone());
    }

    pub(crate) fn enhance(&mut self, token: &TokenRef, enhancer: EnhancerFn) {
        if !self.check(token, "enhance") {
            return;
        }
        let record = self.record_mut(token);
        record.enhancers.push(enhancer);
        debug!(token = %token, enhancers = record.enhancers.len(), "Enhancer registered");
    }

    pub(crate) fn get(&self, id: TokenId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Records in first-touch order.
    pub(crate) fn records(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Tokens of the plugin list whose current value is still a plugin.
    pub(crate) fn plugin_roots(&self) -> Vec<TokenRef> {
        self.plugins
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|record| record.is_plugin())
            .map(|record| record.token.clone())
            .collect()
    }

    pub(crate) fn first_invalid(&self) -> Option<&str> {
        self.invalid.first().map(String::as_str)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.values().filter(|r| r.value.is_some()).count()
    }
}

/// Attaches aliases to one registration.
///
/// Returned by [`App::register`](crate::App::register); aliases apply only
/// while resolving that registration's own dependencies.
///
/// ```rust,ignore
/// app.register(&HANDLER, handler_plugin)
///     .alias(&LOGGER, &QUIET_LOGGER);
/// ```
pub struct Aliaser<'a> {
    registry: &'a mut Registry,
    owner: TokenRef,
}

impl<'a> Aliaser<'a> {
    pub(crate) fn new(registry: &'a mut Registry, owner: TokenRef) -> Self {
        Self { registry, owner }
    }

    /// Makes the owner receive `destination`'s service wherever it declared
    /// a dependency on `source`.
    pub fn alias<D: ?Sized>(self, source: &Token<D>, destination: &Token<D>) -> Self {
        self.registry
            .alias(&self.owner, source.erased(), destination.erased());
        self
    }
}

impl std::fmt::Debug for Aliaser<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aliaser").field("owner", &self.owner).finish()
    }
}
