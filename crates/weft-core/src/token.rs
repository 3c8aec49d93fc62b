//! Typed, identity-bearing registry keys.
//!
//! A [`Token<T>`] names "a value of type `T` obtainable at resolve time".
//! Equality and hashing use only the token's [`TokenId`]; the name exists for
//! diagnostics.  [`Token::optional`] derives a second token that shares the
//! id but is resolved as [`TokenKind::Optional`], so a missing registration
//! yields `None` instead of an error.
//!
//! Tokens are usually created once, before any [`App`](crate::App) exists:
//!
//! ```rust,ignore
//! use std::sync::LazyLock;
//! use weft_core::Token;
//!
//! static GREETING: LazyLock<Token<String>> = LazyLock::new(|| Token::new("Greeting"));
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u64);

impl TokenId {
    fn next() -> Self {
        Self(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// How a missing registration is treated when the token is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Resolution fails with [`ResolveError::MissingRegistration`](crate::ResolveError::MissingRegistration).
    Required,
    /// Resolution yields `None`.
    Optional,
}

// =============================================================================
// TokenRef: type-erased token
// =============================================================================

/// A token with its service type erased.
///
/// This is what the registry and resolver store; typed [`Token`]s convert
/// into it via [`Token::erased`] or `From<&Token<T>>`.
#[derive(Clone)]
pub struct TokenRef {
    id: TokenId,
    kind: TokenKind,
    name: Arc<str>,
}

impl TokenRef {
    pub(crate) fn fresh(name: Arc<str>) -> Self {
        Self {
            id: TokenId::next(),
            kind: TokenKind::Required,
            name,
        }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optional(&self) -> bool {
        self.kind == TokenKind::Optional
    }

    /// Returns `true` if the token has a usable diagnostic name.
    pub(crate) fn is_valid(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

impl PartialEq for TokenRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TokenRef {}

impl Hash for TokenRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRef")
            .field("name", &self.name)
            .field("id", &self.id.0)
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// Token<T>
// =============================================================================

/// A typed registry key for a service of type `T`.
///
/// `T` may be unsized (`dyn Trait`); services are always handed out as
/// `Arc<T>`.
pub struct Token<T: ?Sized> {
    raw: TokenRef,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> Token<T> {
    /// Creates a token with a fresh identity.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            raw: TokenRef::fresh(name.into()),
            _marker: PhantomData,
        }
    }

    /// Returns the optional form of this token.
    ///
    /// Both forms share the same [`TokenId`] and are interchangeable
    /// registry keys.
    pub fn optional(&self) -> Self {
        Self {
            raw: TokenRef {
                kind: TokenKind::Optional,
                ..self.raw.clone()
            },
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> TokenId {
        self.raw.id
    }

    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub fn kind(&self) -> TokenKind {
        self.raw.kind
    }

    pub fn is_optional(&self) -> bool {
        self.raw.is_optional()
    }

    /// Returns the type-erased form of this token.
    pub fn erased(&self) -> &TokenRef {
        &self.raw
    }
}

impl<T: ?Sized> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> PartialEq for Token<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: ?Sized> Eq for Token<T> {}

impl<T: ?Sized> Hash for Token<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("name", &self.raw.name)
            .field("id", &self.raw.id.0)
            .field("kind", &self.raw.kind)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: ?Sized> fmt::Display for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<T: ?Sized> From<&Token<T>> for TokenRef {
    fn from(token: &Token<T>) -> Self {
        token.raw.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_have_distinct_identities() {
        let a: Token<String> = Token::new("A");
        let b: Token<String> = Token::new("A");

        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn test_optional_shares_identity() {
        let token: Token<u32> = Token::new("Port");
        let optional = token.optional();

        assert_eq!(token.id(), optional.id());
        assert_eq!(token, optional);
        assert_eq!(token.kind(), TokenKind::Required);
        assert_eq!(optional.kind(), TokenKind::Optional);
        assert!(optional.is_optional());

        let mut set = HashSet::new();
        set.insert(token.clone());
        assert!(set.contains(&optional));
    }

    #[test]
    fn test_erased_keeps_kind_and_name() {
        let token: Token<dyn Fn(&str) -> String + Send + Sync> = Token::new("Formatter");
        let raw = TokenRef::from(&token.optional());

        assert_eq!(raw.id(), token.id());
        assert!(raw.is_optional());
        assert_eq!(raw.to_string(), "Formatter");
    }

    #[test]
    fn test_blank_name_is_invalid() {
        assert!(!Token::<u8>::new("  ").erased().is_valid());
        assert!(Token::<u8>::new("Byte").erased().is_valid());
    }
}
