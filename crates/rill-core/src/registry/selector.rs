//! Selectors and lookup keys.
//!
//! A selector is an immutable predicate over an opaque routing key. Two
//! classes exist and never overlap:
//!
//! - **identity class** — [`Selector::Anonymous`] matches exactly one
//!   [`AnonymousKey`] token. Identity keys cannot collide with pattern
//!   selectors, which is what makes the registry's prime cache sound.
//! - **general class** — [`Selector::Eq`] (hash-equality on a caller key)
//!   and [`Selector::Predicate`] (arbitrary match function, full-scan only).

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Match function of a general predicate selector.
pub type MatchFn<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// AnonymousKey
// ---------------------------------------------------------------------------

static NEXT_ANONYMOUS: AtomicU64 = AtomicU64::new(1);

/// An opaque unique routing token.
///
/// Minted from a process-global counter; two tokens are equal only if they
/// are the same mint. The common currency of correlation/reply routing,
/// where the hot path must never pay a registration-pool scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnonymousKey(u64);

impl AnonymousKey {
    /// Mints a fresh, globally unique token.
    #[allow(clippy::new_without_default)]
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_ANONYMOUS.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the token's numeric identity, used as its cache hash.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AnonymousKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "anon-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// A lookup key presented to the registry.
#[derive(Debug, Clone)]
pub enum Key<K> {
    /// Identity-class key; served from the prime cache only.
    Anonymous(AnonymousKey),
    /// General-class key; served from the general cache or a full scan.
    Value(K),
}

impl<K: Hash> Key<K> {
    /// Returns the hash used for cache-tier bucketing.
    ///
    /// Anonymous keys hash to their mint id; value keys to their fxhash.
    #[must_use]
    pub fn hash_code(&self) -> u64 {
        match self {
            Self::Anonymous(token) => token.id(),
            Self::Value(v) => fxhash::hash64(v),
        }
    }

    /// Returns `true` for identity-class keys.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Anonymous(_))
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// An immutable match predicate over lookup keys.
pub enum Selector<K> {
    /// Matches exactly one anonymous token (identity fast path).
    Anonymous(AnonymousKey),
    /// Matches value keys equal to the given key.
    Eq(K),
    /// Matches value keys satisfying an arbitrary predicate.
    Predicate(MatchFn<K>),
}

impl<K> Selector<K> {
    /// Mints a fresh anonymous selector, returning it together with the
    /// token that selects it.
    #[must_use]
    pub fn anonymous() -> (Self, AnonymousKey) {
        let token = AnonymousKey::new();
        (Self::Anonymous(token), token)
    }

    /// Builds an equality selector on a caller key.
    pub fn eq(key: K) -> Self {
        Self::Eq(key)
    }

    /// Builds a general predicate selector.
    pub fn predicate(matcher: impl Fn(&K) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(matcher))
    }

    /// Returns `true` for identity-class selectors (prime-cacheable).
    #[must_use]
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Anonymous(_))
    }

    /// Evaluates this selector against a lookup key.
    ///
    /// Identity selectors only ever match anonymous keys; general selectors
    /// only ever match value keys.
    #[must_use]
    pub fn matches(&self, key: &Key<K>) -> bool
    where
        K: PartialEq,
    {
        match (self, key) {
            (Self::Anonymous(token), Key::Anonymous(candidate)) => token == candidate,
            (Self::Eq(k), Key::Value(v)) => k == v,
            (Self::Predicate(matcher), Key::Value(v)) => matcher(v),
            _ => false,
        }
    }
}

impl<K: Clone> Clone for Selector<K> {
    fn clone(&self) -> Self {
        match self {
            Self::Anonymous(token) => Self::Anonymous(*token),
            Self::Eq(k) => Self::Eq(k.clone()),
            Self::Predicate(matcher) => Self::Predicate(Arc::clone(matcher)),
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for Selector<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous(token) => f.debug_tuple("Anonymous").field(token).finish(),
            Self::Eq(k) => f.debug_tuple("Eq").field(k).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
