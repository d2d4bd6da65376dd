//! The tiered caching registry.
//!
//! Three lookup tiers, always consulted in this order:
//!
//! 1. **Prime cache** — identity (anonymous-key) registrations, keyed by the
//!    token id. Updated incrementally on register/unregister and never
//!    invalidated by other registrations, because identity keys cannot
//!    collide with pattern selectors.
//! 2. **General cache** — arbitrary keys, keyed by key hash. Filled after a
//!    select miss; cleared wholesale whenever a non-identity registration
//!    lands (its contents can no longer be trusted to be complete).
//! 3. **The registration chain** — the pool where registrations always
//!    live; scanned completely on a general-cache miss. That scan is the
//!    dominant cost and is why the tiers exist: hot identity keys never pay
//!    it.
//!
//! # Thread Safety
//!
//! Three independent locks: the chain's mutation lock, the general-cache
//! lock, and the prime-cache lock. No call path holds two of them at once
//! except `register`, which appends under the mutation lock *before*
//! touching a cache tier, never while. The chain itself is read without any
//! lock; a reader may miss appends that race its snapshot, which is benign
//! because new registrations are purely additive.

use std::hash::Hash;
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::registry::chain::{ChainIter, Registration, RegistrationChain};
use crate::registry::selector::{Key, Selector};

/// Result set of a `select`: matching registrations in append order.
pub type Matches<K, H> = SmallVec<[Arc<Registration<K, H>>; 4]>;

type CachedSet<K, H> = Arc<[Arc<Registration<K, H>>]>;

// ---------------------------------------------------------------------------
// CachingRegistry
// ---------------------------------------------------------------------------

/// Selector registry with a prime cache, a general cache, and a full pool.
///
/// Both caches bucket by a 64-bit key hash; two value keys with equal
/// hashes share a general-cache bucket, matching the source-of-truth scan
/// only per hash. Callers needing exact-key isolation use anonymous keys.
pub struct CachingRegistry<K, H> {
    chain: RegistrationChain<K, H>,
    prime: Mutex<FxHashMap<u64, Vec<Arc<Registration<K, H>>>>>,
    cache: Mutex<FxHashMap<u64, CachedSet<K, H>>>,
}

impl<K, H> CachingRegistry<K, H>
where
    K: PartialEq + Hash,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chain: RegistrationChain::new(),
            prime: Mutex::new(FxHashMap::default()),
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Registers a handler under a selector.
    ///
    /// Identity selectors are inserted into the prime cache incrementally;
    /// any other selector invalidates the general cache wholesale.
    pub fn register(&self, selector: Selector<K>, handler: H) -> Arc<Registration<K, H>> {
        let prime_id = match &selector {
            Selector::Anonymous(token) => Some(token.id()),
            _ => None,
        };
        let registration = Arc::new(Registration::new(selector, handler));
        self.chain.append(Arc::clone(&registration));

        if let Some(id) = prime_id {
            self.prime
                .lock()
                .entry(id)
                .or_default()
                .push(Arc::clone(&registration));
        } else {
            self.cache.lock().clear();
        }
        registration
    }

    /// Returns the registrations matching `key`, in append order.
    ///
    /// Identity keys are served from the prime cache only (miss ⇒ empty).
    /// General keys are served from the general cache, falling back to a
    /// full chain scan whose survivors are cached under the key hash.
    #[must_use]
    pub fn select(&self, key: &Key<K>) -> Matches<K, H> {
        match key {
            Key::Anonymous(token) => {
                let prime = self.prime.lock();
                match prime.get(&token.id()) {
                    Some(bucket) => bucket
                        .iter()
                        .filter(|r| !r.is_cancelled() && !r.is_paused())
                        .cloned()
                        .collect(),
                    None => Matches::new(),
                }
            }
            Key::Value(_) => {
                let hash = key.hash_code();
                let mut cache = self.cache.lock();
                if let Some(cached) = cache.get(&hash) {
                    return cached.iter().cloned().collect();
                }

                self.cache_miss(hash);
                let survivors: Vec<Arc<Registration<K, H>>> = self
                    .chain
                    .iter()
                    .filter(|r| !r.is_cancelled() && !r.is_paused() && r.matches(key))
                    .collect();
                let cached: CachedSet<K, H> = survivors.into();
                cache.insert(hash, Arc::clone(&cached));
                cached.iter().cloned().collect()
            }
        }
    }

    /// Cancels and removes everything registered under `key`.
    ///
    /// Returns `true` if anything was found. Identity keys drop their whole
    /// prime bucket; general keys cancel every current match and evict the
    /// general-cache entry for the key hash.
    pub fn unregister(&self, key: &Key<K>) -> bool {
        match key {
            Key::Anonymous(token) => {
                let bucket = self.prime.lock().remove(&token.id());
                match bucket {
                    Some(registrations) => {
                        for registration in &registrations {
                            registration.cancel();
                        }
                        !registrations.is_empty()
                    }
                    None => false,
                }
            }
            Key::Value(_) => {
                let matches = self.select(key);
                let found = !matches.is_empty();
                for registration in &matches {
                    registration.cancel();
                }
                self.cache.lock().remove(&key.hash_code());
                found
            }
        }
    }

    /// Cancels every live registration and empties both cache tiers.
    ///
    /// Every subsequent `select` on any key returns empty.
    pub fn clear(&self) {
        for registration in self.chain.iter() {
            registration.cancel();
        }
        self.cache.lock().clear();
        self.prime.lock().clear();
    }

    /// Iterates every registration in the pool, cancelled entries included.
    #[must_use]
    pub fn iter(&self) -> ChainIter<K, H> {
        self.chain.iter()
    }

    /// Returns the number of registrations ever appended to the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Returns `true` if nothing was ever registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Returns the number of populated general-cache buckets.
    #[must_use]
    pub fn cache_entries(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns the number of populated prime-cache buckets.
    #[must_use]
    pub fn prime_entries(&self) -> usize {
        self.prime.lock().len()
    }

    /// Hook invoked on every full pool scan.
    fn cache_miss(&self, key_hash: u64) {
        tracing::trace!(key_hash, pool = self.chain.len(), "selector cache miss, scanning pool");
    }
}

impl<K, H> Default for CachingRegistry<K, H>
where
    K: PartialEq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
