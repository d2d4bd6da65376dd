//! # Selector Routing Registry
//!
//! Maps match predicates ("selectors") to registered handlers, with a
//! tiered cache for O(1) amortized lookup under high registration churn.
//!
//! ## Types
//!
//! - [`Selector`] / [`Key`] / [`AnonymousKey`] — match predicates and
//!   lookup keys, split into identity and general classes
//! - [`Registration`] — a selector/handler association with
//!   cancel/pause/cancel-after-use lifecycle
//! - [`RegistrationChain`] — the append-only pool, iterable without locks
//! - [`CachingRegistry`] — the three-tier registry

mod caching;
mod chain;
mod selector;

pub use caching::{CachingRegistry, Matches};
pub use chain::{ChainIter, Registration, RegistrationChain};
pub use selector::{AnonymousKey, Key, MatchFn, Selector};
