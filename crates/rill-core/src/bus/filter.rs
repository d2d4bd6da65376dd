//! Routing filters.
//!
//! A filter chooses which of the registrations matched by a `select` are
//! actually invoked for one notification. The default broadcasts to all;
//! the alternatives implement single-consumer and load-balanced routing.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

// ---------------------------------------------------------------------------
// RouteFilter
// ---------------------------------------------------------------------------

/// Chooses the subset of matched candidates that receive one notification.
pub trait RouteFilter<R>: Send + Sync {
    /// Filters `candidates` for the notification routed under `key`.
    fn filter(&self, candidates: Vec<R>, key: &dyn fmt::Debug) -> Vec<R>;
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Broadcasts to every match.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl<R> RouteFilter<R> for Passthrough {
    fn filter(&self, candidates: Vec<R>, _key: &dyn fmt::Debug) -> Vec<R> {
        candidates
    }
}

/// Routes to the first match only (append order).
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstMatch;

impl<R> RouteFilter<R> for FirstMatch {
    fn filter(&self, mut candidates: Vec<R>, _key: &dyn fmt::Debug) -> Vec<R> {
        candidates.truncate(1);
        candidates
    }
}

/// Distributes successive notifications across matches in rotation.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Creates a rotation starting at the first match.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R> RouteFilter<R> for RoundRobin {
    fn filter(&self, mut candidates: Vec<R>, _key: &dyn fmt::Debug) -> Vec<R> {
        if candidates.is_empty() {
            return candidates;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        vec![candidates.swap_remove(index)]
    }
}

// ---------------------------------------------------------------------------
// Traced
// ---------------------------------------------------------------------------

/// Wraps a filter with trace-level routing logs.
pub struct Traced<F> {
    delegate: F,
}

impl<F> Traced<F> {
    /// Wraps `delegate`.
    pub fn new(delegate: F) -> Self {
        Self { delegate }
    }
}

impl<R, F: RouteFilter<R>> RouteFilter<R> for Traced<F> {
    fn filter(&self, candidates: Vec<R>, key: &dyn fmt::Debug) -> Vec<R> {
        tracing::trace!(?key, candidates = candidates.len(), "filtering routed candidates");
        let routed = self.delegate.filter(candidates, key);
        tracing::trace!(?key, routed = routed.len(), "candidates matched key");
        routed
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_keeps_all() {
        let filter = Passthrough;
        assert_eq!(filter.filter(vec![1, 2, 3], &"k"), vec![1, 2, 3]);
    }

    #[test]
    fn test_first_match_keeps_head() {
        let filter = FirstMatch;
        assert_eq!(filter.filter(vec![1, 2, 3], &"k"), vec![1]);
        assert_eq!(filter.filter(Vec::<i32>::new(), &"k"), Vec::<i32>::new());
    }

    #[test]
    fn test_round_robin_rotates() {
        let filter = RoundRobin::new();
        let picks: Vec<i32> = (0..6)
            .map(|_| filter.filter(vec![10, 20, 30], &"k")[0])
            .collect();
        assert_eq!(picks, vec![10, 20, 30, 10, 20, 30]);
    }

    #[test]
    fn test_round_robin_empty() {
        let filter = RoundRobin::new();
        assert!(filter.filter(Vec::<i32>::new(), &"k").is_empty());
    }

    #[test]
    fn test_traced_delegates() {
        let filter = Traced::new(FirstMatch);
        assert_eq!(filter.filter(vec![7, 8], &"k"), vec![7]);
    }
}
