//! Registrations and the append-only registration chain.
//!
//! The chain is the registry's source of truth: a singly linked list
//! sharing a sentinel root, to which nodes are only ever appended. Node
//! `next` links are set-once cells, so a reader captures the root once and
//! iterates safely regardless of concurrent appends — it simply may not see
//! appends that raced its snapshot. Removal is logical: cancelling a
//! registration makes its selector report "never matches"; nodes are never
//! unlinked.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::registry::selector::{Key, Selector};

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// The live association between a selector and a handler.
///
/// Lifecycle flags are atomic and monotonic where it matters: `cancelled`
/// only ever goes false → true. The holder of the registration handle is
/// the single logical owner of these flags.
pub struct Registration<K, H> {
    selector: Selector<K>,
    handler: H,
    cancelled: AtomicBool,
    paused: AtomicBool,
    cancel_after_use: AtomicBool,
}

impl<K, H> Registration<K, H> {
    pub(crate) fn new(selector: Selector<K>, handler: H) -> Self {
        Self {
            selector,
            handler,
            cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            cancel_after_use: AtomicBool::new(false),
        }
    }

    /// Returns the selector, or `None` once cancelled — a cancelled
    /// registration's selector must report "never matches" so it drops out
    /// of result sets without physical removal.
    #[must_use]
    pub fn selector(&self) -> Option<&Selector<K>> {
        if self.is_cancelled() {
            None
        } else {
            Some(&self.selector)
        }
    }

    /// Evaluates this registration against a lookup key; always `false`
    /// once cancelled.
    #[must_use]
    pub fn matches(&self, key: &Key<K>) -> bool
    where
        K: PartialEq,
    {
        self.selector().is_some_and(|s| s.matches(key))
    }

    /// Returns the handler, or `None` while cancelled or paused.
    #[must_use]
    pub fn handler(&self) -> Option<&H> {
        if self.is_cancelled() || self.is_paused() {
            None
        } else {
            Some(&self.handler)
        }
    }

    /// Cancels this registration. Idempotent; never reverts.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Pauses this registration: it keeps matching for cache purposes but
    /// exposes no handler until resumed.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resumes a paused registration.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Returns `true` while paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Marks this registration for cancellation after its next use.
    pub fn cancel_after_use(&self) {
        self.cancel_after_use.store(true, Ordering::Release);
    }

    /// Returns `true` if marked for cancellation after use.
    #[must_use]
    pub fn is_cancel_after_use(&self) -> bool {
        self.cancel_after_use.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// RegistrationChain
// ---------------------------------------------------------------------------

struct ChainNode<K, H> {
    /// `None` only on the sentinel root.
    registration: Option<Arc<Registration<K, H>>>,
    next: OnceLock<Arc<ChainNode<K, H>>>,
}

/// Append-only chain of registrations sharing a sentinel root.
///
/// Appends are O(1) through a tail pointer guarded by the registration
/// mutation lock; size is tracked at the root. Iteration never takes a
/// lock.
pub struct RegistrationChain<K, H> {
    root: Arc<ChainNode<K, H>>,
    tail: Mutex<Arc<ChainNode<K, H>>>,
    size: AtomicUsize,
}

impl<K, H> RegistrationChain<K, H> {
    /// Creates an empty chain (sentinel root only).
    #[must_use]
    pub fn new() -> Self {
        let root = Arc::new(ChainNode {
            registration: None,
            next: OnceLock::new(),
        });
        Self {
            tail: Mutex::new(Arc::clone(&root)),
            root,
            size: AtomicUsize::new(0),
        }
    }

    /// Appends a registration past the current tail.
    pub fn append(&self, registration: Arc<Registration<K, H>>) {
        let node = Arc::new(ChainNode {
            registration: Some(registration),
            next: OnceLock::new(),
        });
        let mut tail = self.tail.lock();
        tail.next
            .set(Arc::clone(&node))
            .unwrap_or_else(|_| unreachable!("tail.next is unset while the mutation lock is held"));
        *tail = node;
        self.size.fetch_add(1, Ordering::Release);
    }

    /// Returns the number of registrations ever appended (cancelled entries
    /// included — removal is logical).
    #[must_use]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Returns `true` if nothing was ever appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates a lock-free snapshot in append order.
    #[must_use]
    pub fn iter(&self) -> ChainIter<K, H> {
        ChainIter {
            node: Some(Arc::clone(&self.root)),
        }
    }
}

impl<K, H> Default for RegistrationChain<K, H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a chain snapshot.
pub struct ChainIter<K, H> {
    node: Option<Arc<ChainNode<K, H>>>,
}

impl<K, H> Iterator for ChainIter<K, H> {
    type Item = Arc<Registration<K, H>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self.node.take()?;
            self.node = current.next.get().cloned();
            if let Some(registration) = &current.registration {
                return Some(Arc::clone(registration));
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
