//! The subscription contract: sources, sinks, and subscriptions.
//!
//! Signal order is fixed: `on_subscribe` always first, then zero or more
//! `on_next`, then at most one of `on_complete` / `on_error`, then nothing.
//! A sink that observes an emission after cancelling discards it as
//! out-of-protocol; a racing in-flight emission is not a bug.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::flow::demand::Demand;
use crate::flow::FlowError;

// ---------------------------------------------------------------------------
// Protocol traits
// ---------------------------------------------------------------------------

/// The demand side of an active source/sink connection.
pub trait Subscription: Send + Sync {
    /// Requests `n` more items. `n` must be strictly positive; a zero
    /// request is a protocol violation reported to the sink as a terminal
    /// [`FlowError::InvalidDemand`].
    fn request(&self, n: u64);

    /// Stops all future delivery and releases upstream resources.
    /// Idempotent. Emissions attempted after cancellation are silent
    /// no-ops, never errors.
    fn cancel(&self);
}

/// The receiving side of a stream.
///
/// Implementations must tolerate concurrent signals from multiple producer
/// threads; all methods take `&self`.
pub trait Subscriber<T>: Send + Sync {
    /// First signal on any subscription; hands over the [`Subscription`]
    /// used to request demand and cancel.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// Delivers one item. Only called while accumulated demand is positive.
    fn on_next(&self, item: T);

    /// Terminal success signal.
    fn on_complete(&self);

    /// Terminal failure signal.
    fn on_error(&self, error: FlowError);
}

/// The emitting side of a stream.
pub trait Source<T>: Send + Sync {
    /// Connects a sink. The source must call
    /// [`Subscriber::on_subscribe`] before any other signal.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

// ---------------------------------------------------------------------------
// EmptySubscription / CancelledSubscription
// ---------------------------------------------------------------------------

/// Subscription handed to sinks of sources that complete without emitting.
///
/// All operations are no-ops; the source follows `on_subscribe` with an
/// immediate `on_complete`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

/// Subscription representing an already-cancelled connection.
///
/// A terminal state that should not be handed to clients when an empty
/// subscription would do: there is no way to observe cancellation through
/// the `Subscription` trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct CancelledSubscription;

impl Subscription for CancelledSubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

/// Completes a sink immediately with no items.
pub fn subscribe_empty<T>(subscriber: &Arc<dyn Subscriber<T>>) {
    subscriber.on_subscribe(Arc::new(EmptySubscription));
    subscriber.on_complete();
}

// ---------------------------------------------------------------------------
// DeferredSubscription
// ---------------------------------------------------------------------------

/// A subscription slot whose real upstream arrives later.
///
/// Demand requested before the upstream subscription is set accumulates in
/// a missed-demand counter and is flushed to the upstream on arrival.
/// Combinators use this for inner branches that subscribe asynchronously
/// (race branches, merge branches, operator rewiring).
#[derive(Default)]
pub struct DeferredSubscription {
    upstream: Mutex<Option<Arc<dyn Subscription>>>,
    missed: Demand,
    cancelled: AtomicBool,
}

impl DeferredSubscription {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            upstream: Mutex::new(None),
            missed: Demand::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Installs the upstream subscription and flushes missed demand.
    ///
    /// Returns `false` (and cancels `subscription`) if the slot was already
    /// filled or the connection was cancelled in the meantime; per the
    /// protocol a second `on_subscribe` must not leak a live subscription.
    pub fn set(&self, subscription: Arc<dyn Subscription>) -> bool {
        let missed = {
            let mut slot = self.upstream.lock();
            if self.is_cancelled() || slot.is_some() {
                drop(slot);
                subscription.cancel();
                return false;
            }
            *slot = Some(Arc::clone(&subscription));
            self.missed.take()
        };
        if missed > 0 {
            subscription.request(missed);
        }
        true
    }

    /// Returns `true` once [`cancel`](Subscription::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Subscription for DeferredSubscription {
    fn request(&self, n: u64) {
        if self.is_cancelled() {
            return;
        }
        let upstream = {
            let slot = self.upstream.lock();
            match &*slot {
                Some(s) => Some(Arc::clone(s)),
                None => {
                    // Accumulate under the lock so a concurrent `set`
                    // cannot miss this demand.
                    self.missed.add(n);
                    None
                }
            }
        };
        if let Some(s) = upstream {
            s.request(n);
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let upstream = self.upstream.lock().take();
        if let Some(s) = upstream {
            s.cancel();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
