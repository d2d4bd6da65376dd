//! Timeout: synthetic demand when no data flows before a deadline.
//!
//! A one-shot timer is armed on subscribe and re-armed after every item.
//! If the timer fires without being preempted by a newer arming, it
//! requests additional upstream demand equal to the shortfall between the
//! configured batch size and the items seen since the last synthetic
//! request — a liveness nudge, not a failure signal. A stale fire
//! (superseded by a newer arming) does nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::dispatch::{Pausable, TimerHandle, TimerService};
use crate::flow::{DeferredSubscription, FlowError, Source, Subscriber, Subscription};

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

/// Pass-through operator injecting demand on upstream silence.
pub struct Timeout<T> {
    source: Arc<dyn Source<T>>,
    timer: Arc<TimerService>,
    timeout: Duration,
    batch_size: u64,
}

impl<T: Send + 'static> Timeout<T> {
    /// Creates the operator.
    ///
    /// `batch_size` is the demand window replenished on every fire: the
    /// timer requests `batch_size - items_seen_since_last_nudge` upstream
    /// when that shortfall is positive.
    #[must_use]
    pub fn new(
        source: Arc<dyn Source<T>>,
        timer: Arc<TimerService>,
        timeout: Duration,
        batch_size: u64,
    ) -> Self {
        Self {
            source,
            timer,
            timeout,
            batch_size,
        }
    }
}

impl<T: Send + 'static> Source<T> for Timeout<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let core = Arc::new(TimeoutCore {
            downstream: subscriber,
            upstream: Arc::new(DeferredSubscription::new()),
            timer: Arc::clone(&self.timer),
            timeout: self.timeout,
            batch_size: self.batch_size,
            seen: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            armed: Mutex::new(None),
        });
        self.source.subscribe(Arc::new(TimeoutUpstream { core }));
    }
}

// ---------------------------------------------------------------------------
// TimeoutCore
// ---------------------------------------------------------------------------

struct TimeoutCore<T> {
    downstream: Arc<dyn Subscriber<T>>,
    upstream: Arc<DeferredSubscription>,
    timer: Arc<TimerService>,
    timeout: Duration,
    batch_size: u64,
    /// Items seen since the last synthetic demand request.
    seen: AtomicU64,
    /// Arming generation; a fire belonging to an older generation is
    /// stale and does nothing.
    generation: AtomicU64,
    armed: Mutex<Option<TimerHandle>>,
}

impl<T: Send + 'static> TimeoutCore<T> {
    fn arm(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let watchdog = Arc::clone(self);
        let handle = self
            .timer
            .submit(move || watchdog.fire(generation), self.timeout);

        let stale = self.armed.lock().replace(handle);
        if let Some(previous) = stale {
            previous.cancel();
        }
    }

    fn fire(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        let seen = self.seen.swap(0, Ordering::AcqRel);
        let shortfall = self.batch_size.saturating_sub(seen);
        if shortfall > 0 {
            self.upstream.request(shortfall);
        }
    }

    fn disarm(&self) {
        // Invalidate any in-flight fire before cancelling the handle.
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = self.armed.lock().take() {
            handle.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutUpstream — upstream-facing subscriber
// ---------------------------------------------------------------------------

struct TimeoutUpstream<T> {
    core: Arc<TimeoutCore<T>>,
}

impl<T: Send + 'static> Subscriber<T> for TimeoutUpstream<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if !self.core.upstream.set(subscription) {
            return;
        }
        self.core
            .downstream
            .on_subscribe(Arc::new(TimeoutSubscription {
                core: Arc::clone(&self.core),
            }));
        self.core.arm();
    }

    fn on_next(&self, item: T) {
        self.core.seen.fetch_add(1, Ordering::AcqRel);
        self.core.downstream.on_next(item);
        self.core.arm();
    }

    fn on_complete(&self) {
        self.core.disarm();
        self.core.downstream.on_complete();
    }

    fn on_error(&self, error: FlowError) {
        self.core.disarm();
        self.core.downstream.on_error(error);
    }
}

// ---------------------------------------------------------------------------
// TimeoutSubscription — downstream-facing
// ---------------------------------------------------------------------------

struct TimeoutSubscription<T> {
    core: Arc<TimeoutCore<T>>,
}

impl<T: Send + 'static> Subscription for TimeoutSubscription<T> {
    fn request(&self, n: u64) {
        self.core.upstream.request(n);
    }

    fn cancel(&self) {
        self.core.disarm();
        self.core.upstream.cancel();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
