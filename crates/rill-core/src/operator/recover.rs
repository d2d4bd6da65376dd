//! Error recovery: reinterprets matching terminal errors as data.
//!
//! A configured error-class selector (a predicate over [`FlowError`])
//! decides each incoming error's fate: matching errors are converted into
//! the operator's data channel and the stream completes; non-matching
//! errors pass through as errors unchanged. Upstream items are not this
//! operator's subject and are ignored.
//!
//! Once an error has been converted, replaying the subscription serves the
//! cached converted value instead of resubscribing upstream.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::flow::{DeferredSubscription, FlowError, Source, Subscriber, Subscription, UNBOUNDED};
use crate::operator::DeferredScalar;

/// Error-class selector.
pub type ErrorMatchFn = Arc<dyn Fn(&FlowError) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Recover
// ---------------------------------------------------------------------------

/// Converts matching upstream errors into downstream data.
pub struct Recover<T> {
    source: Arc<dyn Source<T>>,
    matcher: ErrorMatchFn,
    cached: Arc<Mutex<Option<FlowError>>>,
}

impl<T: Send + Sync + 'static> Recover<T> {
    /// Creates the operator with an error-class selector.
    pub fn new(
        source: Arc<dyn Source<T>>,
        matcher: impl Fn(&FlowError) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            matcher: Arc::new(matcher),
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the converted error, if one has been captured.
    #[must_use]
    pub fn captured(&self) -> Option<FlowError> {
        self.cached.lock().clone()
    }
}

impl<T: Send + Sync + 'static> Source<FlowError> for Recover<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<FlowError>>) {
        let scalar = DeferredScalar::new(Arc::clone(&subscriber));

        // Replay path: a previously converted error is served without
        // touching the upstream again.
        if let Some(cached) = self.cached.lock().clone() {
            subscriber.on_subscribe(Arc::clone(&scalar) as Arc<dyn Subscription>);
            scalar.complete_with(cached);
            return;
        }

        let recoverer = Arc::new(RecoverSubscriber {
            downstream: subscriber,
            scalar,
            upstream: Arc::new(DeferredSubscription::new()),
            matcher: Arc::clone(&self.matcher),
            cached: Arc::clone(&self.cached),
            _marker: PhantomData,
        });

        // Downstream demand drives the scalar; the upstream run is driven
        // unbounded so its terminal signal arrives regardless.
        recoverer.downstream.on_subscribe(Arc::new(RecoverSubscription {
            recoverer: Arc::clone(&recoverer),
        }));
        self.source.subscribe(Arc::clone(&recoverer) as Arc<dyn Subscriber<T>>);
    }
}

// ---------------------------------------------------------------------------
// RecoverSubscription — downstream-facing
// ---------------------------------------------------------------------------

struct RecoverSubscription<T> {
    recoverer: Arc<RecoverSubscriber<T>>,
}

impl<T: Send + Sync + 'static> Subscription for RecoverSubscription<T> {
    fn request(&self, n: u64) {
        self.recoverer.scalar.request(n);
    }

    fn cancel(&self) {
        self.recoverer.scalar.cancel();
        self.recoverer.upstream.cancel();
    }
}

// ---------------------------------------------------------------------------
// RecoverSubscriber — upstream-facing
// ---------------------------------------------------------------------------

struct RecoverSubscriber<T> {
    downstream: Arc<dyn Subscriber<FlowError>>,
    scalar: Arc<DeferredScalar<FlowError>>,
    upstream: Arc<DeferredSubscription>,
    matcher: ErrorMatchFn,
    cached: Arc<Mutex<Option<FlowError>>>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + Sync + 'static> Subscriber<T> for RecoverSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription) {
            self.upstream.request(UNBOUNDED);
        }
    }

    fn on_next(&self, _item: T) {
        // Data is not this operator's subject.
    }

    fn on_complete(&self) {
        self.downstream.on_complete();
    }

    fn on_error(&self, error: FlowError) {
        if (self.matcher)(&error) {
            *self.cached.lock() = Some(error.clone());
            self.scalar.complete_with(error);
        } else {
            self.downstream.on_error(error);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
