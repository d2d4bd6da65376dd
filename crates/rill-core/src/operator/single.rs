//! Single-value extraction.
//!
//! Expects exactly one item from the source. The operator subscribes
//! upstream with unbounded demand once the downstream has shown any demand,
//! so it can see the whole sequence before deciding:
//!
//! - a second item cancels upstream and raises
//!   [`FlowError::TooManyItems`] immediately, not at completion;
//! - completion with zero items applies the configured [`DefaultValue`]
//!   policy;
//! - exactly one item is forwarded, then completion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::flow::{
    DeferredSubscription, FlowError, Source, Subscriber, Subscription, UNBOUNDED,
};
use crate::operator::DeferredScalar;

// ---------------------------------------------------------------------------
// DefaultValue
// ---------------------------------------------------------------------------

/// Policy applied when the source completes without emitting.
pub enum DefaultValue<T> {
    /// No default: an empty source is a [`FlowError::NoSuchElement`] error.
    None,
    /// An empty source completes empty-successfully.
    CompleteEmpty,
    /// Invoke the supplier; `Some(v)` is emitted, `None` is a
    /// [`FlowError::EmptyDefault`] error.
    Supply(Arc<dyn Fn() -> Option<T> + Send + Sync>),
}

impl<T> DefaultValue<T> {
    /// Builds a supplier policy from a closure.
    pub fn supply(supplier: impl Fn() -> Option<T> + Send + Sync + 'static) -> Self {
        Self::Supply(Arc::new(supplier))
    }
}

impl<T> Clone for DefaultValue<T> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::CompleteEmpty => Self::CompleteEmpty,
            Self::Supply(f) => Self::Supply(Arc::clone(f)),
        }
    }
}

// ---------------------------------------------------------------------------
// Single
// ---------------------------------------------------------------------------

/// Extracts the single item of a source.
pub struct Single<T> {
    source: Arc<dyn Source<T>>,
    default: DefaultValue<T>,
}

impl<T: Send + Sync + 'static> Single<T> {
    /// Creates the operator with no default (empty source is an error).
    #[must_use]
    pub fn new(source: Arc<dyn Source<T>>) -> Self {
        Self::with_default(source, DefaultValue::None)
    }

    /// Creates the operator with a default policy for empty sources.
    #[must_use]
    pub fn with_default(source: Arc<dyn Source<T>>, default: DefaultValue<T>) -> Self {
        Self { source, default }
    }
}

impl<T: Send + Sync + 'static> Source<T> for Single<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let extractor = Arc::new(SingleSubscriber {
            scalar: DeferredScalar::new(Arc::clone(&subscriber)),
            downstream: subscriber,
            upstream: Arc::new(DeferredSubscription::new()),
            default: self.default.clone(),
            value: Mutex::new(None),
            count: AtomicUsize::new(0),
            done: AtomicBool::new(false),
        });

        extractor.downstream.on_subscribe(Arc::new(SingleSubscription {
            extractor: Arc::clone(&extractor),
        }));
        self.source.subscribe(extractor);
    }
}

// ---------------------------------------------------------------------------
// SingleSubscription — downstream-facing
// ---------------------------------------------------------------------------

struct SingleSubscription<T> {
    extractor: Arc<SingleSubscriber<T>>,
}

impl<T: Send + Sync + 'static> Subscription for SingleSubscription<T> {
    fn request(&self, n: u64) {
        self.extractor.scalar.request(n);
        if n > 0 {
            // Any positive downstream demand authorizes the full upstream
            // run; re-requesting unbounded demand is idempotent.
            self.extractor.upstream.request(UNBOUNDED);
        }
    }

    fn cancel(&self) {
        self.extractor.scalar.cancel();
        self.extractor.upstream.cancel();
    }
}

// ---------------------------------------------------------------------------
// SingleSubscriber — upstream-facing
// ---------------------------------------------------------------------------

struct SingleSubscriber<T> {
    downstream: Arc<dyn Subscriber<T>>,
    scalar: Arc<DeferredScalar<T>>,
    upstream: Arc<DeferredSubscription>,
    default: DefaultValue<T>,
    value: Mutex<Option<T>>,
    count: AtomicUsize,
    done: AtomicBool,
}

impl<T: Send + Sync + 'static> SingleSubscriber<T> {
    fn terminate_with(&self, error: FlowError) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.downstream.on_error(error);
    }
}

impl<T: Send + Sync + 'static> Subscriber<T> for SingleSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let _ = self.upstream.set(subscription);
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        *self.value.lock() = Some(item);

        if self.count.fetch_add(1, Ordering::AcqRel) + 1 > 1 {
            // Second item: cancel upstream and fail now, not at
            // completion.
            self.upstream.cancel();
            let _ = self.value.lock().take();
            self.terminate_with(FlowError::TooManyItems);
        }
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.count.load(Ordering::Acquire) {
            0 => match &self.default {
                DefaultValue::None => self.downstream.on_error(FlowError::NoSuchElement),
                DefaultValue::CompleteEmpty => self.downstream.on_complete(),
                DefaultValue::Supply(supplier) => match supplier() {
                    Some(value) => self.scalar.complete_with(value),
                    None => self.downstream.on_error(FlowError::EmptyDefault),
                },
            },
            1 => {
                if let Some(value) = self.value.lock().take() {
                    self.scalar.complete_with(value);
                }
            }
            _ => {}
        }
    }

    fn on_error(&self, error: FlowError) {
        self.terminate_with(error);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
