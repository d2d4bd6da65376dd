//! Recording sink used by unit and integration tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::flow::subscription::{Subscriber, Subscription};
use crate::flow::FlowError;

/// A sink that records every signal it receives.
///
/// Optionally issues an automatic `request(n)` as soon as it is subscribed,
/// so tests can drive unbounded or fixed-demand consumption without racing
/// the handshake.
pub(crate) struct TestSink<T> {
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    items: Mutex<Vec<T>>,
    errors: Mutex<Vec<FlowError>>,
    completions: AtomicUsize,
    subscribe_calls: AtomicUsize,
    auto_request: AtomicU64,
}

impl<T: Send> TestSink<T> {
    /// A sink that requests nothing until told to.
    pub(crate) fn new() -> Arc<Self> {
        Self::with_request(0)
    }

    /// A sink that requests `n` on subscribe (0 = no automatic request).
    pub(crate) fn with_request(n: u64) -> Arc<Self> {
        Arc::new(Self {
            subscription: Mutex::new(None),
            items: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            auto_request: AtomicU64::new(n),
        })
    }

    pub(crate) fn request(&self, n: u64) {
        let subscription = self.subscription.lock().clone();
        subscription
            .expect("sink has not been subscribed")
            .request(n);
    }

    pub(crate) fn cancel(&self) {
        let subscription = self.subscription.lock().clone();
        if let Some(s) = subscription {
            s.cancel();
        }
    }

    pub(crate) fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.lock().clone()
    }

    pub(crate) fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn errors(&self) -> Vec<FlowError> {
        self.errors.lock().clone()
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completions.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.is_completed() || !self.errors.lock().is_empty()
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }
}

impl<T: Send> Subscriber<T> for TestSink<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self.subscription.lock() = Some(Arc::clone(&subscription));
        let n = self.auto_request.load(Ordering::SeqCst);
        if n > 0 {
            subscription.request(n);
        }
    }

    fn on_next(&self, item: T) {
        self.items.lock().push(item);
    }

    fn on_complete(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: FlowError) {
        self.errors.lock().push(error);
    }
}
