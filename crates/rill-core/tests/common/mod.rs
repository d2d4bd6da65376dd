//! Shared helpers for integration tests.
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use rill_core::flow::{FlowError, Subscriber, Subscription};

/// A sink recording every signal, optionally auto-requesting on subscribe.
pub struct RecordingSink<T> {
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    items: Mutex<Vec<T>>,
    errors: Mutex<Vec<FlowError>>,
    completions: AtomicUsize,
    auto_request: AtomicU64,
}

impl<T: Send> RecordingSink<T> {
    pub fn new() -> Arc<Self> {
        Self::with_request(0)
    }

    pub fn with_request(n: u64) -> Arc<Self> {
        Arc::new(Self {
            subscription: Mutex::new(None),
            items: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            auto_request: AtomicU64::new(n),
        })
    }

    pub fn request(&self, n: u64) {
        let subscription = self.subscription.lock().clone();
        subscription
            .expect("sink has not been subscribed")
            .request(n);
    }

    pub fn cancel(&self) {
        let subscription = self.subscription.lock().clone();
        if let Some(s) = subscription {
            s.cancel();
        }
    }

    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.lock().clone()
    }

    pub fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    pub fn errors(&self) -> Vec<FlowError> {
        self.errors.lock().clone()
    }

    pub fn is_completed(&self) -> bool {
        self.completions.load(Ordering::SeqCst) > 0
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl<T: Send> Subscriber<T> for RecordingSink<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
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
