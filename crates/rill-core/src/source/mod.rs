//! # Cold Sources
//!
//! Replayable sources that serve a fixed, finite run of items to every
//! subscriber under exact demand accounting.
//!
//! All cold sources share one drain loop ([`ColdSubscription`]): a
//! wip-serialized trampoline that tolerates reentrant `request` calls from
//! `on_next` without unbounded stack growth, delivers one item per unit of
//! demand, and completes exactly once when the run is exhausted.
//!
//! - [`IterSource`] — replays a vector of items
//! - [`RangeSource`] — emits `count` consecutive integers from `start`
//! - [`EmptySource`] — completes immediately with no items

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::flow::{
    subscribe_empty, DemandChannel, FlowError, Source, Subscriber, Subscription,
};

// ---------------------------------------------------------------------------
// ColdSubscription — shared indexed drain loop
// ---------------------------------------------------------------------------

/// Subscription serving items by index from a finite run.
///
/// The drain loop is serialized by a wip counter: the thread that moves wip
/// from 0 owns the loop; concurrent `request` calls only bump the counter
/// and leave. `cursor` is only touched inside the owned loop.
struct ColdSubscription<T> {
    subscriber: Arc<dyn Subscriber<T>>,
    get: Arc<dyn Fn(usize) -> T + Send + Sync>,
    len: usize,
    cursor: AtomicUsize,
    channel: DemandChannel,
    wip: AtomicUsize,
}

impl<T> ColdSubscription<T> {
    fn new(
        subscriber: Arc<dyn Subscriber<T>>,
        len: usize,
        get: Arc<dyn Fn(usize) -> T + Send + Sync>,
    ) -> Self {
        Self {
            subscriber,
            get,
            len,
            cursor: AtomicUsize::new(0),
            channel: DemandChannel::new(),
            wip: AtomicUsize::new(0),
        }
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            loop {
                let i = self.cursor.load(Ordering::Relaxed);
                if i >= self.len || self.channel.is_cancelled() {
                    break;
                }
                if !self.channel.try_consume() {
                    break;
                }
                self.cursor.store(i + 1, Ordering::Relaxed);
                self.subscriber.on_next((self.get)(i));
            }

            if self.cursor.load(Ordering::Relaxed) >= self.len && self.channel.try_complete() {
                self.subscriber.on_complete();
            }

            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                break;
            }
            missed = remaining;
        }
    }
}

impl<T> Subscription for ColdSubscription<T> {
    fn request(&self, n: u64) {
        match self.channel.request(n) {
            Ok(_) => self.drain(),
            Err(violation) => {
                if self.channel.try_error() {
                    self.subscriber.on_error(violation);
                }
            }
        }
    }

    fn cancel(&self) {
        self.channel.cancel();
    }
}

// ---------------------------------------------------------------------------
// IterSource
// ---------------------------------------------------------------------------

/// A cold source replaying a fixed vector of items.
///
/// Every subscriber receives the full run from the beginning; items are
/// cloned per delivery.
pub struct IterSource<T> {
    items: Arc<[T]>,
}

impl<T: Clone + Send + Sync + 'static> IterSource<T> {
    /// Creates a source over the given items.
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Arc::from(items),
        }
    }

    /// Creates a source emitting exactly one item.
    #[must_use]
    pub fn just(item: T) -> Self {
        Self::new(vec![item])
    }

    /// Returns the number of items this source replays.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if this source completes without emitting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone + Send + Sync + 'static> Source<T> for IterSource<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        subscribe_slice(Arc::clone(&self.items), subscriber);
    }
}

/// Serves a snapshot slice to a sink under the shared drain loop.
///
/// Used by [`IterSource`] and by windows re-emitting their contents.
pub(crate) fn subscribe_slice<T: Clone + Send + Sync + 'static>(
    items: Arc<[T]>,
    subscriber: Arc<dyn Subscriber<T>>,
) {
    if items.is_empty() {
        subscribe_empty(&subscriber);
        return;
    }
    let len = items.len();
    let subscription = Arc::new(ColdSubscription::new(
        Arc::clone(&subscriber),
        len,
        Arc::new(move |i| items[i].clone()),
    ));
    subscriber.on_subscribe(subscription);
}

// ---------------------------------------------------------------------------
// EmptySource
// ---------------------------------------------------------------------------

/// A source that completes immediately with no items.
pub struct EmptySource<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> EmptySource<T> {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for EmptySource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Source<T> for EmptySource<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        subscribe_empty(&subscriber);
    }
}

// ---------------------------------------------------------------------------
// RangeSource
// ---------------------------------------------------------------------------

/// A cold source emitting `count` consecutive integers starting at `start`.
pub struct RangeSource {
    start: i64,
    count: u64,
}

impl RangeSource {
    /// Creates a range source.
    ///
    /// # Errors
    ///
    /// Returns an error when `start + count - 1` would overflow `i64`.
    pub fn new(start: i64, count: u64) -> Result<Self, FlowError> {
        if count > 0 {
            let span = i64::try_from(count - 1)
                .ok()
                .and_then(|c| start.checked_add(c));
            if span.is_none() {
                return Err(FlowError::message(format!(
                    "range end overflows: start={start}, count={count}"
                )));
            }
        }
        Ok(Self { start, count })
    }
}

impl Source<i64> for RangeSource {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<i64>>) {
        if self.count == 0 {
            subscribe_empty(&subscriber);
            return;
        }
        let start = self.start;
        #[allow(clippy::cast_possible_truncation)]
        let len = usize::try_from(self.count).unwrap_or(usize::MAX);
        #[allow(clippy::cast_possible_wrap)]
        let subscription = Arc::new(ColdSubscription::new(
            Arc::clone(&subscriber),
            len,
            Arc::new(move |i| start + i as i64),
        ));
        subscriber.on_subscribe(subscription);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::testkit::TestSink;
    use crate::flow::UNBOUNDED;
    use parking_lot::Mutex;

    // --- IterSource tests ---

    #[test]
    fn test_iter_unbounded() {
        let source = IterSource::new(vec![1, 2, 3]);
        let sink = TestSink::with_request(UNBOUNDED);
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i32>>);

        assert_eq!(sink.items(), vec![1, 2, 3]);
        assert!(sink.is_completed());
    }

    #[test]
    fn test_iter_exact_demand_accounting() {
        let source = IterSource::new(vec![1, 2, 3, 4, 5]);
        let sink = TestSink::new();
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i32>>);

        assert_eq!(sink.item_count(), 0);

        sink.request(2);
        assert_eq!(sink.items(), vec![1, 2]);
        assert!(!sink.is_completed());

        sink.request(3);
        assert_eq!(sink.items(), vec![1, 2, 3, 4, 5]);
        assert!(sink.is_completed());
        assert_eq!(sink.completions(), 1);
    }

    #[test]
    fn test_iter_replays_per_subscriber() {
        let source = IterSource::new(vec!["a", "b"]);

        let first = TestSink::with_request(UNBOUNDED);
        source.subscribe(Arc::clone(&first) as Arc<dyn Subscriber<&str>>);
        let second = TestSink::with_request(UNBOUNDED);
        source.subscribe(Arc::clone(&second) as Arc<dyn Subscriber<&str>>);

        assert_eq!(first.items(), vec!["a", "b"]);
        assert_eq!(second.items(), vec!["a", "b"]);
    }

    #[test]
    fn test_iter_empty_completes_immediately() {
        let source = IterSource::<i32>::new(vec![]);
        let sink = TestSink::new();
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i32>>);

        assert!(sink.is_completed());
        assert_eq!(sink.item_count(), 0);
    }

    #[test]
    fn test_iter_cancel_stops_delivery() {
        let source = IterSource::new(vec![1, 2, 3]);
        let sink = TestSink::new();
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i32>>);

        sink.request(1);
        sink.cancel();
        sink.request(10);

        assert_eq!(sink.items(), vec![1]);
        assert!(!sink.is_completed());
    }

    #[test]
    fn test_iter_zero_request_is_violation() {
        let source = IterSource::new(vec![1]);
        let sink = TestSink::new();
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i32>>);

        sink.request(0);
        assert_eq!(sink.errors(), vec![FlowError::InvalidDemand(0)]);
        assert_eq!(sink.item_count(), 0);

        // Terminal: the run will not resume.
        sink.request(5);
        assert_eq!(sink.item_count(), 0);
    }

    #[test]
    fn test_iter_reentrant_request() {
        // A sink that requests the next item from inside on_next. The wip
        // trampoline must keep this iterative.
        struct OneByOne {
            subscription: Mutex<Option<Arc<dyn Subscription>>>,
            seen: AtomicUsize,
            completed: AtomicUsize,
        }

        impl Subscriber<usize> for OneByOne {
            fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
                *self.subscription.lock() = Some(Arc::clone(&subscription));
                subscription.request(1);
            }

            fn on_next(&self, _item: usize) {
                self.seen.fetch_add(1, Ordering::SeqCst);
                let subscription = self.subscription.lock().clone();
                if let Some(s) = subscription {
                    s.request(1);
                }
            }

            fn on_complete(&self) {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }

            fn on_error(&self, _error: FlowError) {}
        }

        let n = 10_000;
        let source = IterSource::new((0..n).collect::<Vec<usize>>());
        let sink = Arc::new(OneByOne {
            subscription: Mutex::new(None),
            seen: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        });
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<usize>>);

        assert_eq!(sink.seen.load(Ordering::SeqCst), n);
        assert_eq!(sink.completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_just() {
        let source = IterSource::just(42);
        let sink = TestSink::with_request(UNBOUNDED);
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i32>>);
        assert_eq!(sink.items(), vec![42]);
        assert!(sink.is_completed());
    }

    // --- EmptySource tests ---

    #[test]
    fn test_empty_source() {
        let source = EmptySource::<String>::new();
        let sink = TestSink::new();
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<String>>);
        assert!(sink.is_completed());
        assert_eq!(sink.item_count(), 0);
    }

    // --- RangeSource tests ---

    #[test]
    fn test_range_emits_consecutive() {
        let source = RangeSource::new(5, 4).unwrap();
        let sink = TestSink::with_request(UNBOUNDED);
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i64>>);
        assert_eq!(sink.items(), vec![5i64, 6, 7, 8]);
        assert!(sink.is_completed());
    }

    #[test]
    fn test_range_zero_count_is_empty() {
        let source = RangeSource::new(100, 0).unwrap();
        let sink = TestSink::new();
        source.subscribe(Arc::clone(&sink) as Arc<dyn Subscriber<i64>>);
        assert!(sink.is_completed());
        assert_eq!(sink.item_count(), 0);
    }

    #[test]
    fn test_range_overflow_rejected() {
        assert!(RangeSource::new(i64::MAX, 2).is_err());
        assert!(RangeSource::new(i64::MAX, 1).is_ok());
    }
}
