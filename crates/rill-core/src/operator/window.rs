//! Windowed and sequence collection.
//!
//! One state machine covers the whole family: items accumulate into a
//! buffer, and a per-item [`SweepTrigger`] decides whether the buffer is
//! flushed ("swept") now or the item is simply appended. Variants differ
//! only in configuration:
//!
//! - **flush policy** — fixed count, time-based (periodic sweep task),
//!   while/until a predicate, distinct by identity or derived key;
//! - **flushed unit** — a reusable live [`Window`] (itself a source) or a
//!   frozen `Vec<T>` sequence.
//!
//! Count triggers flush *with* the triggering item included; predicate
//! triggers flush the pending buffer *before* appending it. Completion
//! always force-flushes a non-empty partial buffer before forwarding
//! completion downstream.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::dispatch::{Pausable, TimerHandle, TimerService};
use crate::flow::{
    DeferredSubscription, FlowError, Source, Subscriber, Subscription, UNBOUNDED,
};
use crate::operator::OutputQueue;
use crate::source::subscribe_slice;

type PredFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type TriggerFn<T> = Arc<dyn Fn() -> SweepTrigger<T> + Send + Sync>;
type UnitFn<T, U> = Arc<dyn Fn(Vec<T>) -> U + Send + Sync>;
type OpenHook = Arc<dyn Fn() + Send + Sync>;
type FlushHook = Arc<dyn Fn(usize) + Send + Sync>;

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// An ordered, mutable, finite sequence flushed from an accumulation
/// buffer.
///
/// Fully owned by the operator that created it until handed downstream;
/// after that the downstream owns it and may mutate it. A window is itself
/// a [`Source`]: subscribing replays a snapshot of its items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window<T> {
    values: Vec<T>,
}

impl<T> Window<T> {
    /// Creates a window over the given items.
    #[must_use]
    pub fn new(values: Vec<T>) -> Self {
        Self { values }
    }

    /// Appends an item.
    pub fn push(&mut self, item: T) {
        self.values.push(item);
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the window holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the items in order.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.values
    }

    /// Consumes the window, returning its items.
    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.values
    }
}

impl<T> From<Vec<T>> for Window<T> {
    fn from(values: Vec<T>) -> Self {
        Self::new(values)
    }
}

impl<T: Clone + Send + Sync + 'static> Source<T> for Window<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        subscribe_slice(Arc::from(self.values.clone()), subscriber);
    }
}

// ---------------------------------------------------------------------------
// SweepTrigger
// ---------------------------------------------------------------------------

/// Per-item flush decision strategy.
///
/// Triggers carrying state (the distinct family) are built per
/// subscription through a factory, so one operator can serve many
/// subscribers without sharing trigger state.
pub enum SweepTrigger<T> {
    /// Flush every `n` items, the `n`-th included.
    Count(usize),
    /// Flush (before appending) when the predicate stops holding.
    While(PredFn<T>),
    /// Flush (before appending) when the predicate starts holding.
    Until(PredFn<T>),
    /// Never flush on items; only time sweeps and completion flush.
    Never,
}

impl<T> SweepTrigger<T> {
    /// Flush while `predicate` holds; the first failing item starts the
    /// next buffer.
    pub fn while_true(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self::While(Arc::new(predicate))
    }

    /// Flush when `predicate` first holds; the matching item starts the
    /// next buffer.
    pub fn until(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self::Until(Arc::new(predicate))
    }

    /// Flush whenever an item differs from its predecessor, grouping
    /// consecutive equal items.
    #[must_use]
    pub fn distinct() -> Self
    where
        T: PartialEq + Clone + Send + 'static,
    {
        let last: Mutex<Option<T>> = Mutex::new(None);
        Self::Until(Arc::new(move |item| {
            let mut last = last.lock();
            let changed = last.as_ref().is_some_and(|previous| previous != item);
            *last = Some(item.clone());
            changed
        }))
    }

    /// Flush whenever the derived key changes between consecutive items.
    pub fn distinct_by<Q>(key_fn: impl Fn(&T) -> Q + Send + Sync + 'static) -> Self
    where
        Q: PartialEq + Send + 'static,
    {
        let last: Mutex<Option<Q>> = Mutex::new(None);
        Self::Until(Arc::new(move |item| {
            let key = key_fn(item);
            let mut last = last.lock();
            let changed = last.as_ref().is_some_and(|previous| *previous != key);
            *last = Some(key);
            changed
        }))
    }
}

impl<T> Clone for SweepTrigger<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Count(n) => Self::Count(*n),
            Self::While(p) => Self::While(Arc::clone(p)),
            Self::Until(p) => Self::Until(Arc::clone(p)),
            Self::Never => Self::Never,
        }
    }
}

// ---------------------------------------------------------------------------
// SweepState — the accumulation buffer
// ---------------------------------------------------------------------------

struct SweepState<T> {
    buffer: Mutex<Vec<T>>,
    trigger: SweepTrigger<T>,
}

impl<T> SweepState<T> {
    fn new(trigger: SweepTrigger<T>) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            trigger,
        }
    }

    /// Accepts one item. Returns `(flushed_batch, buffer_was_opened)`.
    fn offer(&self, item: T) -> (Option<Vec<T>>, bool) {
        match &self.trigger {
            SweepTrigger::Count(n) => {
                let mut buffer = self.buffer.lock();
                let opened = buffer.is_empty();
                buffer.push(item);
                if buffer.len() >= *n {
                    (Some(std::mem::take(&mut *buffer)), opened)
                } else {
                    (None, opened)
                }
            }
            SweepTrigger::While(predicate) => {
                let fire = !predicate(&item);
                self.append_after(fire, item)
            }
            SweepTrigger::Until(predicate) => {
                let fire = predicate(&item);
                self.append_after(fire, item)
            }
            SweepTrigger::Never => {
                let mut buffer = self.buffer.lock();
                let opened = buffer.is_empty();
                buffer.push(item);
                (None, opened)
            }
        }
    }

    fn append_after(&self, fire: bool, item: T) -> (Option<Vec<T>>, bool) {
        let mut buffer = self.buffer.lock();
        let flushed = if fire && !buffer.is_empty() {
            Some(std::mem::take(&mut *buffer))
        } else {
            None
        };
        let opened = buffer.is_empty();
        buffer.push(item);
        (flushed, opened)
    }

    /// Force-flushes the buffer; an empty buffer is a no-op.
    fn flush(&self) -> Option<Vec<T>> {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *buffer))
        }
    }
}

// ---------------------------------------------------------------------------
// SweepOperator
// ---------------------------------------------------------------------------

/// The generic windowing/sequence operator.
///
/// Parameterized by a trigger factory, the flush-unit constructor, and an
/// optional periodic time sweep. `SweepOperator<T, Window<T>>` is the
/// window flavor; `SweepOperator<T, Vec<T>>` the frozen-sequence flavor.
pub struct SweepOperator<T, U> {
    source: Arc<dyn Source<T>>,
    trigger: TriggerFn<T>,
    make_unit: UnitFn<T, U>,
    sweep_every: Option<(Arc<TimerService>, Duration)>,
    on_open: Option<OpenHook>,
    on_flush: Option<FlushHook>,
}

impl<T: Clone + Send + Sync + 'static> SweepOperator<T, Window<T>> {
    /// Windows by an arbitrary trigger factory.
    pub fn window(
        source: Arc<dyn Source<T>>,
        trigger: impl Fn() -> SweepTrigger<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            trigger: Arc::new(trigger),
            make_unit: Arc::new(Window::new),
            sweep_every: None,
            on_open: None,
            on_flush: None,
        }
    }

    /// Windows of a fixed item count.
    pub fn window_count(source: Arc<dyn Source<T>>, count: usize) -> Self {
        Self::window(source, move || SweepTrigger::Count(count))
    }

    /// Windows flushed only by periodic time sweeps and completion.
    pub fn window_timed(
        source: Arc<dyn Source<T>>,
        timer: Arc<TimerService>,
        period: Duration,
    ) -> Self {
        Self::window(source, || SweepTrigger::Never).with_timed_sweep(timer, period)
    }
}

impl<T: Send + Sync + 'static> SweepOperator<T, Vec<T>> {
    /// Frozen sequences by an arbitrary trigger factory.
    pub fn sequence(
        source: Arc<dyn Source<T>>,
        trigger: impl Fn() -> SweepTrigger<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            trigger: Arc::new(trigger),
            make_unit: Arc::new(|batch| batch),
            sweep_every: None,
            on_open: None,
            on_flush: None,
        }
    }

    /// Sequences of a fixed item count.
    pub fn sequence_count(source: Arc<dyn Source<T>>, count: usize) -> Self {
        Self::sequence(source, move || SweepTrigger::Count(count))
    }

    /// Sequences accumulated while `predicate` holds.
    pub fn sequence_while(
        source: Arc<dyn Source<T>>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        let predicate: PredFn<T> = Arc::new(predicate);
        Self::sequence(source, move || {
            SweepTrigger::While(Arc::clone(&predicate))
        })
    }

    /// Sequences flushed when `predicate` first holds.
    pub fn sequence_until(
        source: Arc<dyn Source<T>>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        let predicate: PredFn<T> = Arc::new(predicate);
        Self::sequence(source, move || {
            SweepTrigger::Until(Arc::clone(&predicate))
        })
    }

    /// Sequences of consecutive equal items.
    pub fn sequence_distinct(source: Arc<dyn Source<T>>) -> Self
    where
        T: PartialEq + Clone,
    {
        Self::sequence(source, SweepTrigger::distinct)
    }

    /// Sequences of consecutive items sharing a derived key.
    pub fn sequence_distinct_by<Q>(
        source: Arc<dyn Source<T>>,
        key_fn: impl Fn(&T) -> Q + Send + Sync + Clone + 'static,
    ) -> Self
    where
        Q: PartialEq + Send + 'static,
    {
        Self::sequence(source, move || SweepTrigger::distinct_by(key_fn.clone()))
    }

    /// One sequence holding the whole upstream run, emitted at completion.
    pub fn collect_all(source: Arc<dyn Source<T>>) -> Self {
        Self::sequence(source, || SweepTrigger::Never)
    }
}

impl<T, U> SweepOperator<T, U> {
    /// Adds a periodic sweep flushing whatever accumulated since the last
    /// flush. The sweep task is cancelled with the operator.
    #[must_use]
    pub fn with_timed_sweep(mut self, timer: Arc<TimerService>, period: Duration) -> Self {
        self.sweep_every = Some((timer, period));
        self
    }

    /// Hook invoked when the buffer transitions from empty to non-empty.
    #[must_use]
    pub fn with_open_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }

    /// Hook invoked with the size of every flushed unit.
    #[must_use]
    pub fn with_flush_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_flush = Some(Arc::new(hook));
        self
    }
}

impl<T: Send + 'static, U: Send + 'static> Source<U> for SweepOperator<T, U> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) {
        let core = Arc::new(SweepCore {
            out: OutputQueue::new(subscriber.clone()),
            state: SweepState::new((self.trigger)()),
            make_unit: Arc::clone(&self.make_unit),
            upstream: Arc::new(DeferredSubscription::new()),
            sweep_task: Mutex::new(None),
            on_open: self.on_open.clone(),
            on_flush: self.on_flush.clone(),
        });

        subscriber.on_subscribe(Arc::new(SweepSubscription {
            core: Arc::clone(&core),
        }));

        if let Some((timer, period)) = &self.sweep_every {
            let sweeper = Arc::clone(&core);
            let handle = timer.schedule(move || sweeper.sweep(), *period, *period);
            *core.sweep_task.lock() = Some(handle);
        }

        self.source.subscribe(Arc::new(SweepUpstream { core }));
    }
}

// ---------------------------------------------------------------------------
// SweepCore
// ---------------------------------------------------------------------------

struct SweepCore<T, U> {
    out: OutputQueue<U>,
    state: SweepState<T>,
    make_unit: UnitFn<T, U>,
    upstream: Arc<DeferredSubscription>,
    sweep_task: Mutex<Option<TimerHandle>>,
    on_open: Option<OpenHook>,
    on_flush: Option<FlushHook>,
}

impl<T: Send + 'static, U: Send + 'static> SweepCore<T, U> {
    fn on_item(&self, item: T) {
        if self.out.is_cancelled() {
            return;
        }
        let (flushed, opened) = self.state.offer(item);
        if opened {
            if let Some(hook) = &self.on_open {
                hook();
            }
        }
        if let Some(batch) = flushed {
            self.deliver(batch);
        }
    }

    fn sweep(&self) {
        if let Some(batch) = self.state.flush() {
            self.deliver(batch);
        }
    }

    fn deliver(&self, batch: Vec<T>) {
        if let Some(hook) = &self.on_flush {
            hook(batch.len());
        }
        self.out.push((self.make_unit)(batch));
    }

    fn finish(&self) {
        self.cancel_sweep_task();
        self.sweep();
        self.out.complete();
    }

    fn fail(&self, error: FlowError) {
        self.cancel_sweep_task();
        // The partial buffer dies with the stream.
        let _ = self.state.flush();
        self.out.error(error);
    }

    fn cancel(&self) {
        self.cancel_sweep_task();
        self.upstream.cancel();
        self.out.cancel();
    }

    fn cancel_sweep_task(&self) {
        if let Some(handle) = self.sweep_task.lock().take() {
            handle.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// SweepSubscription / SweepUpstream
// ---------------------------------------------------------------------------

struct SweepSubscription<T, U> {
    core: Arc<SweepCore<T, U>>,
}

impl<T: Send + 'static, U: Send + 'static> Subscription for SweepSubscription<T, U> {
    fn request(&self, n: u64) {
        self.core.out.request(n);
    }

    fn cancel(&self) {
        self.core.cancel();
    }
}

struct SweepUpstream<T, U> {
    core: Arc<SweepCore<T, U>>,
}

impl<T: Send + 'static, U: Send + 'static> Subscriber<T> for SweepUpstream<T, U> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.core.upstream.set(subscription) {
            // Accumulating operator: prefetch the whole upstream run; the
            // output queue gates what actually reaches the downstream.
            self.core.upstream.request(UNBOUNDED);
        }
    }

    fn on_next(&self, item: T) {
        self.core.on_item(item);
    }

    fn on_complete(&self) {
        self.core.finish();
    }

    fn on_error(&self, error: FlowError) {
        self.core.fail(error);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
