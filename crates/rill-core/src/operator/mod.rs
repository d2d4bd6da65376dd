//! # Combinator State Machines
//!
//! Operators built on the flow protocol. Each subscribes to one or more
//! upstream sources and re-emits downstream under the same demand
//! discipline:
//!
//! - [`Race`] — N sources, first to signal wins, losers cancelled
//! - [`Single`] — exactly-one-item extraction with default/empty policies
//! - [`Merge`] — N sources into one, first error wins
//! - [`SweepOperator`] / [`Window`] — windowed and sequence collection
//! - [`Recover`] — converts matching terminal errors into data
//! - [`Timeout`] — injects synthetic demand when no data flows
//!
//! This module also hosts the shared operator plumbing: the deferred-scalar
//! subscription (value and demand may arrive in either order) and the
//! demand-gated output queue.

mod merge;
mod race;
mod recover;
mod single;
mod timeout;
mod window;

pub use merge::{Merge, PostStage};
pub use race::Race;
pub use recover::Recover;
pub use single::{DefaultValue, Single};
pub use timeout::Timeout;
pub use window::{SweepOperator, SweepTrigger, Window};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::flow::{DemandChannel, FlowError, Subscriber, Subscription};

// ---------------------------------------------------------------------------
// DeferredScalar
// ---------------------------------------------------------------------------

const SCALAR_EMPTY: u8 = 0;
const SCALAR_HAS_VALUE: u8 = 1;
const SCALAR_HAS_REQUEST: u8 = 2;
const SCALAR_EMITTED: u8 = 3;
const SCALAR_CANCELLED: u8 = 4;

/// Subscription for operators that produce at most one value.
///
/// The value and the downstream's demand may arrive in either order; a CAS
/// state machine pairs them and emits `on_next` + `on_complete` exactly
/// once.
pub struct DeferredScalar<T> {
    state: AtomicU8,
    value: Mutex<Option<T>>,
    subscriber: Arc<dyn Subscriber<T>>,
}

impl<T> DeferredScalar<T> {
    /// Creates the state machine over a downstream sink.
    pub fn new(subscriber: Arc<dyn Subscriber<T>>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(SCALAR_EMPTY),
            value: Mutex::new(None),
            subscriber,
        })
    }

    /// Provides the value; emits immediately if demand already arrived.
    pub fn complete_with(&self, value: T) {
        *self.value.lock() = Some(value);
        loop {
            match self.state.load(Ordering::Acquire) {
                SCALAR_EMPTY => {
                    if self
                        .state
                        .compare_exchange(
                            SCALAR_EMPTY,
                            SCALAR_HAS_VALUE,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                SCALAR_HAS_REQUEST => {
                    if self
                        .state
                        .compare_exchange(
                            SCALAR_HAS_REQUEST,
                            SCALAR_EMITTED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.emit();
                        return;
                    }
                }
                _ => {
                    // Cancelled or already emitted: the value is dropped.
                    let _ = self.value.lock().take();
                    return;
                }
            }
        }
    }

    /// Returns `true` once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == SCALAR_CANCELLED
    }

    fn emit(&self) {
        if let Some(value) = self.value.lock().take() {
            self.subscriber.on_next(value);
            self.subscriber.on_complete();
        }
    }
}

impl<T: Send> Subscription for DeferredScalar<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            // A violation terminates the connection; the scalar will never
            // emit.
            if self.state.swap(SCALAR_CANCELLED, Ordering::AcqRel) != SCALAR_CANCELLED {
                let _ = self.value.lock().take();
                self.subscriber.on_error(FlowError::InvalidDemand(0));
            }
            return;
        }
        loop {
            match self.state.load(Ordering::Acquire) {
                SCALAR_EMPTY => {
                    if self
                        .state
                        .compare_exchange(
                            SCALAR_EMPTY,
                            SCALAR_HAS_REQUEST,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                SCALAR_HAS_VALUE => {
                    if self
                        .state
                        .compare_exchange(
                            SCALAR_HAS_VALUE,
                            SCALAR_EMITTED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.emit();
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn cancel(&self) {
        let previous = self.state.swap(SCALAR_CANCELLED, Ordering::AcqRel);
        if previous != SCALAR_CANCELLED {
            let _ = self.value.lock().take();
        }
    }
}

// ---------------------------------------------------------------------------
// OutputQueue
// ---------------------------------------------------------------------------

/// Demand-gated output buffer between an operator and its downstream sink.
///
/// Operators that produce units at their own pace (window flushes, merged
/// branches) enqueue here; a wip-serialized drain loop delivers one unit
/// per unit of downstream demand and forwards the terminal signal only
/// after the queue is empty.
pub(crate) struct OutputQueue<U> {
    subscriber: Arc<dyn Subscriber<U>>,
    queue: Mutex<VecDeque<U>>,
    channel: DemandChannel,
    wip: AtomicUsize,
    done: AtomicBool,
    error: Mutex<Option<FlowError>>,
}

impl<U> OutputQueue<U> {
    pub(crate) fn new(subscriber: Arc<dyn Subscriber<U>>) -> Self {
        Self {
            subscriber,
            queue: Mutex::new(VecDeque::new()),
            channel: DemandChannel::new(),
            wip: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    /// Enqueues one unit and drains what demand allows.
    pub(crate) fn push(&self, unit: U) {
        if self.channel.is_cancelled() || self.done.load(Ordering::Acquire) {
            return;
        }
        self.queue.lock().push_back(unit);
        self.drain();
    }

    /// Marks the upstream run complete; the terminal signal is forwarded
    /// once the queue empties.
    pub(crate) fn complete(&self) {
        self.done.store(true, Ordering::Release);
        self.drain();
    }

    /// Fails the queue. Errors are not demand-gated: pending units are
    /// discarded and the error propagates on the next drain step.
    pub(crate) fn error(&self, error: FlowError) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.done.store(true, Ordering::Release);
        self.drain();
    }

    /// Registers downstream demand.
    pub(crate) fn request(&self, n: u64) {
        match self.channel.request(n) {
            Ok(_) => self.drain(),
            Err(violation) => {
                if self.channel.try_error() {
                    self.queue.lock().clear();
                    self.subscriber.on_error(violation);
                }
            }
        }
    }

    /// Cancels delivery and discards pending units.
    pub(crate) fn cancel(&self) {
        self.channel.cancel();
        self.queue.lock().clear();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.channel.is_cancelled()
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            loop {
                if self.channel.is_cancelled() || self.channel.is_terminated() {
                    break;
                }
                let unit = {
                    let mut queue = self.queue.lock();
                    if queue.is_empty() {
                        None
                    } else if self.channel.try_consume() {
                        queue.pop_front()
                    } else {
                        None
                    }
                };
                match unit {
                    Some(unit) => self.subscriber.on_next(unit),
                    None => break,
                }
            }

            if self.done.load(Ordering::Acquire) {
                let error = self.error.lock().clone();
                match error {
                    Some(e) => {
                        if self.channel.try_error() {
                            self.queue.lock().clear();
                            self.subscriber.on_error(e);
                        }
                    }
                    None => {
                        if self.queue.lock().is_empty() && self.channel.try_complete() {
                            self.subscriber.on_complete();
                        }
                    }
                }
            }

            let remaining = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if remaining == 0 {
                break;
            }
            missed = remaining;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
