//! Manual emission sessions.
//!
//! An [`EmitterSession`] wraps a sink and gives the producing side explicit,
//! synchronous outcomes for every emission attempt instead of panics or
//! silent drops. The session is also the [`Subscription`] handed to the
//! sink, so demand requested by the sink is the demand consumed by `emit`.
//!
//! Blocking is confined to [`EmitterSession::submit`] and
//! [`EmitterSession::accept`]; everything else returns immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::flow::demand::{validate_request, Demand};
use crate::flow::subscription::{Subscriber, Subscription};
use crate::flow::{FlowError, SessionError};

/// Sleep between blocking `submit` retries.
const SUBMIT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// Outcome of a single emission attempt.
///
/// A closed set of classifications; backpressure and drops are ordinary
/// outcomes the caller handles by retrying, buffering, or dropping — they
/// are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// The item was delivered to the sink.
    Ok,
    /// No demand was available; the caller should retry or wait.
    Backpressured,
    /// The item was abandoned by policy (blocking submit past its deadline).
    Dropped,
    /// The sink has failed; emissions are refused until the session ends.
    Failed,
    /// The session was cancelled; nothing will be delivered again.
    Cancelled,
}

impl Emission {
    /// Returns `true` for [`Emission::Ok`].
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Returns `true` for [`Emission::Backpressured`].
    #[must_use]
    pub fn is_backpressured(self) -> bool {
        self == Self::Backpressured
    }

    /// Returns `true` for [`Emission::Dropped`].
    #[must_use]
    pub fn is_dropped(self) -> bool {
        self == Self::Dropped
    }

    /// Returns `true` for [`Emission::Failed`].
    #[must_use]
    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }

    /// Returns `true` for [`Emission::Cancelled`].
    #[must_use]
    pub fn is_cancelled(self) -> bool {
        self == Self::Cancelled
    }
}

// ---------------------------------------------------------------------------
// EmitterSession
// ---------------------------------------------------------------------------

/// A manual emission session over a sink.
///
/// Created with [`EmitterSession::create`], which performs the
/// `on_subscribe` handshake so the sink can start requesting demand
/// immediately.
///
/// Once failed or cancelled, the session refuses all further emission
/// attempts with the corresponding [`Emission`] outcome rather than
/// re-attempting delivery.
pub struct EmitterSession<T> {
    sink: Arc<dyn Subscriber<T>>,
    demand: Demand,
    cancelled: AtomicBool,
    failed: AtomicBool,
    failure: Mutex<Option<FlowError>>,
}

impl<T: 'static> EmitterSession<T> {
    /// Creates a session and immediately performs the `on_subscribe`
    /// handshake with the sink.
    pub fn create(sink: Arc<dyn Subscriber<T>>) -> Arc<Self> {
        let session = Self::create_unstarted(sink);
        session.start();
        session
    }

    /// Creates a session without the handshake; callers must invoke
    /// [`start`](Self::start) before emitting.
    pub fn create_unstarted(sink: Arc<dyn Subscriber<T>>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            demand: Demand::new(),
            cancelled: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
        })
    }

    /// Performs the `on_subscribe` handshake, handing this session to the
    /// sink as its [`Subscription`].
    pub fn start(self: &Arc<Self>) {
        let subscription: Arc<dyn Subscription> = Arc::clone(self) as _;
        self.sink.on_subscribe(subscription);
    }

    /// Attempts to deliver one item.
    ///
    /// Consumes one unit of demand on success. Whatever the outcome, the
    /// item is consumed; callers that need to retry the same item use
    /// [`submit`](Self::submit) or [`accept`](Self::accept), which clone
    /// per attempt.
    pub fn emit(&self, item: T) -> Emission {
        if self.cancelled.load(Ordering::Acquire) {
            return Emission::Cancelled;
        }
        if self.failed.load(Ordering::Acquire) {
            return Emission::Failed;
        }
        if !self.demand.try_consume() {
            return Emission::Backpressured;
        }
        self.sink.on_next(item);
        Emission::Ok
    }

    /// Delivers the terminal error signal.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyFailed`] if the session has already
    /// delivered its terminal error — a programmer error, distinct from the
    /// data error being signalled.
    pub fn fail_with(&self, error: FlowError) -> Result<(), SessionError> {
        if self.failed.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyFailed);
        }
        *self.failure.lock() = Some(error.clone());
        self.sink.on_error(error);
        Ok(())
    }

    /// Delivers the terminal completion signal and closes the session.
    pub fn finish(&self) -> Emission {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return Emission::Cancelled;
        }
        if self.failed.load(Ordering::Acquire) {
            return Emission::Failed;
        }
        self.sink.on_complete();
        Emission::Ok
    }

    /// Blocking emission with retry.
    ///
    /// Retries [`emit`](Self::emit) with short cooperative sleeps while the
    /// outcome is [`Emission::Backpressured`]. When the deadline elapses,
    /// `keep_predicate` decides the item's fate: `true` extends the deadline
    /// by one more `timeout` span, `false` abandons the item with
    /// [`Emission::Dropped`]. A `timeout` of `None` retries indefinitely.
    ///
    /// # Errors
    ///
    /// Returns the non-`Ok` outcome that ended the attempt.
    pub fn submit(
        &self,
        item: &T,
        timeout: Option<Duration>,
        keep_predicate: impl Fn(&T) -> bool,
    ) -> Result<Duration, Emission>
    where
        T: Clone,
    {
        let start = Instant::now();
        let mut deadline = timeout.map(|t| start + t);

        loop {
            match self.emit(item.clone()) {
                Emission::Ok => return Ok(start.elapsed()),
                Emission::Backpressured => {
                    if let (Some(d), Some(t)) = (deadline, timeout) {
                        if Instant::now() > d {
                            if keep_predicate(item) {
                                deadline = Some(d + t);
                            } else {
                                return Err(Emission::Dropped);
                            }
                        }
                    }
                    std::thread::sleep(SUBMIT_RETRY_INTERVAL);
                }
                outcome => return Err(outcome),
            }
        }
    }

    /// Busy-waits until the item is delivered or the session ends.
    ///
    /// Returns the outcome that ended the wait (never
    /// [`Emission::Backpressured`]).
    pub fn accept(&self, item: &T) -> Emission
    where
        T: Clone,
    {
        loop {
            let outcome = self.emit(item.clone());
            if !outcome.is_backpressured() {
                return outcome;
            }
            std::thread::yield_now();
        }
    }

    /// Returns `true` while the sink has outstanding demand.
    #[must_use]
    pub fn has_requested(&self) -> bool {
        self.demand.current() != 0
    }

    /// Returns `true` once the session has delivered its terminal error.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Returns `true` once the session has been cancelled or finished.
    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns the terminal error, if one was delivered.
    #[must_use]
    pub fn error(&self) -> Option<FlowError> {
        self.failure.lock().clone()
    }
}

impl<T: 'static> Subscription for EmitterSession<T> {
    fn request(&self, n: u64) {
        match validate_request(n) {
            Ok(()) => {
                self.demand.add(n);
            }
            Err(violation) => {
                // Protocol violations surface to the sink as a terminal
                // error, never as a panic across threads.
                let _ = self.fail_with(violation);
            }
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
