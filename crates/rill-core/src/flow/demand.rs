//! Atomic demand accounting.
//!
//! A demand counter tracks how many items a sink has authorized a source to
//! deliver. Addition saturates at [`UNBOUNDED`] (which then behaves as an
//! absorbing "no limit" state); consumption decrements by exactly one per
//! delivered item and never goes below zero.
//!
//! # Thread Safety
//!
//! The counter is an `AtomicU64` shared between the emitting side (which
//! decrements via [`Demand::try_consume`]) and the requesting side (which
//! increments via [`Demand::add`]). CAS loops keep both directions correct
//! under concurrent access.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crate::flow::FlowError;

/// Demand value representing "unbounded": adding to it leaves it unchanged
/// and consuming from it never decrements.
pub const UNBOUNDED: u64 = u64::MAX;

/// Validates a `request(n)` amount.
///
/// # Errors
///
/// Returns [`FlowError::InvalidDemand`] when `n` is zero. Demand is unsigned,
/// so the negative-request violation of the protocol collapses into this
/// case.
pub fn validate_request(n: u64) -> Result<(), FlowError> {
    if n == 0 {
        return Err(FlowError::InvalidDemand(n));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Demand
// ---------------------------------------------------------------------------

/// Saturating atomic demand accumulator.
#[derive(Debug, Default)]
pub struct Demand(AtomicU64);

impl Demand {
    /// Creates a counter with zero pending demand.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Adds `n` to the pending demand, saturating at [`UNBOUNDED`].
    ///
    /// Returns the previous value, so callers can detect the 0 → n
    /// transition that should kick off a drain loop.
    pub fn add(&self, n: u64) -> u64 {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current == UNBOUNDED {
                return current;
            }
            let next = current.saturating_add(n);
            if self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return current;
            }
        }
    }

    /// Attempts to consume one unit of demand.
    ///
    /// Returns `true` if demand was available. An [`UNBOUNDED`] counter is
    /// never decremented.
    #[inline]
    #[must_use]
    pub fn try_consume(&self) -> bool {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current == 0 {
                return false;
            }
            if current == UNBOUNDED {
                return true;
            }
            if self
                .0
                .compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Atomically takes the whole pending amount, leaving zero.
    ///
    /// Used to flush demand that accumulated before an upstream subscription
    /// arrived.
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::AcqRel)
    }

    /// Returns the current pending demand.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `true` if the counter is saturated at [`UNBOUNDED`].
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.current() == UNBOUNDED
    }
}

// ---------------------------------------------------------------------------
// TerminalGate
// ---------------------------------------------------------------------------

const GATE_OPEN: u8 = 0;
const GATE_COMPLETED: u8 = 1;
const GATE_ERRORED: u8 = 2;

/// Ensures at most one terminal signal is ever forwarded on a channel.
///
/// Exactly one of `try_complete` / `try_error` will ever return `true`; the
/// winner is decided by a single CAS from the open state.
#[derive(Debug, Default)]
pub struct TerminalGate(AtomicU8);

impl TerminalGate {
    /// Creates an open gate.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(GATE_OPEN))
    }

    /// Attempts to claim the completion signal.
    pub fn try_complete(&self) -> bool {
        self.0
            .compare_exchange(GATE_OPEN, GATE_COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attempts to claim the error signal.
    pub fn try_error(&self) -> bool {
        self.0
            .compare_exchange(GATE_OPEN, GATE_ERRORED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` once either terminal signal has been claimed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.0.load(Ordering::Acquire) != GATE_OPEN
    }

    /// Returns `true` if the gate was closed by completion.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.0.load(Ordering::Acquire) == GATE_COMPLETED
    }

    /// Returns `true` if the gate was closed by an error.
    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.0.load(Ordering::Acquire) == GATE_ERRORED
    }
}

// ---------------------------------------------------------------------------
// DemandChannel
// ---------------------------------------------------------------------------

/// Per-connection demand state: pending demand, a monotonic cancelled flag,
/// and the terminal gate.
///
/// The invariant enforced here is the heart of the protocol: no item is ever
/// delivered when accumulated demand is zero, and demand is decremented by
/// exactly one per delivered item.
#[derive(Debug, Default)]
pub struct DemandChannel {
    demand: Demand,
    cancelled: AtomicBool,
    gate: TerminalGate,
}

impl DemandChannel {
    /// Creates a channel with zero demand, not cancelled, gate open.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            demand: Demand::new(),
            cancelled: AtomicBool::new(false),
            gate: TerminalGate::new(),
        }
    }

    /// Validates and registers a demand request.
    ///
    /// Returns the previous pending amount on success.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidDemand`] for a zero request; the caller
    /// is responsible for reporting it to the sink as a terminal error.
    pub fn request(&self, n: u64) -> Result<u64, FlowError> {
        validate_request(n)?;
        Ok(self.demand.add(n))
    }

    /// Attempts to consume one unit of demand for an emission.
    ///
    /// Returns `false` when cancelled, terminated, or out of demand.
    #[inline]
    #[must_use]
    pub fn try_consume(&self) -> bool {
        if self.is_cancelled() || self.gate.is_terminated() {
            return false;
        }
        self.demand.try_consume()
    }

    /// Marks the channel cancelled. Idempotent; returns `true` on the
    /// first transition.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` once the channel has been cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Attempts to claim the completion signal. Always `false` after
    /// cancellation: terminal signals to a cancelled sink are no-ops.
    pub fn try_complete(&self) -> bool {
        !self.is_cancelled() && self.gate.try_complete()
    }

    /// Attempts to claim the error signal. Always `false` after
    /// cancellation.
    pub fn try_error(&self) -> bool {
        !self.is_cancelled() && self.gate.try_error()
    }

    /// Returns `true` once either terminal signal has been claimed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.gate.is_terminated()
    }

    /// Returns the pending demand counter.
    #[must_use]
    pub fn demand(&self) -> &Demand {
        &self.demand
    }
}

// ===========================================================================
// Tests
// ===========================================================================
