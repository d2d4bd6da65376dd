//! Race-selection: N sources, first to signal wins.
//!
//! Each source is wrapped in an inner subscriber carrying its 1-based
//! index. The first signal of any kind (`on_next`, `on_complete`,
//! `on_error`) claims victory through a single CAS on the winner slot;
//! the winner becomes the sole forwarder to the downstream sink and every
//! other branch is cancelled at the moment the winner is decided.
//!
//! A losing branch that later receives an error has no sink to report to:
//! it escalates through [`fault::report_unrecoverable`], never a silent
//! drop.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use crate::fault;
use crate::flow::{
    subscribe_empty, validate_request, DeferredSubscription, FlowError, Source, Subscriber,
    Subscription,
};

const WINNER_UNSET: i32 = 0;
const WINNER_CANCELLED: i32 = -1;

// ---------------------------------------------------------------------------
// Race
// ---------------------------------------------------------------------------

/// Emits the signals of whichever source signals first.
///
/// Zero sources complete immediately; a single source is a direct
/// pass-through with no wrapping overhead.
pub struct Race<T> {
    sources: Vec<Arc<dyn Source<T>>>,
}

impl<T: Send + 'static> Race<T> {
    /// Creates a race over the given sources.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn Source<T>>>) -> Self {
        Self { sources }
    }

    /// Returns the number of competing sources.
    #[must_use]
    pub fn contenders(&self) -> usize {
        self.sources.len()
    }
}

impl<T: Send + 'static> Source<T> for Race<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        match self.sources.len() {
            0 => subscribe_empty(&subscriber),
            1 => self.sources[0].subscribe(subscriber),
            n => {
                let shared = Arc::new(RaceShared {
                    downstream: subscriber,
                    winner: AtomicI32::new(WINNER_UNSET),
                    branches: (0..n)
                        .map(|_| Arc::new(DeferredSubscription::new()))
                        .collect(),
                });

                shared
                    .downstream
                    .on_subscribe(Arc::new(RaceCoordinator {
                        shared: Arc::clone(&shared),
                    }));

                for (i, source) in self.sources.iter().enumerate() {
                    if shared.winner.load(Ordering::Acquire) != WINNER_UNSET {
                        return;
                    }
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    let inner = Arc::new(RaceInner {
                        shared: Arc::clone(&shared),
                        slot: Arc::clone(&shared.branches[i]),
                        index: i as i32 + 1,
                        won: AtomicBool::new(false),
                    });
                    source.subscribe(inner);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RaceShared
// ---------------------------------------------------------------------------

struct RaceShared<T> {
    downstream: Arc<dyn Subscriber<T>>,
    /// 0 = unset, > 0 = winning branch index, −1 = cancelled.
    winner: AtomicI32,
    branches: Vec<Arc<DeferredSubscription>>,
}

impl<T> RaceShared<T> {
    /// Attempts to claim victory for `index`; on success cancels every
    /// losing branch. Returns `true` if `index` is (now) the winner.
    fn win(&self, index: i32) -> bool {
        match self.winner.compare_exchange(
            WINNER_UNSET,
            index,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                for (i, branch) in self.branches.iter().enumerate() {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    if i as i32 + 1 != index {
                        branch.cancel();
                    }
                }
                true
            }
            Err(current) => current == index,
        }
    }
}

// ---------------------------------------------------------------------------
// RaceCoordinator — the downstream-facing subscription
// ---------------------------------------------------------------------------

struct RaceCoordinator<T> {
    shared: Arc<RaceShared<T>>,
}

impl<T: Send + 'static> Subscription for RaceCoordinator<T> {
    fn request(&self, n: u64) {
        if let Err(violation) = validate_request(n) {
            self.cancel();
            self.shared.downstream.on_error(violation);
            return;
        }

        let winner = self.shared.winner.load(Ordering::Acquire);
        if winner > 0 {
            #[allow(clippy::cast_sign_loss)]
            self.shared.branches[winner as usize - 1].request(n);
        } else if winner == WINNER_UNSET {
            // No winner yet: demand fans out to every contender.
            for branch in &self.shared.branches {
                branch.request(n);
            }
        }
    }

    fn cancel(&self) {
        if self.shared.winner.load(Ordering::Acquire) != WINNER_CANCELLED {
            self.shared.winner.store(WINNER_CANCELLED, Ordering::Release);
            for branch in &self.shared.branches {
                branch.cancel();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RaceInner — per-source subscriber
// ---------------------------------------------------------------------------

struct RaceInner<T> {
    shared: Arc<RaceShared<T>>,
    slot: Arc<DeferredSubscription>,
    index: i32,
    won: AtomicBool,
}

impl<T> RaceInner<T> {
    fn has_won(&self) -> bool {
        self.won.load(Ordering::Relaxed)
    }

    fn claim(&self) -> bool {
        if self.shared.win(self.index) {
            self.won.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for RaceInner<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        // A duplicate handshake or an already-cancelled branch is resolved
        // inside the slot.
        let _ = self.slot.set(subscription);
    }

    fn on_next(&self, item: T) {
        if self.has_won() || self.claim() {
            self.shared.downstream.on_next(item);
        } else {
            self.slot.cancel();
        }
    }

    fn on_complete(&self) {
        if self.has_won() || self.claim() {
            self.shared.downstream.on_complete();
        } else {
            self.slot.cancel();
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.has_won() || self.claim() {
            self.shared.downstream.on_error(error);
        } else {
            self.slot.cancel();
            fault::report_unrecoverable("race: error on losing branch", &error);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
