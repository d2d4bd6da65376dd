//! Merge: N sources into one stream.
//!
//! An active-branch count starts at the number of input sources (plus one
//! when a post-processing stage is attached); each branch completion
//! decrements it and global completion fires exactly once when it reaches
//! zero. The first branch error wins the terminal gate and terminates the
//! whole merge; later branch activity is inert. Branches may be added
//! dynamically after construction.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::flow::{
    validate_request, DeferredSubscription, Demand, EmptySubscription, FlowError, Source,
    Subscriber, Subscription, TerminalGate,
};

// ---------------------------------------------------------------------------
// PostStage
// ---------------------------------------------------------------------------

/// Optional post-processing stage holding the extra active-branch slot.
///
/// Every merged item passes through `transform` on its way downstream; the
/// stage is finalized (its finish hook runs) when the last upstream branch
/// completes, after which the final decrement fires downstream completion.
pub struct PostStage<T> {
    transform: Arc<dyn Fn(T) -> T + Send + Sync>,
    finish: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl<T> PostStage<T> {
    /// Creates a stage from a transform.
    pub fn new(transform: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        Self {
            transform: Arc::new(transform),
            finish: None,
        }
    }

    /// Adds a finish hook, run once when the last branch completes.
    #[must_use]
    pub fn with_finish(mut self, finish: impl Fn() + Send + Sync + 'static) -> Self {
        self.finish = Some(Arc::new(finish));
        self
    }
}

impl<T> Clone for PostStage<T> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
            finish: self.finish.as_ref().map(Arc::clone),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merges N sources into one downstream stream.
///
/// A live, single-subscriber operator: sources added before `subscribe`
/// are held pending; sources added afterwards join the running merge with
/// the active count incremented first.
pub struct Merge<T> {
    pending: Mutex<Vec<Arc<dyn Source<T>>>>,
    stage: Option<PostStage<T>>,
    session: OnceLock<Arc<MergeShared<T>>>,
}

impl<T: Send + 'static> Merge<T> {
    /// Creates a merge over the given sources.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn Source<T>>>) -> Self {
        Self {
            pending: Mutex::new(sources),
            stage: None,
            session: OnceLock::new(),
        }
    }

    /// Creates a merge whose items pass through a post-processing stage.
    #[must_use]
    pub fn with_post_stage(sources: Vec<Arc<dyn Source<T>>>, stage: PostStage<T>) -> Self {
        Self {
            pending: Mutex::new(sources),
            stage: Some(stage),
            session: OnceLock::new(),
        }
    }

    /// Adds a source.
    ///
    /// Before `subscribe` the source is queued; afterwards it joins the
    /// running merge immediately. Adding a branch to a merge that already
    /// terminated is inert.
    pub fn add_source(&self, source: Arc<dyn Source<T>>) {
        if let Some(shared) = self.session.get() {
            shared.add_branch(source);
        } else {
            self.pending.lock().push(source);
        }
    }
}

impl<T: Send + 'static> Source<T> for Merge<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let sources: Vec<Arc<dyn Source<T>>> = std::mem::take(&mut *self.pending.lock());
        let stage_slots = usize::from(self.stage.is_some());

        let shared = Arc::new(MergeShared {
            downstream: subscriber,
            active: AtomicUsize::new(sources.len() + stage_slots),
            gate: TerminalGate::new(),
            cancelled: AtomicBool::new(false),
            branches: Mutex::new(Vec::new()),
            requested: Demand::new(),
            stage: self.stage.clone(),
        });

        if self.session.set(Arc::clone(&shared)).is_err() {
            shared.downstream.on_subscribe(Arc::new(EmptySubscription));
            shared
                .downstream
                .on_error(FlowError::message("merge supports a single subscriber"));
            return;
        }

        shared.downstream.on_subscribe(Arc::new(MergeSubscription {
            shared: Arc::clone(&shared),
        }));

        if sources.is_empty() {
            // Nothing to wait for: an empty merge completes immediately,
            // finalizing and releasing the stage slot if one exists.
            if self.stage.is_some() {
                shared.finalize_stage();
                shared.active.fetch_sub(1, Ordering::AcqRel);
            }
            if shared.active.load(Ordering::Acquire) == 0 && shared.gate.try_complete() {
                shared.downstream.on_complete();
            }
            return;
        }

        for source in sources {
            shared.subscribe_branch(&source);
        }
    }
}

// ---------------------------------------------------------------------------
// MergeShared
// ---------------------------------------------------------------------------

struct MergeShared<T> {
    downstream: Arc<dyn Subscriber<T>>,
    active: AtomicUsize,
    gate: TerminalGate,
    cancelled: AtomicBool,
    branches: Mutex<Vec<Arc<DeferredSubscription>>>,
    /// Total downstream demand, replayed to branches that attach late.
    requested: Demand,
    stage: Option<PostStage<T>>,
}

impl<T: Send + 'static> MergeShared<T> {
    fn subscribe_branch(self: &Arc<Self>, source: &Arc<dyn Source<T>>) {
        let slot = Arc::new(DeferredSubscription::new());
        self.branches.lock().push(Arc::clone(&slot));
        let pending = self.requested.current();
        if pending > 0 {
            slot.request(pending);
        }
        source.subscribe(Arc::new(MergeBranch {
            shared: Arc::clone(self),
            slot,
        }));
    }

    fn add_branch(self: &Arc<Self>, source: Arc<dyn Source<T>>) {
        if self.gate.is_terminated() || self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.active.fetch_add(1, Ordering::AcqRel);
        self.subscribe_branch(&source);
    }

    fn is_inert(&self) -> bool {
        self.gate.is_terminated() || self.cancelled.load(Ordering::Acquire)
    }

    fn branch_next(&self, item: T) {
        if self.is_inert() {
            return;
        }
        let item = match &self.stage {
            Some(stage) => (stage.transform)(item),
            None => item,
        };
        self.downstream.on_next(item);
    }

    fn branch_complete(&self) {
        let previous = self.active.fetch_sub(1, Ordering::AcqRel);
        if previous == 2 && self.stage.is_some() {
            // Last upstream branch done: finalize the stage, then release
            // its slot.
            self.finalize_stage();
            if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.complete_downstream();
            }
        } else if previous == 1 {
            self.complete_downstream();
        }
    }

    fn finalize_stage(&self) {
        if let Some(PostStage {
            finish: Some(finish),
            ..
        }) = &self.stage
        {
            finish();
        }
    }

    fn complete_downstream(&self) {
        if !self.cancelled.load(Ordering::Acquire) && self.gate.try_complete() {
            self.downstream.on_complete();
        }
    }

    fn branch_error(&self, error: FlowError) {
        // First error wins; everything after is inert.
        if self.gate.try_error() {
            self.cancel_branches();
            self.downstream.on_error(error);
        }
    }

    fn cancel_branches(&self) {
        let branches = self.branches.lock().clone();
        for branch in branches {
            branch.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// MergeSubscription — downstream-facing
// ---------------------------------------------------------------------------

struct MergeSubscription<T> {
    shared: Arc<MergeShared<T>>,
}

impl<T: Send + 'static> Subscription for MergeSubscription<T> {
    fn request(&self, n: u64) {
        if let Err(violation) = validate_request(n) {
            self.cancel();
            self.shared.downstream.on_error(violation);
            return;
        }
        self.shared.requested.add(n);
        let branches = self.shared.branches.lock().clone();
        for branch in branches {
            branch.request(n);
        }
    }

    fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.cancel_branches();
    }
}

// ---------------------------------------------------------------------------
// MergeBranch — per-source subscriber
// ---------------------------------------------------------------------------

struct MergeBranch<T> {
    shared: Arc<MergeShared<T>>,
    slot: Arc<DeferredSubscription>,
}

impl<T: Send + 'static> Subscriber<T> for MergeBranch<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let _ = self.slot.set(subscription);
    }

    fn on_next(&self, item: T) {
        self.shared.branch_next(item);
    }

    fn on_complete(&self) {
        self.shared.branch_complete();
    }

    fn on_error(&self, error: FlowError) {
        self.shared.branch_error(error);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
