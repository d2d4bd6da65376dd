//! # Execution Facilities
//!
//! The engine defers actual work to whatever execution facility the
//! surrounding system supplies. Two contracts are consumed:
//!
//! - [`Dispatcher`] — runs a unit of work, possibly on another thread. A
//!   single-threaded dispatcher must preserve submission order.
//! - [`TimerService`] — schedules one-shot and periodic callbacks, returning
//!   [`Pausable`](timer::Pausable) handles.
//!
//! Two dispatcher implementations are provided: [`InlineDispatcher`] for
//! synchronous call-site execution and [`ThreadDispatcher`] for a dedicated
//! worker with a FIFO queue.

mod timer;

pub use timer::{Pausable, TimerHandle, TimerService};

use std::sync::mpsc;
use std::thread::JoinHandle;

/// A unit of work handed to a dispatcher.
pub type Task = Box<dyn FnOnce() + Send>;

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Runs units of work on behalf of the engine.
pub trait Dispatcher: Send + Sync {
    /// Schedules a task. The task may run on another thread and may be
    /// deferred; a single-threaded implementation must preserve submission
    /// order.
    fn schedule(&self, task: Task);
}

// ---------------------------------------------------------------------------
// InlineDispatcher
// ---------------------------------------------------------------------------

/// Runs every task immediately on the calling thread.
///
/// Trivially preserves submission order; used in tests and wherever handler
/// execution is cheap enough to run at the notification call site.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn schedule(&self, task: Task) {
        task();
    }
}

// ---------------------------------------------------------------------------
// ThreadDispatcher
// ---------------------------------------------------------------------------

/// A single worker thread draining a FIFO queue.
///
/// Submission order is preserved. Dropping the dispatcher closes the queue,
/// lets the worker drain what was already submitted, and joins it.
pub struct ThreadDispatcher {
    tx: Option<mpsc::Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadDispatcher {
    /// Spawns the worker thread.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn a thread.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::channel::<Task>();
        let worker = std::thread::Builder::new()
            .name(format!("rill-dispatcher-{name}"))
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
            })
            .expect("failed to spawn dispatcher thread");

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }
}

impl Dispatcher for ThreadDispatcher {
    fn schedule(&self, task: Task) {
        if let Some(tx) = &self.tx {
            if tx.send(task).is_err() {
                tracing::warn!("task submitted to a stopped dispatcher was dropped");
            }
        }
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        // Closing the channel ends the worker's recv loop after the
        // already-queued tasks have run.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
