//! One-shot and periodic timer scheduling.
//!
//! A [`TimerService`] owns a worker thread and a deadline-ordered heap.
//! Scheduling returns a [`TimerHandle`] with the same pause/resume/cancel
//! lifecycle as a registry registration; cancelled handles are discarded at
//! fire time and paused handles skip ticks without losing their slot.
//!
//! Tasks run on the timer thread outside the queue lock, so a slow task
//! delays later deadlines but never deadlocks scheduling.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

// ---------------------------------------------------------------------------
// Pausable
// ---------------------------------------------------------------------------

/// Pause/resume/cancel lifecycle shared by timer handles and other
/// cancellable facilities.
pub trait Pausable {
    /// Suspends the facility; periodic work skips ticks while paused.
    fn pause(&self);

    /// Resumes a paused facility.
    fn resume(&self);

    /// Permanently cancels the facility. Idempotent.
    fn cancel(&self);
}

// ---------------------------------------------------------------------------
// TimerHandle
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HandleState {
    cancelled: AtomicBool,
    paused: AtomicBool,
}

/// Handle to a scheduled timer task.
///
/// Cloneable; all clones control the same scheduled task.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    state: Arc<HandleState>,
}

impl TimerHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(HandleState::default()),
        }
    }

    /// Returns `true` once the task has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` while the task is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }
}

impl Pausable for TimerHandle {
    fn pause(&self) {
        self.state.paused.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.state.paused.store(false, Ordering::Release);
    }

    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// TimerEntry
// ---------------------------------------------------------------------------

type TimerTask = Arc<dyn Fn() + Send + Sync>;

struct TimerEntry {
    deadline: Instant,
    delay: Duration,
    period: Option<Duration>,
    task: TimerTask,
    state: Arc<HandleState>,
    seq: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline pops
        // first, with the submission sequence as a stable tie-break.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ---------------------------------------------------------------------------
// TimerService
// ---------------------------------------------------------------------------

struct TimerShared {
    queue: Mutex<BinaryHeap<TimerEntry>>,
    available: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
}

/// A timer backed by one worker thread and a deadline-ordered heap.
pub struct TimerService {
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

impl TimerService {
    /// Spawns the timer thread.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn a thread.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("rill-timer".into())
            .spawn(move || Self::run(&worker_shared))
            .expect("failed to spawn timer thread");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Schedules a periodic task: first fire after `delay`, then every
    /// `period`, until the handle is cancelled.
    pub fn schedule(
        &self,
        task: impl Fn() + Send + Sync + 'static,
        delay: Duration,
        period: Duration,
    ) -> TimerHandle {
        self.enqueue(Arc::new(task), delay, Some(period))
    }

    /// Schedules a one-shot task firing after `delay`.
    pub fn submit(&self, task: impl Fn() + Send + Sync + 'static, delay: Duration) -> TimerHandle {
        self.enqueue(Arc::new(task), delay, None)
    }

    fn enqueue(&self, task: TimerTask, delay: Duration, period: Option<Duration>) -> TimerHandle {
        let handle = TimerHandle::new();
        let entry = TimerEntry {
            deadline: Instant::now() + delay,
            delay,
            period,
            task,
            state: Arc::clone(&handle.state),
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.shared.queue.lock().push(entry);
        self.shared.available.notify_one();
        handle
    }

    fn run(shared: &TimerShared) {
        loop {
            let mut queue = shared.queue.lock();
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            let now = Instant::now();
            let next_deadline = queue.peek().map(|entry| entry.deadline);
            let Some(deadline) = next_deadline else {
                shared.available.wait(&mut queue);
                continue;
            };
            if deadline > now {
                let _ = shared.available.wait_until(&mut queue, deadline);
                continue;
            }
            let Some(due) = queue.pop() else {
                continue;
            };

            if due.state.cancelled.load(Ordering::Acquire) {
                continue;
            }

            if due.state.paused.load(Ordering::Acquire) {
                // Skip the tick but keep the slot; re-check after one
                // period (or one delay for a one-shot).
                let renew = due.period.unwrap_or(due.delay);
                queue.push(TimerEntry {
                    deadline: now + renew,
                    ..due
                });
                continue;
            }

            if let Some(period) = due.period {
                queue.push(TimerEntry {
                    deadline: now + period,
                    delay: due.delay,
                    period: due.period,
                    task: Arc::clone(&due.task),
                    state: Arc::clone(&due.state),
                    seq: due.seq,
                });
            }

            drop(queue);
            (due.task)();
        }
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.available.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
