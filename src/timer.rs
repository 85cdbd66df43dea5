//! One-shot timers behind a swappable scheduler.
//!
//! Channels arm two kinds of deadline: the readiness wait of
//! [`crate::Channel::ready`] and the per-request correlation timeout. Both go
//! through the [`Scheduler`] trait so production code runs on tokio while
//! tests drive a virtual clock.
//!
//! - [`TokioScheduler`]: each timer is a `spawn_local` task that sleeps, then
//!   fires. Cancelling aborts the task. Requires a [`tokio::task::LocalSet`];
//!   without one, timers are logged as unarmed and never fire.
//! - [`ManualScheduler`]: deadlines are polled when the test calls
//!   [`ManualScheduler::advance`]. Nothing fires on its own.
//!
//! # Deadlock Prevention
//!
//! Both schedulers remove the entry under the borrow, release it, then call
//! the callback. Callbacks may schedule or cancel timers freely.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::runtime;

/// Callback fired when a timer elapses.
pub type TimerCallback = Box<dyn FnOnce()>;

/// Shared handle to a scheduler.
pub type SharedScheduler = Rc<dyn Scheduler>;

/// Identifier of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer_{}", self.0)
    }
}

/// Source of one-shot timers.
pub trait Scheduler {
    /// Fire `callback` once after `delay`.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerId;

    /// Cancel a pending timer. Returns `true` if it had not fired yet.
    fn cancel(&self, id: TimerId) -> bool;
}

// ============================================================================
// Tokio
// ============================================================================

/// Scheduler backed by `tokio::task::spawn_local`.
#[derive(Default)]
pub struct TokioScheduler {
    tasks: Rc<RefCell<HashMap<TimerId, JoinHandle<()>>>>,
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("active_count", &self.tasks.borrow().len())
            .finish()
    }
}

impl TokioScheduler {
    /// Create a scheduler with no pending timers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that have neither fired nor been cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl Scheduler for TokioScheduler {
    /// Outside a [`tokio::task::LocalSet`] the timer cannot be armed: the
    /// failure is logged and the returned id never fires.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = TimerId::next();
        let tasks = Rc::downgrade(&self.tasks);

        let spawned = runtime::spawn_local(async move {
            tokio::time::sleep(delay).await;
            // Gone from the registry means cancelled while waking up
            let live = tasks
                .upgrade()
                .is_some_and(|tasks| tasks.borrow_mut().remove(&id).is_some());
            if live {
                callback();
            }
        });

        match spawned {
            Ok(handle) => {
                self.tasks.borrow_mut().insert(id, handle);
                log::trace!("Scheduled {id} in {delay:?}");
            }
            Err(e) => log::error!("Timer {id} not armed: {e:#}"),
        }
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let handle = self.tasks.borrow_mut().remove(&id);
        match handle {
            Some(handle) => {
                handle.abort();
                log::trace!("Cancelled {id}");
                true
            }
            None => false,
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.borrow_mut().drain() {
            handle.abort();
        }
    }
}

// ============================================================================
// Manual
// ============================================================================

struct ManualEntry {
    id: TimerId,
    deadline: Duration,
    callback: TimerCallback,
}

/// Virtual-clock scheduler for deterministic tests.
#[derive(Default)]
pub struct ManualScheduler {
    now: Cell<Duration>,
    entries: RefCell<Vec<ManualEntry>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now.get())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ManualScheduler {
    /// Create a scheduler whose clock starts at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Number of timers waiting to fire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Move the clock forward by `by`, firing every timer that comes due.
    ///
    /// Timers fire in deadline order, ties in scheduling order. The clock
    /// reads each timer's deadline while its callback runs, so timers
    /// scheduled from a callback are measured from that point and fire in
    /// the same call if they fall inside the window.
    ///
    /// Returns the number of callbacks fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now.get() + by;
        let mut fired = 0;

        loop {
            let due = {
                let mut entries = self.entries.borrow_mut();
                let next = entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.deadline <= target)
                    .min_by_key(|(_, e)| (e.deadline, e.id))
                    .map(|(i, _)| i);
                next.map(|i| entries.remove(i))
            };
            let Some(entry) = due else { break };

            self.now.set(entry.deadline);
            (entry.callback)();
            fired += 1;
        }

        self.now.set(target);
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = TimerId::next();
        self.entries.borrow_mut().push(ManualEntry {
            id,
            deadline: self.now.get() + delay,
            callback,
        });
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }
}
