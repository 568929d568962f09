//! Deterministic, caller-driven runtime.
//!
//! Launched tasks sit in a FIFO until the owner calls [`ManualRuntime::run_next`]
//! or [`ManualRuntime::run_all`]; nothing runs in the background. The
//! oversubscription signal is scripted, so tests can force the retraction
//! path and observe exactly which tasks ran where.
//!
//! # Invariants
//!
//! - Tasks are started in launch order, except those retracted first.
//! - A retracted task stays in the FIFO until popped; popping skips it.
//! - `queued_tasks()` counts only unclaimed tasks.

use std::collections::VecDeque;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::task::TaskCell;
use super::{TaskBody, TaskHandle, TaskPriority, TaskRuntime};

#[derive(Default)]
struct ManualInner {
    queue: Mutex<VecDeque<Arc<TaskCell>>>,
    oversubscribed: AtomicBool,
    /// Oversubscribed until this many retractions succeed.
    forced_retractions: AtomicUsize,
    launched: AtomicUsize,
    executed: AtomicUsize,
    retracted: AtomicUsize,
}

/// Runtime whose tasks only run when pumped.
#[derive(Clone, Default)]
pub struct ManualRuntime {
    inner: Arc<ManualInner>,
}

/// Task launched on a [`ManualRuntime`].
#[derive(Clone)]
pub struct ManualTask {
    cell: Arc<TaskCell>,
    inner: Arc<ManualInner>,
}

impl ManualRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the oldest unclaimed task on the calling thread.
    ///
    /// Returns `false` if no runnable task was queued. A panic in the task
    /// body propagates to the caller.
    pub fn run_next(&self) -> bool {
        loop {
            let Some(cell) = self.pop_front() else {
                return false;
            };
            if !cell.try_claim() {
                continue;
            }
            self.inner.executed.fetch_add(1, Ordering::Relaxed);
            if let Err(payload) = cell.run_claimed() {
                panic::resume_unwind(payload);
            }
            return true;
        }
    }

    /// Runs tasks until the FIFO is empty, including tasks launched by the
    /// tasks being run. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Unclaimed tasks waiting in the FIFO.
    pub fn queued_tasks(&self) -> usize {
        self.inner
            .queue
            .lock()
            .expect("manual runtime queue poisoned")
            .iter()
            .filter(|cell| !cell.is_started())
            .count()
    }

    pub fn launched_count(&self) -> usize {
        self.inner.launched.load(Ordering::Relaxed)
    }

    /// Tasks run through `run_next`/`run_all`.
    pub fn executed_count(&self) -> usize {
        self.inner.executed.load(Ordering::Relaxed)
    }

    /// Tasks run through `try_retract_and_execute`.
    pub fn retracted_count(&self) -> usize {
        self.inner.retracted.load(Ordering::Relaxed)
    }

    /// Sets the sticky oversubscription flag.
    pub fn set_oversubscribed(&self, oversubscribed: bool) {
        self.inner
            .oversubscribed
            .store(oversubscribed, Ordering::Relaxed);
    }

    /// Reports oversubscription until `retractions` tasks have been
    /// retracted, then clears.
    pub fn force_oversubscribed_for_retractions(&self, retractions: usize) {
        self.inner
            .forced_retractions
            .store(retractions, Ordering::Relaxed);
    }

    fn pop_front(&self) -> Option<Arc<TaskCell>> {
        self.inner
            .queue
            .lock()
            .expect("manual runtime queue poisoned")
            .pop_front()
    }
}

impl TaskRuntime for ManualRuntime {
    type Task = ManualTask;

    fn launch(&self, name: &'static str, priority: TaskPriority, body: TaskBody) -> ManualTask {
        let cell = TaskCell::new(name, priority, body);
        self.inner.launched.fetch_add(1, Ordering::Relaxed);
        self.inner
            .queue
            .lock()
            .expect("manual runtime queue poisoned")
            .push_back(Arc::clone(&cell));
        ManualTask {
            cell,
            inner: Arc::clone(&self.inner),
        }
    }

    fn is_oversubscription_limit_reached(&self, _priority: TaskPriority) -> bool {
        self.inner.oversubscribed.load(Ordering::Relaxed)
            || self.inner.forced_retractions.load(Ordering::Relaxed) > 0
    }
}

impl TaskHandle for ManualTask {
    fn try_retract_and_execute(&self) -> bool {
        if !self.cell.try_claim() {
            return false;
        }

        self.inner.retracted.fetch_add(1, Ordering::Relaxed);
        // Saturating: a zero budget stays zero.
        let _ = self.inner.forced_retractions.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |n| n.checked_sub(1),
        );

        if let Err(payload) = self.cell.run_claimed() {
            panic::resume_unwind(payload);
        }
        true
    }

    fn is_completed(&self) -> bool {
        self.cell.is_completed()
    }
}

impl std::fmt::Debug for ManualTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ManualTask").field(&self.cell).finish()
    }
}
