//! One-shot task cell shared by the bundled runtimes.
//!
//! A cell owns a boxed body and a three-state word. Workers and retracting
//! threads race on [`TaskCell::try_claim`]; the winner runs the body via
//! [`TaskCell::run_claimed`], which always marks the cell completed, even when
//! the body panics.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use super::{TaskBody, TaskPriority};

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;

/// Panic payload captured from a task body.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

pub struct TaskCell {
    name: &'static str,
    priority: TaskPriority,
    state: AtomicU8,
    body: Mutex<Option<TaskBody>>,
    done: Mutex<bool>,
    done_cv: Condvar,
}

impl TaskCell {
    pub fn new(name: &'static str, priority: TaskPriority, body: TaskBody) -> Arc<Self> {
        Arc::new(Self {
            name,
            priority,
            state: AtomicU8::new(QUEUED),
            body: Mutex::new(Some(body)),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
        })
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Attempts the `Queued -> Running` transition. Exactly one caller wins.
    #[inline]
    pub fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::Acquire) != QUEUED
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETED
    }

    /// Runs the body of a cell this thread claimed.
    ///
    /// Returns the panic payload if the body panicked; the cell is completed
    /// either way.
    pub fn run_claimed(&self) -> Result<(), PanicPayload> {
        assert_eq!(
            self.state.load(Ordering::Acquire),
            RUNNING,
            "running an unclaimed task"
        );

        let body = self.body.lock().expect("task body mutex poisoned").take();
        let result = match body {
            Some(body) => panic::catch_unwind(AssertUnwindSafe(body)),
            None => Ok(()),
        };

        self.state.store(COMPLETED, Ordering::Release);
        let mut done = self.done.lock().expect("task done mutex poisoned");
        *done = true;
        self.done_cv.notify_all();

        result
    }

    /// Blocks until the cell is completed.
    pub fn wait(&self) {
        let mut done = self.done.lock().expect("task done mutex poisoned");
        while !*done {
            done = self
                .done_cv
                .wait(done)
                .expect("task done mutex poisoned");
        }
    }
}

impl std::fmt::Debug for TaskCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCell")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}
