//! Task runtime capability consumed by the decoder.
//!
//! The decoder never owns threads. It launches units of work through a
//! [`TaskRuntime`] and keeps the returned [`TaskHandle`] so that a thread
//! blocked on a result can later retract a not-yet-started task and run it
//! inline. Two runtimes ship with the crate:
//!
//! - [`ThreadPool`]: OS worker threads with per-priority injectors.
//! - [`ManualRuntime`]: no threads at all; tasks run when the caller pumps
//!   them. Used for deterministic tests and simulations.
//!
//! # Task lifecycle
//!
//! ```text
//!   launch ──► Queued ──claim──► Running ──► Completed
//!                 │                              ▲
//!                 └── try_retract_and_execute ───┘  (runs on the caller)
//! ```
//!
//! Exactly one party wins the `Queued -> Running` claim, so a task body runs
//! at most once no matter how many workers and retracting threads race.

pub mod manual;
pub mod task;
pub mod thread_pool;

pub use manual::{ManualRuntime, ManualTask};
pub use thread_pool::{PoolMetrics, ThreadPool, ThreadPoolConfig, ThreadPoolHandle, ThreadPoolTask};

/// Boxed one-shot task body.
pub type TaskBody = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling priority, most urgent first.
///
/// The decoder passes its configured priority through unchanged; only the
/// runtime interprets it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TaskPriority {
    High,
    #[default]
    Normal,
    Background,
}

impl TaskPriority {
    pub const COUNT: usize = 3;
    pub const ALL: [TaskPriority; Self::COUNT] = [Self::High, Self::Normal, Self::Background];

    /// Dense index, 0 = most urgent.
    #[inline]
    pub const fn rank(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Background => 2,
        }
    }
}

/// Handle to a launched task.
pub trait TaskHandle: Clone + Send + Sync + 'static {
    /// Runs the task body on the calling thread if no worker has started it.
    ///
    /// Returns `true` if the body ran here, `false` if it was already
    /// started or finished elsewhere.
    fn try_retract_and_execute(&self) -> bool;

    fn is_completed(&self) -> bool;
}

/// Launches task bodies and reports scheduler pressure.
pub trait TaskRuntime: Send + Sync + 'static {
    type Task: TaskHandle;

    /// Submits `body` for asynchronous execution.
    ///
    /// The body may start (and even finish) before this returns.
    fn launch(&self, name: &'static str, priority: TaskPriority, body: TaskBody) -> Self::Task;

    /// Whether ready work at `priority` or above exceeds what the workers can
    /// pick up right now.
    fn is_oversubscription_limit_reached(&self, priority: TaskPriority) -> bool;
}
