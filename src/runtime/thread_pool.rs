//! Multi-threaded task runtime with priorities and retraction.
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────────────────────────────────────────────┐
//!                 │                   ThreadPool                      │
//!   launch ───────┼──► injectors[High]                                │
//!   (any thread)  │    injectors[Normal]    ◄── workers steal in      │
//!                 │    injectors[Background]    priority order        │
//!                 │                                                   │
//!                 │    ┌──────────┐ ┌──────────┐     ┌──────────┐     │
//!                 │    │ Worker 0 │ │ Worker 1 │ ... │ Worker N │     │
//!                 │    └──────────┘ └──────────┘     └──────────┘     │
//!                 │                                                   │
//!                 │   Shared: state, queued[], busy_workers, panic    │
//!                 └───────────────────────────────────────────────────┘
//!   retract ──► TaskCell::try_claim on the caller; the worker that later
//!               pops the cell sees it claimed and skips it.
//! ```
//!
//! - N worker threads, tiered idle strategy: spin -> yield -> park
//! - One crossbeam injector per [`TaskPriority`]; higher priorities drain first
//! - `queued[p]` counts unclaimed tasks per priority for the oversubscription
//!   signal
//!
//! # Correctness Invariants
//!
//! - **Work-conserving**: a launched task runs exactly once, on a worker or on
//!   a retracting thread
//! - **Termination detection**: `state` packs `(in_flight << 1) | accepting`,
//!   so `join` and late launches cannot race (see [`ACCEPTING_BIT`])
//! - **Panic isolation**: panics are caught and re-raised from `join`
//! - **No lost wakeups**: Parker/Unparker pattern
//!
//! # Oversubscription
//!
//! The pool reports the limit as reached for priority `p` when every worker is
//! busy running a task and at least one unclaimed task is queued at `p` or a
//! more urgent priority. That is the moment a waiting thread gains by running
//! queued work itself instead of sleeping.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_deque::{Injector, Steal};
use crossbeam_utils::sync::{Parker, Unparker};
use tracing::{debug, warn};

use super::task::{PanicPayload, TaskCell};
use super::{TaskBody, TaskHandle, TaskPriority, TaskRuntime};

// ============================================================================
// Configuration
// ============================================================================

/// Thread pool configuration.
///
/// | Knob         | Workload Sensitivity                    |
/// |--------------|-----------------------------------------|
/// | workers      | CPU count, decode CPU-boundedness       |
/// | spin_iters   | Launch latency distribution             |
/// | park_timeout | External launch frequency               |
#[derive(Clone, Copy, Debug)]
pub struct ThreadPoolConfig {
    /// Number of worker threads.
    pub workers: usize,

    /// Spin iterations before yielding/parking.
    pub spin_iters: u32,

    /// Park timeout after spinning/yielding.
    pub park_timeout: Duration,
}

impl ThreadPoolConfig {
    /// Validate configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
        assert!(self.spin_iters > 0, "spin_iters must be > 0");
        assert!(
            self.park_timeout > Duration::ZERO,
            "park_timeout must be > 0"
        );
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            spin_iters: 200,
            park_timeout: Duration::from_micros(200),
        }
    }
}

/// Counters reported by [`ThreadPool::join`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Tasks run by worker threads.
    pub tasks_executed: u64,
    /// Tasks run on a retracting caller.
    pub tasks_retracted: u64,
    /// Tasks launched after the pool drained, run inline by the launcher.
    pub tasks_inline: u64,
}

// ============================================================================
// Shared state
// ============================================================================

/// Accepting bit of the combined `(in_flight << 1) | accepting` word.
///
/// A launch increments the count with a CAS that succeeds only while the gate
/// is open or another task is still in flight. Once the gate is closed and
/// the count reaches zero, `done` is set and further launches run inline.
const ACCEPTING_BIT: usize = 1;
const COUNT_UNIT: usize = 2;

#[inline(always)]
fn in_flight(state: usize) -> usize {
    state >> 1
}

#[inline(always)]
fn is_accepting(state: usize) -> bool {
    (state & ACCEPTING_BIT) != 0
}

struct Shared {
    injectors: [Injector<Arc<TaskCell>>; TaskPriority::COUNT],
    /// Unclaimed tasks per priority rank.
    queued: [AtomicUsize; TaskPriority::COUNT],
    state: AtomicUsize,
    /// Stop flag. Monotonic.
    done: AtomicBool,
    busy_workers: AtomicUsize,
    workers: usize,
    unparkers: Vec<Unparker>,
    next_unpark: AtomicUsize,
    /// First panic captured from any worker.
    panic: Mutex<Option<PanicPayload>>,
    tasks_retracted: AtomicU64,
    tasks_inline: AtomicU64,
}

impl Shared {
    /// Wake one worker (round-robin).
    fn unpark_one(&self) {
        let n = self.unparkers.len();
        if n == 0 {
            return;
        }
        let idx = self.next_unpark.fetch_add(1, Ordering::Relaxed) % n;
        self.unparkers[idx].unpark();
    }

    fn unpark_all(&self) {
        for u in &self.unparkers {
            u.unpark();
        }
    }

    fn initiate_done(&self) {
        self.done.store(true, Ordering::Release);
        self.unpark_all();
    }

    fn record_panic(&self, p: PanicPayload) {
        let mut guard = self.panic.lock().expect("panic mutex poisoned");
        if guard.is_none() {
            *guard = Some(p);
        }
        drop(guard);
        self.initiate_done();
    }

    /// Count a new in-flight task unless the pool has fully drained.
    fn try_register(&self) -> bool {
        let mut s = self.state.load(Ordering::Acquire);
        loop {
            if !is_accepting(s) && in_flight(s) == 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                s,
                s.wrapping_add(COUNT_UNIT),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => s = actual,
            }
        }
    }

    fn complete_one(&self) {
        let prev = self.state.fetch_sub(COUNT_UNIT, Ordering::AcqRel);
        assert!(in_flight(prev) > 0, "in-flight count underflow");
        if in_flight(prev) == 1 && !is_accepting(prev) {
            self.initiate_done();
        }
    }

    fn pop_task(&self) -> Option<Arc<TaskCell>> {
        for injector in &self.injectors {
            loop {
                match injector.steal() {
                    Steal::Success(cell) => return Some(cell),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    fn queued_at_or_above(&self, priority: TaskPriority) -> usize {
        self.queued[..=priority.rank()]
            .iter()
            .map(|q| q.load(Ordering::Acquire))
            .sum()
    }

    #[inline]
    fn on_claimed(&self, cell: &TaskCell) {
        self.queued[cell.priority().rank()].fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Cloneable launcher for a [`ThreadPool`]. Implements [`TaskRuntime`].
#[derive(Clone)]
pub struct ThreadPoolHandle {
    shared: Arc<Shared>,
}

/// Task launched on a [`ThreadPool`].
#[derive(Clone)]
pub struct ThreadPoolTask {
    cell: Arc<TaskCell>,
    shared: Arc<Shared>,
}

impl ThreadPoolTask {
    /// Blocks until the task has run (on any thread).
    pub fn wait(&self) {
        self.cell.wait();
    }

    pub fn name(&self) -> &'static str {
        self.cell.name()
    }
}

impl TaskRuntime for ThreadPoolHandle {
    type Task = ThreadPoolTask;

    fn launch(&self, name: &'static str, priority: TaskPriority, body: TaskBody) -> ThreadPoolTask {
        let cell = TaskCell::new(name, priority, body);
        let shared = &self.shared;

        if shared.try_register() {
            shared.queued[priority.rank()].fetch_add(1, Ordering::AcqRel);
            shared.injectors[priority.rank()].push(Arc::clone(&cell));
            shared.unpark_one();
        } else {
            // Pool already drained; nobody would ever pop this cell.
            debug!(task = name, "thread pool closed, running task inline");
            assert!(cell.try_claim());
            shared.tasks_inline.fetch_add(1, Ordering::Relaxed);
            if let Err(payload) = cell.run_claimed() {
                std::panic::resume_unwind(payload);
            }
        }

        ThreadPoolTask {
            cell,
            shared: Arc::clone(shared),
        }
    }

    fn is_oversubscription_limit_reached(&self, priority: TaskPriority) -> bool {
        let shared = &self.shared;
        shared.busy_workers.load(Ordering::Acquire) >= shared.workers
            && shared.queued_at_or_above(priority) > 0
    }
}

impl TaskHandle for ThreadPoolTask {
    fn try_retract_and_execute(&self) -> bool {
        if !self.cell.try_claim() {
            return false;
        }

        self.shared.on_claimed(&self.cell);
        self.shared.tasks_retracted.fetch_add(1, Ordering::Relaxed);
        let result = self.cell.run_claimed();
        self.shared.complete_one();

        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
        true
    }

    fn is_completed(&self) -> bool {
        self.cell.is_completed()
    }
}

impl std::fmt::Debug for ThreadPoolTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ThreadPoolTask").field(&self.cell).finish()
    }
}

// ============================================================================
// ThreadPool
// ============================================================================

/// Owner of the worker threads.
///
/// # Lifecycle
///
/// 1. Create with `ThreadPool::new(config)`
/// 2. Hand `handle()` clones to launchers (e.g. a decoder)
/// 3. Call `join()` to wait for all in-flight tasks and stop the workers
///
/// Dropping the pool without `join` does the same but swallows worker panics.
pub struct ThreadPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<u64>>,
}

impl ThreadPool {
    /// Create and start the pool. Workers park until work is launched.
    pub fn new(cfg: ThreadPoolConfig) -> Self {
        cfg.validate();

        let mut parkers = Vec::with_capacity(cfg.workers);
        let mut unparkers = Vec::with_capacity(cfg.workers);
        for _ in 0..cfg.workers {
            let p = Parker::new();
            unparkers.push(p.unparker().clone());
            parkers.push(p);
        }

        let shared = Arc::new(Shared {
            injectors: std::array::from_fn(|_| Injector::new()),
            queued: std::array::from_fn(|_| AtomicUsize::new(0)),
            // Initial state: accepting=1, count=0
            state: AtomicUsize::new(ACCEPTING_BIT),
            done: AtomicBool::new(false),
            busy_workers: AtomicUsize::new(0),
            workers: cfg.workers,
            unparkers,
            next_unpark: AtomicUsize::new(0),
            panic: Mutex::new(None),
            tasks_retracted: AtomicU64::new(0),
            tasks_inline: AtomicU64::new(0),
        });

        let threads = parkers
            .into_iter()
            .enumerate()
            .map(|(worker_id, parker)| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("chunk-decode-worker-{worker_id}"))
                    .spawn(move || worker_loop(cfg, &shared, &parker))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!(workers = cfg.workers, "thread pool started");
        Self { shared, threads }
    }

    pub fn handle(&self) -> ThreadPoolHandle {
        ThreadPoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop accepting new root work and wait for all in-flight tasks.
    ///
    /// Tasks launched by in-flight tasks are still accepted and run.
    ///
    /// # Panics
    ///
    /// If any task panicked on a worker, this re-panics on the calling thread.
    pub fn join(mut self) -> PoolMetrics {
        let metrics = self.shutdown();

        if let Some(p) = self
            .shared
            .panic
            .lock()
            .expect("panic mutex poisoned")
            .take()
        {
            std::panic::resume_unwind(p);
        }

        metrics
    }

    fn shutdown(&mut self) -> PoolMetrics {
        let prev_state = self
            .shared
            .state
            .fetch_and(!ACCEPTING_BIT, Ordering::AcqRel);
        if in_flight(prev_state) == 0 {
            self.shared.initiate_done();
        }

        let mut metrics = PoolMetrics::default();
        for th in self.threads.drain(..) {
            match th.join() {
                Ok(executed) => metrics.tasks_executed += executed,
                Err(p) => self.shared.record_panic(p),
            }
        }
        metrics.tasks_retracted = self.shared.tasks_retracted.load(Ordering::Relaxed);
        metrics.tasks_inline = self.shared.tasks_inline.load(Ordering::Relaxed);

        debug!(
            executed = metrics.tasks_executed,
            retracted = metrics.tasks_retracted,
            "thread pool stopped"
        );
        metrics
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.shutdown();
        }
    }
}

// ============================================================================
// Worker loop
// ============================================================================

/// Worker main loop. Returns the number of tasks this worker ran.
fn worker_loop(cfg: ThreadPoolConfig, shared: &Shared, parker: &Parker) -> u64 {
    let mut idle = TieredIdle::new();
    let mut executed = 0u64;

    loop {
        if shared.done.load(Ordering::Acquire) {
            break;
        }

        let Some(cell) = shared.pop_task() else {
            match idle.on_idle(&cfg) {
                IdleAction::Continue => {}
                IdleAction::Park { timeout } => parker.park_timeout(timeout),
            }
            continue;
        };
        idle.on_work();

        // Retracted cells stay in the injector; whoever claimed them owns
        // their completion.
        if !cell.try_claim() {
            continue;
        }
        shared.on_claimed(&cell);

        shared.busy_workers.fetch_add(1, Ordering::AcqRel);
        let result = cell.run_claimed();
        shared.busy_workers.fetch_sub(1, Ordering::AcqRel);
        executed += 1;

        if let Err(payload) = result {
            warn!(task = cell.name(), "task panicked on worker");
            shared.record_panic(payload);
        }
        shared.complete_one();
    }

    executed
}

enum IdleAction {
    Continue,
    Park { timeout: Duration },
}

/// Spin -> occasional yield -> park with timeout.
struct TieredIdle {
    idle_rounds: u32,
}

impl TieredIdle {
    fn new() -> Self {
        Self { idle_rounds: 0 }
    }

    fn on_work(&mut self) {
        self.idle_rounds = 0;
    }

    fn on_idle(&mut self, cfg: &ThreadPoolConfig) -> IdleAction {
        self.idle_rounds = self.idle_rounds.saturating_add(1);

        if self.idle_rounds <= cfg.spin_iters {
            std::hint::spin_loop();
            return IdleAction::Continue;
        }

        if (self.idle_rounds & 0xF) == 0 {
            thread::yield_now();
        }

        IdleAction::Park {
            timeout: cfg.park_timeout,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
