//! Chunk block decoder: bounded, queue-backed decode scheduling.
//!
//! The decoder owns no threads. It pairs requests with a fixed pool of decode
//! contexts and launches one runtime task per busy context. A task decodes
//! its request, follows chained requests up to a cap, then frees its context
//! and pulls more work from the pending queue.
//!
//! ```text
//!   enqueue ──► free context? ──yes──► launch task ──► decode ─┬─► callback
//!                    │ no                   ▲                   │
//!                    ▼                      │         chained & under cap
//!              pending queue ◄── leftover ──┤                   │
//!                    │                      └───────────────────┘
//!                    └──► try_dequeue_and_launch (on every release)
//! ```
//!
//! Threads blocked on a result can help instead of waiting:
//! [`try_execute_decode_request`](ChunkBlockDecoder::try_execute_decode_request)
//! decodes one queued request inline, and
//! [`try_retract_and_execute_decode_tasks`](ChunkBlockDecoder::try_retract_and_execute_decode_tasks)
//! pulls not-yet-started decode tasks off an oversubscribed runtime.
//!
//! # Locking
//!
//! One mutex guards the context pool (free list and bound task handles) and
//! the pending queue. Decoding, callbacks and runtime launches always run
//! with the mutex released, so callbacks may enqueue freely.
//!
//! # Panics
//!
//! A panic in a codec or callback is not contained. On a runtime task it
//! unwinds into the runtime (the [`ThreadPool`](crate::runtime::ThreadPool)
//! re-raises it from `join`) and the context it held stays busy.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::runtime::{TaskBody, TaskHandle, TaskRuntime};

use super::codec::{BlockCodec, StandardCodec};
use super::config::DecoderConfig;
use super::context::{ContextPool, ContextTicket};
use super::error::DecodeError;
use super::pending::PendingQueue;
use super::request::{ChunkBlockDecodeRequest, DecodeCompletion};
use super::stats::{incr, DecoderStats, DecoderStatsSnapshot};

/// Runtime task name for decode tasks.
pub const DECODE_TASK_NAME: &str = "ChunkBlockDecodeTask";

// ============================================================================
// Shared state
// ============================================================================

struct DecoderState<T> {
    contexts: ContextPool<T>,
    pending: PendingQueue,
}

impl<T: Clone> DecoderState<T> {
    /// Pairs one free context with the oldest pending request.
    fn take_dispatch(&mut self) -> Option<(ContextTicket, ChunkBlockDecodeRequest)> {
        if self.pending.is_empty() {
            return None;
        }
        let ticket = self.contexts.acquire()?;
        // Checked non-empty under the same lock.
        let request = self.pending.pop()?;
        Some((ticket, request))
    }
}

thread_local! {
    /// Decoders with a dispatch loop running on this thread, by address.
    static DISPATCHING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a decoder's dispatch loop as active on the current thread.
///
/// A runtime may run a launched body inline (a drained [`ThreadPool`]
/// does). That body frees its context and asks for another dispatch pass;
/// the guard turns the nested pass into a no-op so the outer loop picks the
/// work up and the stack stays flat.
///
/// [`ThreadPool`]: crate::runtime::ThreadPool
struct DispatchGuard {
    key: usize,
}

impl DispatchGuard {
    fn enter(key: usize) -> Option<Self> {
        DISPATCHING.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&key) {
                return None;
            }
            active.push(key);
            Some(Self { key })
        })
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|active| active.borrow_mut().retain(|&k| k != self.key));
    }
}

struct DecoderShared<R: TaskRuntime, C> {
    config: DecoderConfig,
    runtime: R,
    codec: C,
    state: Mutex<DecoderState<R::Task>>,
    stats: DecoderStats,
}

/// Schedules block decodes onto a [`TaskRuntime`].
///
/// Cheap to clone; clones share the same pool and queue.
pub struct ChunkBlockDecoder<R: TaskRuntime, C: BlockCodec = StandardCodec> {
    shared: Arc<DecoderShared<R, C>>,
}

impl<R: TaskRuntime, C: BlockCodec> Clone for ChunkBlockDecoder<R, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: TaskRuntime> ChunkBlockDecoder<R, StandardCodec> {
    /// Decoder using the built-in [`StandardCodec`].
    pub fn new(config: DecoderConfig, runtime: R) -> Self {
        Self::with_codec(config, runtime, StandardCodec)
    }
}

impl<R: TaskRuntime, C: BlockCodec> ChunkBlockDecoder<R, C> {
    /// Creates the decoder and its context pool.
    ///
    /// Worker and consecutive-job counts are clamped into `[1, 16]`.
    pub fn with_codec(config: DecoderConfig, runtime: R, codec: C) -> Self {
        let clamped = config.clamped();
        if clamped != config {
            debug!(
                requested_workers = config.max_worker_count,
                requested_jobs = config.max_consecutive_decode_jobs,
                workers = clamped.max_worker_count,
                jobs = clamped.max_consecutive_decode_jobs,
                "decoder limits clamped"
            );
        }

        let state = DecoderState {
            contexts: ContextPool::new(clamped.max_worker_count),
            pending: PendingQueue::new(),
        };

        Self {
            shared: Arc::new(DecoderShared {
                config: clamped,
                runtime,
                codec,
                state: Mutex::new(state),
                stats: DecoderStats::new(),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    /// Submits a request. Never waits for the decode.
    ///
    /// The request goes to a free context (launching a task) or to the tail
    /// of the pending queue. With `force_synchronous` the request and its
    /// whole chain are decoded on the calling thread before this returns.
    /// With `decode_inline_when_oversubscribed` while the runtime is
    /// oversubscribed, up to `max_consecutive_decode_jobs` steps run here and
    /// any leftover is queued.
    ///
    /// # Panics
    /// If the request is not valid (missing callback or empty buffers).
    pub fn enqueue(&self, request: ChunkBlockDecodeRequest) {
        assert_valid(&request);
        incr(&self.shared.stats.enqueued);

        let config = &self.shared.config;
        let inline = config.force_synchronous
            || (config.decode_inline_when_oversubscribed
                && self
                    .shared
                    .runtime
                    .is_oversubscription_limit_reached(config.priority));
        if inline {
            incr(&self.shared.stats.inline_executions);
            trace!(forced = config.force_synchronous, "decoding request inline");
            if config.force_synchronous {
                self.run_chain_to_end(request);
            } else {
                self.run_inline(request);
            }
            return;
        }

        let mut state = self.lock();
        match state.contexts.acquire() {
            Some(ticket) => {
                drop(state);
                self.launch_decode_task(ticket, request);
            }
            None => {
                state.pending.push(request);
                drop(state);
                incr(&self.shared.stats.queued);
            }
        }
    }

    /// Launches one runtime task that owns `ticket` and starts with `request`.
    fn launch_decode_task(&self, ticket: ContextTicket, request: ChunkBlockDecodeRequest) {
        incr(&self.shared.stats.tasks_launched);
        trace!(context = ticket.index(), "launching decode task");

        let decoder = self.clone();
        let body: TaskBody = Box::new(move || decoder.run_decode_task(ticket, request));
        let task = self
            .shared
            .runtime
            .launch(DECODE_TASK_NAME, self.shared.config.priority, body);

        // The task may already have finished and released the context.
        if !self.lock().contexts.bind_task(ticket, task) {
            trace!(context = ticket.index(), "decode task finished before bind");
        }
    }

    /// Task body: decode, free the context, requeue any leftover, refill.
    fn run_decode_task(&self, ticket: ContextTicket, request: ChunkBlockDecodeRequest) {
        let leftover = self.run_decode_jobs(request);

        {
            let mut state = self.lock();
            state.contexts.release(ticket);
            if let Some(next) = leftover {
                state.pending.push(next);
                incr(&self.shared.stats.requeued_at_cap);
                debug!(
                    context = ticket.index(),
                    cap = self.shared.config.max_consecutive_decode_jobs,
                    "consecutive decode cap reached, requeued chained request"
                );
            }
        }

        self.try_dequeue_and_launch_decode_tasks();
    }

    /// Decodes the whole chain on the calling thread, ignoring the cap.
    fn run_chain_to_end(&self, request: ChunkBlockDecodeRequest) {
        let mut next = Some(request);
        while let Some(request) = next {
            next = self.process_validated(request);
        }
    }

    /// Decodes on the calling thread, honouring the consecutive-job cap.
    fn run_inline(&self, request: ChunkBlockDecodeRequest) {
        if let Some(next) = self.run_decode_jobs(request) {
            self.lock().pending.push(next);
            incr(&self.shared.stats.requeued_at_cap);
            self.try_dequeue_and_launch_decode_tasks();
        }
    }

    /// Runs up to `max_consecutive_decode_jobs` chained steps.
    ///
    /// Returns the chained request left over when the cap stops the chain.
    fn run_decode_jobs(
        &self,
        mut request: ChunkBlockDecodeRequest,
    ) -> Option<ChunkBlockDecodeRequest> {
        for _ in 0..self.shared.config.max_consecutive_decode_jobs {
            request = self.process_validated(request)?;
        }
        Some(request)
    }

    // ------------------------------------------------------------------------
    // Decode step
    // ------------------------------------------------------------------------

    /// Decodes one request and invokes its callback exactly once.
    ///
    /// Returns the chained request, if the callback produced a valid one. An
    /// invalid chained request ends the chain and is logged.
    ///
    /// # Panics
    /// If `request` is not valid.
    pub fn process_decode_request(
        &self,
        request: ChunkBlockDecodeRequest,
    ) -> Option<ChunkBlockDecodeRequest> {
        assert_valid(&request);
        self.process_validated(request)
    }

    fn process_validated(
        &self,
        request: ChunkBlockDecodeRequest,
    ) -> Option<ChunkBlockDecodeRequest> {
        let stats = &self.shared.stats;
        let (params, encoded, mut decoded, on_decoded) = request.into_parts();
        let on_decoded = on_decoded.expect("validated request has a callback");

        let capacity = decoded.len();
        let result = self
            .shared
            .codec
            .decode_block(&params, encoded.as_slice(), decoded.as_mut_slice())
            .and_then(|written| {
                if written > capacity {
                    Err(DecodeError::OutputTooSmall {
                        needed: written,
                        capacity,
                    })
                } else {
                    Ok(written)
                }
            });
        incr(&stats.decode_jobs);
        if let Err(err) = &result {
            incr(&stats.decode_failures);
            trace!(method = %params.method, error = %err, "block decode failed");
        }

        let next = on_decoded(DecodeCompletion {
            params,
            encoded,
            decoded,
            result,
        })
        .into_next()?;

        match next.validate() {
            Ok(()) => {
                incr(&stats.chained);
                Some(next)
            }
            Err(reason) => {
                warn!(%reason, "dropping invalid chained decode request");
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Draining
    // ------------------------------------------------------------------------

    /// Pairs free contexts with pending requests until either runs out.
    ///
    /// Returns the number of tasks launched. Safe to call from any thread at
    /// any time. Called again from a task body that the runtime ran inline
    /// under this loop, it returns 0 and leaves the work to the outer pass.
    pub fn try_dequeue_and_launch_decode_tasks(&self) -> usize {
        let Some(_guard) = DispatchGuard::enter(Arc::as_ptr(&self.shared) as usize) else {
            return 0;
        };
        let mut launched = 0;
        loop {
            let dispatch = self.lock().take_dispatch();
            let Some((ticket, request)) = dispatch else {
                return launched;
            };
            self.launch_decode_task(ticket, request);
            launched += 1;
        }
    }

    /// Decodes the oldest pending request on the calling thread.
    ///
    /// A chained result goes back to the queue tail in the same entry and
    /// triggers a dispatch pass. Returns `false` if the queue was empty.
    pub fn try_execute_decode_request(&self) -> bool {
        let popped = self.lock().pending.pop_entry();
        let Some((entry, request)) = popped else {
            return false;
        };
        incr(&self.shared.stats.synchronous_decodes);

        match self.process_validated(request) {
            Some(next) => {
                self.lock().pending.requeue_entry(entry, next);
                self.try_dequeue_and_launch_decode_tasks();
            }
            None => self.lock().pending.destroy_entry(entry),
        }
        true
    }

    /// Retracts not-yet-started decode tasks onto the calling thread while
    /// the runtime is oversubscribed at the decoder priority.
    ///
    /// Scans contexts from index 0, once per call, and stops as soon as the
    /// runtime is no longer oversubscribed.
    ///
    /// Returns `true` if at least one task was retracted and run here, so a
    /// call that relieved the runtime by retracting still reports `true`.
    /// The oversubscription state after the call is available from
    /// [`TaskRuntime::is_oversubscription_limit_reached`].
    pub fn try_retract_and_execute_decode_tasks(&self) -> bool {
        let priority = self.shared.config.priority;
        let context_count = self.shared.config.max_worker_count;
        let mut index = 0;
        let mut executed = 0usize;

        while self
            .shared
            .runtime
            .is_oversubscription_limit_reached(priority)
        {
            if index == context_count {
                break;
            }
            let task = self.lock().contexts.task(index);
            index += 1;

            let Some(task) = task else {
                continue;
            };
            if task.try_retract_and_execute() {
                executed += 1;
                incr(&self.shared.stats.retractions);
                debug!(context = index - 1, "retracted decode task");
            }
        }

        executed > 0
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &DecoderConfig {
        &self.shared.config
    }

    pub fn runtime(&self) -> &R {
        &self.shared.runtime
    }

    pub fn stats(&self) -> DecoderStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Requests waiting for a context.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len() as usize
    }

    pub fn context_count(&self) -> usize {
        self.shared.config.max_worker_count as usize
    }

    pub fn free_context_count(&self) -> usize {
        self.lock().contexts.free_count() as usize
    }

    pub fn busy_context_count(&self) -> usize {
        self.lock().contexts.busy_count() as usize
    }

    /// No pending requests and no busy contexts.
    ///
    /// Requests detached by an in-progress `try_execute_decode_request` are
    /// not visible here.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() && state.contexts.busy_count() == 0
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, DecoderState<R::Task>> {
        self.shared
            .state
            .lock()
            .expect("decoder state mutex poisoned")
    }
}

impl<R: TaskRuntime, C: BlockCodec> fmt::Debug for ChunkBlockDecoder<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ChunkBlockDecoder")
            .field("config", &self.shared.config)
            .field("busy_contexts", &state.contexts.busy_count())
            .field("pending", &state.pending.len())
            .finish()
    }
}

fn assert_valid(request: &ChunkBlockDecodeRequest) {
    if let Err(reason) = request.validate() {
        panic!("invalid decode request: {reason}");
    }
}
