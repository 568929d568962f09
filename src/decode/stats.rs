//! Decoder counters.
//!
//! Every counter is a relaxed atomic bumped on the path it names. Read them
//! through [`DecoderStats::snapshot`]; values taken while work is in flight
//! are individually accurate but not mutually consistent.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DecoderStats {
    pub(crate) enqueued: AtomicU64,
    pub(crate) queued: AtomicU64,
    pub(crate) tasks_launched: AtomicU64,
    pub(crate) decode_jobs: AtomicU64,
    pub(crate) decode_failures: AtomicU64,
    pub(crate) chained: AtomicU64,
    pub(crate) requeued_at_cap: AtomicU64,
    pub(crate) inline_executions: AtomicU64,
    pub(crate) retractions: AtomicU64,
    pub(crate) synchronous_decodes: AtomicU64,
}

/// Plain copy of [`DecoderStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderStatsSnapshot {
    /// Requests accepted by `enqueue`.
    pub enqueued: u64,
    /// Requests that went to the pending queue because no context was free.
    pub queued: u64,
    /// Decode tasks handed to the runtime.
    pub tasks_launched: u64,
    /// Decode + callback steps, on any path.
    pub decode_jobs: u64,
    /// Steps whose decode result was an error.
    pub decode_failures: u64,
    /// Steps whose callback produced a chained request.
    pub chained: u64,
    /// Chained requests pushed back to the queue by the consecutive-job cap.
    pub requeued_at_cap: u64,
    /// Requests decoded inside `enqueue` (forced or oversubscribed).
    pub inline_executions: u64,
    /// Decode tasks retracted and run by `try_retract_and_execute_decode_tasks`.
    pub retractions: u64,
    /// Steps taken by `try_execute_decode_request`.
    pub synchronous_decodes: u64,
}

/// Relaxed increment of one counter.
#[inline]
pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl DecoderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DecoderStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DecoderStatsSnapshot {
            enqueued: load(&self.enqueued),
            queued: load(&self.queued),
            tasks_launched: load(&self.tasks_launched),
            decode_jobs: load(&self.decode_jobs),
            decode_failures: load(&self.decode_failures),
            chained: load(&self.chained),
            requeued_at_cap: load(&self.requeued_at_cap),
            inline_executions: load(&self.inline_executions),
            retractions: load(&self.retractions),
            synchronous_decodes: load(&self.synchronous_decodes),
        }
    }
}
