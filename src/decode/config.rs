//! Decoder tunables.

use crate::runtime::TaskPriority;

/// Lower bound for both worker and consecutive-job counts.
pub const MIN_DECODE_LIMIT: u32 = 1;
/// Upper bound for both worker and consecutive-job counts.
pub const MAX_DECODE_LIMIT: u32 = 16;

/// Configuration for a [`ChunkBlockDecoder`](super::ChunkBlockDecoder).
///
/// Counts outside `[1, 16]` are clamped, not rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Number of decode contexts, i.e. the cap on in-flight decode tasks.
    pub max_worker_count: u32,

    /// Chained requests one task may decode before yielding its context.
    pub max_consecutive_decode_jobs: u32,

    /// Priority passed to the runtime for every decode task.
    pub priority: TaskPriority,

    /// Decode every enqueued request on the enqueueing thread.
    pub force_synchronous: bool,

    /// Decode on the enqueueing thread when the runtime is already
    /// oversubscribed at `priority`.
    pub decode_inline_when_oversubscribed: bool,
}

impl DecoderConfig {
    pub fn new(
        max_worker_count: u32,
        max_consecutive_decode_jobs: u32,
        priority: TaskPriority,
    ) -> Self {
        Self {
            max_worker_count,
            max_consecutive_decode_jobs,
            priority,
            ..Self::default()
        }
    }

    /// Copy with both counts clamped into `[1, 16]`.
    pub fn clamped(self) -> Self {
        Self {
            max_worker_count: self
                .max_worker_count
                .clamp(MIN_DECODE_LIMIT, MAX_DECODE_LIMIT),
            max_consecutive_decode_jobs: self
                .max_consecutive_decode_jobs
                .clamp(MIN_DECODE_LIMIT, MAX_DECODE_LIMIT),
            ..self
        }
    }

    pub fn with_force_synchronous(mut self, force_synchronous: bool) -> Self {
        self.force_synchronous = force_synchronous;
        self
    }

    pub fn with_decode_inline_when_oversubscribed(mut self, enabled: bool) -> Self {
        self.decode_inline_when_oversubscribed = enabled;
        self
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_worker_count: 4,
            max_consecutive_decode_jobs: 8,
            priority: TaskPriority::Normal,
            force_synchronous: false,
            decode_inline_when_oversubscribed: false,
        }
    }
}
