//! Bounded-worker scheduler for decoding compressed storage blocks.
//!
//! ## Scope
//! Producers hand compressed blocks to a [`ChunkBlockDecoder`] as
//! [`ChunkBlockDecodeRequest`]s. The decoder runs them on a pluggable
//! [`TaskRuntime`] through a fixed pool of decode contexts, queues the
//! overflow, lets completion callbacks chain follow-up blocks, and lets
//! blocked threads pull work onto themselves when the runtime is
//! oversubscribed.
//!
//! ## Key invariants
//! - At most `max_worker_count` decode tasks are in flight; free and busy
//!   contexts always partition the pool.
//! - Every accepted request is decoded once and its callback runs once.
//! - One task follows at most `max_consecutive_decode_jobs` chained
//!   requests; the rest goes back to the queue tail.
//! - Decoding and callbacks never run under the decoder lock.
//!
//! ## Layout
//! - [`stdx`]: index-based intrusive FIFO list.
//! - [`pool`]: slab allocator for queue entries.
//! - [`runtime`]: task runtime traits, a thread pool and a manual runtime.
//! - [`decode`]: requests, codecs and the decoder itself.

pub mod decode;
pub mod pool;
pub mod runtime;
pub mod stdx;

pub use decode::{
    BlockCodec, Chain, ChunkBlockDecodeRequest, ChunkBlockDecoder, CompressionMethod,
    DecodeCompletion, DecodeError, DecodeParams, DecodeResult, DecodedBlock, DecoderConfig,
    DecoderStatsSnapshot, EncodedBlock, InvalidRequest, StandardCodec,
};
pub use runtime::{
    ManualRuntime, ThreadPool, ThreadPoolConfig, ThreadPoolHandle, TaskHandle, TaskPriority,
    TaskRuntime,
};
