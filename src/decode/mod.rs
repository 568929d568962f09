//! Chunk block decoding.
//!
//! - [`request`]: request, completion and buffer value types.
//! - [`codec`]: the decode primitive ([`BlockCodec`], [`StandardCodec`]).
//! - [`decoder`]: [`ChunkBlockDecoder`], which schedules requests onto a
//!   [`TaskRuntime`](crate::runtime::TaskRuntime) through a fixed pool of
//!   decode contexts and a pending queue.

pub mod codec;
pub mod config;
mod context;
pub mod decoder;
pub mod error;
mod pending;
pub mod request;
pub mod stats;

pub use codec::{BlockCodec, StandardCodec};
pub use config::{DecoderConfig, MAX_DECODE_LIMIT, MIN_DECODE_LIMIT};
pub use decoder::{ChunkBlockDecoder, DECODE_TASK_NAME};
pub use error::{DecodeError, InvalidRequest};
pub use request::{
    Chain, ChunkBlockDecodeRequest, CompressionMethod, DecodeCompletion, DecodeParams,
    DecodeResult, DecodedBlock, EncodedBlock, OnDecoded,
};
pub use stats::{DecoderStats, DecoderStatsSnapshot};
