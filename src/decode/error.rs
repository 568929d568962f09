//! Error types for block decoding.
//!
//! Two families, kept apart on purpose:
//! - [`DecodeError`] is a value. It travels inside the decode result to the
//!   request's completion callback and is never raised by the scheduler.
//! - [`InvalidRequest`] names a broken producer contract. The decoder panics
//!   with it; there is nothing to recover.

use std::fmt;

use super::request::CompressionMethod;

/// Decode failure reported by a [`BlockCodec`](super::BlockCodec).
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The codec does not implement this compression method.
    UnsupportedMethod(CompressionMethod),
    /// The destination buffer cannot hold the decoded block.
    OutputTooSmall { needed: usize, capacity: usize },
    /// Decoded length differs from the block size in the params.
    SizeMismatch { expected: usize, actual: usize },
    /// Input ended before the compressed stream did.
    Truncated,
    /// Compressed stream is malformed.
    Corrupt { detail: String },
    /// Opaque error code from an external codec.
    Backend { code: i32 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedMethod(method) => {
                write!(f, "unsupported compression method: {method}")
            }
            Self::OutputTooSmall { needed, capacity } => write!(
                f,
                "decoded block needs {needed} bytes but buffer holds {capacity}"
            ),
            Self::SizeMismatch { expected, actual } => write!(
                f,
                "decoded size mismatch: expected {expected} bytes, got {actual}"
            ),
            Self::Truncated => write!(f, "compressed block is truncated"),
            Self::Corrupt { detail } => write!(f, "corrupt compressed block: {detail}"),
            Self::Backend { code } => write!(f, "codec error code {code}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Why a [`ChunkBlockDecodeRequest`](super::ChunkBlockDecodeRequest) is not valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidRequest {
    MissingCallback,
    EmptyEncodedBlock,
    EmptyDecodedBlock,
}

impl fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCallback => write!(f, "no completion callback bound"),
            Self::EmptyEncodedBlock => write!(f, "encoded block is empty"),
            Self::EmptyDecodedBlock => write!(f, "destination buffer is empty"),
        }
    }
}

impl std::error::Error for InvalidRequest {}
