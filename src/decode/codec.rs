//! Block decode primitive.
//!
//! The scheduler treats decoding as a pure function
//! `(params, encoded) -> bytes written into decoded`. [`BlockCodec`] is that
//! function; [`StandardCodec`] handles the built-in compression methods and
//! any matching closure works as a codec too.
//!
//! # Caller Expectations
//! - `decoded` is sized by the producer; the codec never grows it.
//! - A successful decode writes exactly `params.block_size` bytes.
//! - Codecs must not call back into the decoder.

use std::cell::RefCell;

use flate2::{Decompress, FlushDecompress, Status};

use super::error::DecodeError;
use super::request::{CompressionMethod, DecodeParams, DecodeResult};

/// Decodes one block into a caller-supplied buffer.
pub trait BlockCodec: Send + Sync + 'static {
    fn decode_block(
        &self,
        params: &DecodeParams,
        encoded: &[u8],
        decoded: &mut [u8],
    ) -> DecodeResult;
}

impl<F> BlockCodec for F
where
    F: Fn(&DecodeParams, &[u8], &mut [u8]) -> DecodeResult + Send + Sync + 'static,
{
    #[inline]
    fn decode_block(
        &self,
        params: &DecodeParams,
        encoded: &[u8],
        decoded: &mut [u8],
    ) -> DecodeResult {
        self(params, encoded, decoded)
    }
}

thread_local! {
    static RAW_INFLATE: RefCell<Decompress> = RefCell::new(Decompress::new(false));
    static ZLIB_INFLATE: RefCell<Decompress> = RefCell::new(Decompress::new(true));
}

/// Codec for [`CompressionMethod::None`], [`CompressionMethod::Deflate`] and
/// [`CompressionMethod::Zlib`].
///
/// Inflate state is kept per thread and reset per block, so steady-state
/// decoding does not allocate. `Custom` methods are rejected with
/// [`DecodeError::UnsupportedMethod`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardCodec;

impl StandardCodec {
    pub const fn new() -> Self {
        Self
    }
}

impl BlockCodec for StandardCodec {
    fn decode_block(
        &self,
        params: &DecodeParams,
        encoded: &[u8],
        decoded: &mut [u8],
    ) -> DecodeResult {
        let block_size = params.block_size as usize;
        if block_size > decoded.len() {
            return Err(DecodeError::OutputTooSmall {
                needed: block_size,
                capacity: decoded.len(),
            });
        }
        let out = &mut decoded[..block_size];

        match params.method {
            CompressionMethod::None => {
                if encoded.len() != block_size {
                    return Err(DecodeError::SizeMismatch {
                        expected: block_size,
                        actual: encoded.len(),
                    });
                }
                out.copy_from_slice(encoded);
                Ok(block_size)
            }
            CompressionMethod::Deflate => {
                with_inflate(false, |de| inflate_exact(de, encoded, out))
            }
            CompressionMethod::Zlib => with_inflate(true, |de| inflate_exact(de, encoded, out)),
            method @ CompressionMethod::Custom(_) => Err(DecodeError::UnsupportedMethod(method)),
        }
    }
}

/// Runs `f` with this thread's inflate state for one format, freshly reset.
///
/// Not re-entrant on the same thread.
fn with_inflate<F>(zlib_header: bool, f: F) -> DecodeResult
where
    F: FnOnce(&mut Decompress) -> DecodeResult,
{
    let state = if zlib_header {
        &ZLIB_INFLATE
    } else {
        &RAW_INFLATE
    };
    state.with(|de| {
        let mut de = de.borrow_mut();
        de.reset(zlib_header);
        f(&mut de)
    })
}

/// Inflates `input` into `out`, requiring the stream to end exactly when
/// `out` is full.
fn inflate_exact(de: &mut Decompress, input: &[u8], out: &mut [u8]) -> DecodeResult {
    let expected = out.len();

    loop {
        let in_pos = de.total_in() as usize;
        let out_pos = de.total_out() as usize;

        let status = de
            .decompress(&input[in_pos..], &mut out[out_pos..], FlushDecompress::None)
            .map_err(|err| DecodeError::Corrupt {
                detail: err.to_string(),
            })?;

        let produced = de.total_out() as usize;
        match status {
            Status::StreamEnd => {
                if produced != expected {
                    return Err(DecodeError::SizeMismatch {
                        expected,
                        actual: produced,
                    });
                }
                return Ok(produced);
            }
            Status::Ok | Status::BufError => {
                let progressed = de.total_in() as usize != in_pos || produced != out_pos;
                if progressed {
                    continue;
                }
                if produced == expected {
                    return Err(DecodeError::Corrupt {
                        detail: format!("stream inflates past block size {expected}"),
                    });
                }
                return Err(DecodeError::Truncated);
            }
        }
    }
}
