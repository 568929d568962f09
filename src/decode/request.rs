//! Decode request and result value types.
//!
//! A [`ChunkBlockDecodeRequest`] carries everything one decode step needs:
//! encoding metadata, the compressed bytes, a pre-sized destination buffer
//! and a one-shot completion callback. The callback receives the buffers back
//! together with the outcome and answers with a [`Chain`]: either the chain
//! ends, or it hands over the next request (typically the next block of the
//! same multi-block read).
//!
//! ```text
//!   producer ──► ChunkBlockDecodeRequest ──► decode ──► on_decoded(completion)
//!                        ▲                                      │
//!                        └────────── Chain::Continue(next) ◄────┘
//! ```

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use super::error::{DecodeError, InvalidRequest};

/// Compression algorithm of an encoded block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Stored; decoding is a copy.
    #[default]
    None,
    /// Raw DEFLATE stream.
    Deflate,
    /// DEFLATE with zlib header and checksum.
    Zlib,
    /// Method id handled by an external codec.
    Custom(u16),
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Deflate => write!(f, "deflate"),
            Self::Zlib => write!(f, "zlib"),
            Self::Custom(id) => write!(f, "custom({id})"),
        }
    }
}

/// Immutable encoding metadata for one block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeParams {
    pub method: CompressionMethod,
    /// Container-defined format tag, passed through to the codec untouched.
    pub format_tag: u32,
    /// Decoded size of this block in bytes.
    pub block_size: u32,
}

impl DecodeParams {
    pub const fn new(method: CompressionMethod, block_size: u32) -> Self {
        Self {
            method,
            format_tag: 0,
            block_size,
        }
    }

    pub const fn with_format_tag(mut self, format_tag: u32) -> Self {
        self.format_tag = format_tag;
        self
    }
}

/// Read-only view of compressed bytes.
///
/// Cheap to clone; several blocks of one read can share a single buffer via
/// [`EncodedBlock::slice`].
#[derive(Clone)]
pub struct EncodedBlock {
    bytes: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl EncodedBlock {
    pub fn new(bytes: Arc<[u8]>) -> Self {
        let len = bytes.len();
        Self {
            bytes,
            offset: 0,
            len,
        }
    }

    /// Sub-view sharing the same buffer.
    ///
    /// # Panics
    /// If `range` is out of bounds for this view.
    pub fn slice(&self, range: Range<usize>) -> Self {
        assert!(
            range.start <= range.end && range.end <= self.len,
            "encoded block slice {range:?} out of bounds (len {})",
            self.len
        );
        Self {
            bytes: Arc::clone(&self.bytes),
            offset: self.offset + range.start,
            len: range.end - range.start,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.offset..self.offset + self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for EncodedBlock {
    fn default() -> Self {
        Self::new(Arc::from(Vec::new()))
    }
}

impl From<Vec<u8>> for EncodedBlock {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(Arc::from(bytes))
    }
}

impl From<&[u8]> for EncodedBlock {
    fn from(bytes: &[u8]) -> Self {
        Self::new(Arc::from(bytes))
    }
}

impl fmt::Debug for EncodedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedBlock")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// Destination buffer, sized by the producer before enqueueing.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DecodedBlock {
    bytes: Vec<u8>,
}

impl DecodedBlock {
    /// Zero-filled buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for DecodedBlock {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl fmt::Debug for DecodedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedBlock")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Outcome of one decode call: bytes written, or why it failed.
pub type DecodeResult = Result<usize, DecodeError>;

/// Everything handed to the completion callback.
#[derive(Debug)]
pub struct DecodeCompletion {
    pub params: DecodeParams,
    pub encoded: EncodedBlock,
    pub decoded: DecodedBlock,
    pub result: DecodeResult,
}

impl DecodeCompletion {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The decoded bytes on success.
    ///
    /// `None` on failure, or if the written count runs past the buffer.
    pub fn output(&self) -> Option<&[u8]> {
        match self.result {
            Ok(written) => self.decoded.as_slice().get(..written),
            Err(_) => None,
        }
    }
}

/// What a completion callback asks for next.
#[derive(Debug)]
pub enum Chain {
    /// The chain ends here.
    Done,
    /// Decode this request next, on the same task if the job cap allows.
    Continue(ChunkBlockDecodeRequest),
}

impl Chain {
    pub fn into_next(self) -> Option<ChunkBlockDecodeRequest> {
        match self {
            Self::Done => None,
            Self::Continue(next) => Some(next),
        }
    }
}

/// One-shot completion callback.
pub type OnDecoded = Box<dyn FnOnce(DecodeCompletion) -> Chain + Send + 'static>;

/// Unit of decode work.
#[derive(Default)]
pub struct ChunkBlockDecodeRequest {
    params: DecodeParams,
    encoded: EncodedBlock,
    decoded: DecodedBlock,
    on_decoded: Option<OnDecoded>,
}

impl ChunkBlockDecodeRequest {
    pub fn new<F>(
        params: DecodeParams,
        encoded: EncodedBlock,
        decoded: DecodedBlock,
        on_decoded: F,
    ) -> Self
    where
        F: FnOnce(DecodeCompletion) -> Chain + Send + 'static,
    {
        Self {
            params,
            encoded,
            decoded,
            on_decoded: Some(Box::new(on_decoded)),
        }
    }

    /// Request with no callback yet. Not valid until [`bind`](Self::bind) is called.
    pub fn unbound(params: DecodeParams, encoded: EncodedBlock, decoded: DecodedBlock) -> Self {
        Self {
            params,
            encoded,
            decoded,
            on_decoded: None,
        }
    }

    /// Binds (or replaces) the completion callback.
    pub fn bind<F>(mut self, on_decoded: F) -> Self
    where
        F: FnOnce(DecodeCompletion) -> Chain + Send + 'static,
    {
        self.on_decoded = Some(Box::new(on_decoded));
        self
    }

    #[inline]
    pub fn params(&self) -> &DecodeParams {
        &self.params
    }

    #[inline]
    pub fn encoded(&self) -> &EncodedBlock {
        &self.encoded
    }

    #[inline]
    pub fn decoded(&self) -> &DecodedBlock {
        &self.decoded
    }

    /// Checks that every field a decode step needs is populated.
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.on_decoded.is_none() {
            return Err(InvalidRequest::MissingCallback);
        }
        if self.encoded.is_empty() {
            return Err(InvalidRequest::EmptyEncodedBlock);
        }
        if self.decoded.is_empty() {
            return Err(InvalidRequest::EmptyDecodedBlock);
        }
        Ok(())
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (DecodeParams, EncodedBlock, DecodedBlock, Option<OnDecoded>) {
        (self.params, self.encoded, self.decoded, self.on_decoded)
    }
}

impl fmt::Debug for ChunkBlockDecodeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBlockDecodeRequest")
            .field("params", &self.params)
            .field("encoded", &self.encoded)
            .field("decoded", &self.decoded)
            .field("bound", &self.on_decoded.is_some())
            .finish()
    }
}
