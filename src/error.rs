//! Error types for JBIG2 decoding.

use core::fmt;

/// The error type for all JBIG2 decoding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The file header signature is missing or no stream configuration parses.
    InvalidHeader,
    /// A segment header or segment data part is malformed.
    InvalidSegment,
    /// A read crossed the end of the input buffer.
    TruncatedStream,
    /// The arithmetic decoder was drained before an expected bit.
    DecoderComplete,
    /// A declared or refined dimension exceeds the 65 535 pixel cap or would
    /// overflow arithmetic.
    DimensionOverflow,
    /// The stream is structurally inconsistent: a region segment outside a
    /// page, a missing referred dictionary or Huffman table, or a symbol
    /// reference out of range.
    LogicError,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHeader => write!(f, "invalid JBIG2 file header"),
            Self::InvalidSegment => write!(f, "malformed segment"),
            Self::TruncatedStream => write!(f, "unexpected end of input"),
            Self::DecoderComplete => write!(f, "arithmetic decoder drained prematurely"),
            Self::DimensionOverflow => write!(f, "image dimension too large"),
            Self::LogicError => write!(f, "inconsistent segment stream"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// Result type for JBIG2 decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;
