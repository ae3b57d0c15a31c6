use std::io;

use enough::StopReason;

use crate::pixel::PixelFormat;

/// Errors from PNG decoding and encoding.
///
/// Every variant is fatal for the operation that produced it. A decode
/// session that returns one of these moves to [`crate::ReadState::Error`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PngError {
    #[error("not a PNG stream (signature mismatch)")]
    NotPng,

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("corrupt image data: {0}")]
    CorruptData(String),

    #[error("failed to allocate {width}x{height} {format:?} buffer")]
    AllocationFailure {
        width: u32,
        height: u32,
        format: PixelFormat,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("stream read failed: {0}")]
    StreamRead(#[source] io::Error),

    #[error("stream write failed: {0}")]
    StreamWrite(#[source] io::Error),

    #[error("invalid pixel buffer: {0}")]
    InvalidBuffer(String),

    #[error("buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("pixel format mismatch: expected {expected:?}, got {actual:?}")]
    LayoutMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    #[error("decode session is in the error state")]
    SessionFailed,

    #[error("operation cancelled")]
    Cancelled(StopReason),
}

impl From<StopReason> for PngError {
    fn from(r: StopReason) -> Self {
        PngError::Cancelled(r)
    }
}

impl PngError {
    /// Map a codec error raised while parsing chunks ahead of the image data.
    pub(crate) fn from_header(err: png::DecodingError) -> Self {
        match err {
            png::DecodingError::IoError(e) => PngError::StreamRead(e),
            png::DecodingError::LimitsExceeded => {
                PngError::LimitExceeded("codec memory limit".into())
            }
            other => PngError::MalformedHeader(other.to_string()),
        }
    }

    /// Map a codec error raised while streaming rows or reading the trailer.
    pub(crate) fn from_body(err: png::DecodingError) -> Self {
        match err {
            png::DecodingError::IoError(e) => PngError::StreamRead(e),
            png::DecodingError::LimitsExceeded => {
                PngError::LimitExceeded("codec memory limit".into())
            }
            other => PngError::CorruptData(other.to_string()),
        }
    }

    pub(crate) fn from_encoding(err: png::EncodingError) -> Self {
        match err {
            png::EncodingError::IoError(e) => PngError::StreamWrite(e),
            other => PngError::InvalidBuffer(other.to_string()),
        }
    }
}

/// Non-fatal conditions. Reported through [`crate::Diagnostics`]; the
/// operation continues with a defined fallback.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Warning {
    /// Palette larger than 256 entries. Decoded as direct color instead.
    #[error("palette has {entries} entries, decoding as direct color")]
    UnsupportedPalette { entries: usize },

    /// Embedded ICC profile rejected. Lower-precedence color chunks apply.
    #[error("failed to parse ICC profile: {0}")]
    ColorProfileParseFailure(String),

    /// Compression level above 9. Clamped to 9.
    #[error("compression level {requested} out of range, using 9")]
    CompressionLevelOutOfRange { requested: u32 },

    /// A compressed text chunk that could not be inflated. Skipped.
    #[error("unreadable text chunk {key:?}: {reason}")]
    UnreadableText { key: String, reason: String },
}
