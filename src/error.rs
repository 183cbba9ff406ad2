//! Frame decode errors.
//!
//! Decoding is the fallible step of the frame pipeline; past it only a canvas
//! too large for `u32` can fail, reported as `DimensionsOverflow`. Callers
//! match on `DecodeError` to decide whether a frame is dropped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame payload truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame header of {0} bytes exceeds the {max} byte limit", max = crate::wire::MAX_HEADER_BYTES)]
    HeaderTooLarge(usize),

    #[error("invalid frame header: {0}")]
    InvalidHeader(#[from] serde_json::Error),

    #[error("unsupported image encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("{encoding} frame length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        encoding: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("row stride {step} is smaller than the {min} bytes a row needs")]
    StepTooSmall { step: u32, min: u32 },

    #[error("frame dimensions overflow")]
    DimensionsOverflow,

    #[error("frame has zero width or height")]
    EmptyImage,

    #[error("frame data of {0} bytes exceeds the {max} byte limit", max = crate::wire::MAX_DATA_BYTES)]
    DataTooLarge(usize),

    #[error("compressed frame could not be decoded: {0}")]
    Compressed(#[from] image::ImageError),
}
