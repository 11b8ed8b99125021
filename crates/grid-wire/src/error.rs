//! Errors from the wire codec and stream framing.

use thiserror::Error;

/// Errors produced while encoding, decoding or framing messages.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR encode error: {0}")]
    Encode(String),
    /// The input ends before the frame does.
    #[error("Truncated frame")]
    Truncated,
    #[error("Malformed CBOR: {0}")]
    Malformed(String),
    #[error("Frame is not a tagged item")]
    NotTagged,
    #[error("Invalid grid tag number: expected {expected:#x}, got {found:#x}")]
    TagMismatch { expected: u64, found: u64 },
    #[error("Tag content is not an array")]
    NotAnArray,
    #[error("Invalid array length: expected {expected}, got {found}")]
    Arity { expected: usize, found: usize },
    #[error("Field '{field}' is not a byte string")]
    FieldType { field: &'static str },
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },
}

impl WireError {
    /// True for errors caused by the bytes received rather than the transport.
    pub fn is_decode_error(&self) -> bool {
        !matches!(self, WireError::Io(_) | WireError::Encode(_))
    }
}
