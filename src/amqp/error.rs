//! Frame codec error types

use thiserror::Error;

use super::frame::FrameType;

/// Result type for frame codec operations
pub type Result<T> = std::result::Result<T, FrameError>;

/// Frame decode/encode errors
///
/// Every variant is local to the chunk being decoded. The relay never treats
/// these as connection failures.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Source ended before a complete frame was read
    #[error("truncated frame: {0}")]
    Truncated(#[source] std::io::Error),

    /// I/O error on the destination (or a non-EOF source error)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header, body or heartbeat frame (recognised, not decoded)
    #[error("{0:?} frame, ignored")]
    IgnoredFrameType(FrameType),

    /// Frame type byte outside the protocol
    #[error("frame could not be parsed: unknown frame type {0}")]
    UnparseableFrameType(u8),

    /// (class, method) pair outside the supported catalog
    #[error("bad method frame, unknown method {method_id} for class {class_id}")]
    UnknownMethod { class_id: u16, method_id: u16 },

    /// Trailer byte was not the frame-end sentinel
    #[error("missing frame end: found {0:#04x}")]
    MissingFrameEnd(u8),

    /// Chunk holds more than one frame
    #[error("{0} trailing bytes after frame end")]
    TrailingBytes(usize),

    /// Payload does not fit the 32-bit size field
    #[error("payload of {0} bytes exceeds frame size field")]
    PayloadTooLarge(usize),
}

impl FrameError {
    /// Map a read error, separating short input from real I/O failures
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Truncated(err)
        } else {
            Self::Io(err)
        }
    }
}
