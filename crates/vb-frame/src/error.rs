//! Frame construction and codec error types.

use thiserror::Error;

/// Errors raised while building, encoding or decoding CAN frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("standard identifier 0x{id:X} exceeds 0x7FF")]
    StandardIdOutOfRange { id: u32 },

    #[error("extended identifier 0x{id:X} exceeds 0x1FFFFFFF")]
    ExtendedIdOutOfRange { id: u32 },

    #[error("payload of {len} bytes exceeds 8")]
    PayloadTooLong { len: usize },

    #[error("wire block has {len} bytes, expected 16")]
    WireLength { len: usize },

    #[error("not an error frame")]
    NotErrorFrame,
}

/// Convenience alias for frame results.
pub type FrameResult<T> = Result<T, FrameError>;
