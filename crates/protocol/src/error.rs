//! Wire-level error types

use thiserror::Error;

/// Errors raised while encoding or decoding frames and payloads.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("bad magic 0x{0:04x}")]
    BadMagic(u16),

    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    #[error("unknown codec tag {0}")]
    UnknownCodec(u32),

    #[error("command name exceeds {max} bytes: {len}", max = crate::CMD_LEN)]
    CommandTooLong { len: usize },

    #[error("command name is not valid UTF-8")]
    CommandNotUtf8,

    #[error("payload of {0} bytes exceeds limit")]
    PayloadTooLarge(usize),

    #[error("frame size {size} does not match header + payload length {expected}")]
    SizeMismatch { size: u32, expected: u32 },

    #[error("truncated frame: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
