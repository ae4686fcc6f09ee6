//! Payload codecs
//!
//! Each frame carries a codec tag so payload encoding can evolve without
//! touching the framing. JSON is the only codec today; the tag space leaves
//! room for a binary codec later.

use crate::error::WireError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload encoding negotiated per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Json,
}

impl CodecKind {
    /// Wire tag for this codec.
    pub fn tag(self) -> u32 {
        match self {
            CodecKind::Json => 0,
        }
    }

    /// Resolve a wire tag.
    pub fn from_tag(tag: u32) -> Result<Self, WireError> {
        match tag {
            0 => Ok(CodecKind::Json),
            other => Err(WireError::UnknownCodec(other)),
        }
    }

    /// Encode a payload value.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, WireError> {
        match self {
            CodecKind::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decode a payload value.
    pub fn decode<T: DeserializeOwned>(self, payload: &[u8]) -> Result<T, WireError> {
        match self {
            CodecKind::Json => Ok(serde_json::from_slice(payload)?),
        }
    }
}
