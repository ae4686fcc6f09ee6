//! Framed wire message
//!
//! Frame layout, all integers little-endian:
//!
//! ```text
//! magic(u16) | seq(u32) | type(u32) | cmd([u8; 40]) | codec(u32)
//!           | size(u32) | payload_len(u32) | payload(bytes)
//! ```
//!
//! `size` is the total frame length including the fixed header, so a reader
//! can cross-check it against `payload_len` before trusting either. The
//! command name is NUL-padded UTF-8.

use crate::codec::CodecKind;
use crate::error::WireError;
use bytes::{Buf, BufMut, BytesMut};

/// Protocol magic, first two bytes of every frame.
pub const MAGIC: u16 = 0x5854;

/// Fixed width of the command-name field.
pub const CMD_LEN: usize = 40;

/// Length of the fixed frame header.
pub const HEADER_LEN: usize = 2 + 4 + 4 + CMD_LEN + 4 + 4 + 4;

/// Upper bound on a single payload; a peer announcing more is broken.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Error,
    Close,
    Ping,
    Stream,
    StreamClose,
}

impl MessageType {
    pub fn as_u32(self) -> u32 {
        match self {
            MessageType::Request => 1,
            MessageType::Response => 2,
            MessageType::Error => 3,
            MessageType::Close => 4,
            MessageType::Ping => 5,
            MessageType::Stream => 6,
            MessageType::StreamClose => 7,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self, WireError> {
        Ok(match value {
            1 => MessageType::Request,
            2 => MessageType::Response,
            3 => MessageType::Error,
            4 => MessageType::Close,
            5 => MessageType::Ping,
            6 => MessageType::Stream,
            7 => MessageType::StreamClose,
            other => return Err(WireError::UnknownMessageType(other)),
        })
    }
}

/// One unit on the wire.
///
/// `seq` correlates requests with responses: every `Request` eventually
/// yields exactly one terminal `Response`/`Error` carrying the same `seq`,
/// or the connection is considered broken. `Stream`/`StreamClose` frames
/// share the `seq` of the request that opened the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub seq: u32,
    pub typ: MessageType,
    pub cmd: String,
    pub codec: CodecKind,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn request(seq: u32, cmd: &str, payload: Vec<u8>) -> Self {
        Self {
            seq,
            typ: MessageType::Request,
            cmd: cmd.to_string(),
            codec: CodecKind::Json,
            payload,
        }
    }

    pub fn response(seq: u32, cmd: &str, payload: Vec<u8>) -> Self {
        Self {
            typ: MessageType::Response,
            ..Self::request(seq, cmd, payload)
        }
    }

    pub fn error(seq: u32, cmd: &str, payload: Vec<u8>) -> Self {
        Self {
            typ: MessageType::Error,
            ..Self::request(seq, cmd, payload)
        }
    }

    pub fn ping(seq: u32) -> Self {
        Self {
            typ: MessageType::Ping,
            ..Self::request(seq, "ping", Vec::new())
        }
    }

    pub fn close(seq: u32) -> Self {
        Self {
            typ: MessageType::Close,
            ..Self::request(seq, "close", Vec::new())
        }
    }

    pub fn stream(seq: u32, cmd: &str, payload: Vec<u8>) -> Self {
        Self {
            typ: MessageType::Stream,
            ..Self::request(seq, cmd, payload)
        }
    }

    pub fn stream_close(seq: u32, cmd: &str) -> Self {
        Self {
            typ: MessageType::StreamClose,
            ..Self::request(seq, cmd, Vec::new())
        }
    }

    /// Encode this message into `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), WireError> {
        let cmd_bytes = self.cmd.as_bytes();
        if cmd_bytes.len() > CMD_LEN {
            return Err(WireError::CommandTooLong {
                len: cmd_bytes.len(),
            });
        }
        if self.payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }

        dst.reserve(HEADER_LEN + self.payload.len());
        dst.put_u16_le(MAGIC);
        dst.put_u32_le(self.seq);
        dst.put_u32_le(self.typ.as_u32());
        dst.put_slice(cmd_bytes);
        dst.put_bytes(0, CMD_LEN - cmd_bytes.len());
        dst.put_u32_le(self.codec.tag());
        dst.put_u32_le((HEADER_LEN + self.payload.len()) as u32);
        dst.put_u32_le(self.payload.len() as u32);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Result<BytesMut, WireError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decode a complete frame from `buf`. The buffer must hold exactly one
    /// frame's header plus its payload; streaming readers should first parse
    /// the header with [`FrameHeader::decode`] to learn the payload length.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let header = FrameHeader::decode(buf)?;
        let need = HEADER_LEN + header.payload_len as usize;
        if buf.len() < need {
            return Err(WireError::Truncated {
                need,
                have: buf.len(),
            });
        }
        let payload = buf[HEADER_LEN..need].to_vec();
        Ok(header.into_message(payload))
    }
}

/// Parsed fixed-size frame header.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub seq: u32,
    pub typ: MessageType,
    pub cmd: String,
    pub codec: CodecKind,
    pub payload_len: u32,
}

impl FrameHeader {
    /// Decode the fixed header from the first [`HEADER_LEN`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                need: HEADER_LEN,
                have: buf.len(),
            });
        }
        let mut buf = &buf[..HEADER_LEN];

        let magic = buf.get_u16_le();
        if magic != MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        let seq = buf.get_u32_le();
        let typ = MessageType::from_u32(buf.get_u32_le())?;

        let mut cmd_bytes = [0u8; CMD_LEN];
        buf.copy_to_slice(&mut cmd_bytes);
        let cmd_end = cmd_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(CMD_LEN);
        let cmd = std::str::from_utf8(&cmd_bytes[..cmd_end])
            .map_err(|_| WireError::CommandNotUtf8)?
            .to_string();

        let codec = CodecKind::from_tag(buf.get_u32_le())?;
        let size = buf.get_u32_le();
        let payload_len = buf.get_u32_le();

        if payload_len as usize > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload_len as usize));
        }
        let expected = HEADER_LEN as u32 + payload_len;
        if size != expected {
            return Err(WireError::SizeMismatch { size, expected });
        }

        Ok(Self {
            seq,
            typ,
            cmd,
            codec,
            payload_len,
        })
    }

    /// Combine with the payload read after the header.
    pub fn into_message(self, payload: Vec<u8>) -> Message {
        Message {
            seq: self.seq,
            typ: self.typ,
            cmd: self.cmd,
            codec: self.codec,
            payload,
        }
    }
}
