//! Binary wire protocol for the txngate RPC channel
//!
//! Defines the framed [`Message`] unit that flows over a connection, the
//! payload codec negotiated per message, and the typed operation envelopes
//! the coordinator's dispatcher consumes. The transport layer owns the
//! socket; this crate is purely about bytes.

mod codec;
mod error;
mod message;
mod ops;

pub use codec::CodecKind;
pub use error::WireError;
pub use message::{FrameHeader, Message, MessageType, CMD_LEN, HEADER_LEN, MAGIC, MAX_PAYLOAD};
pub use ops::{
    peek_opcode, reply_code, DdlCommand, ErrorPayload, MsgHeader, OpAbort, OpCommit, OpCount,
    OpDdl, OpDelete, OpFind, OpFindAndModify, OpInsert, OpStartTransaction, OpUpdate, Reply,
    SortField, CMD_RDB_OPERATION, CMD_WATCH_TRANSACTION,
};
