//! RPC operation envelopes
//!
//! Every request to the coordinator is one of two commands: `RDBOperation`
//! carrying an opcode-tagged body, or `WatchTransaction` opening a stream of
//! transaction state-change events. The envelope header travels inside the
//! payload so the framing layer stays ignorant of operation semantics.

use serde::{Deserialize, Serialize};
use txngate_common::{Document, Filter, Opcode, TxnId, TxnToken};

pub use txngate_common::DdlCommand;

/// Multiplexed data/transaction-control command.
pub const CMD_RDB_OPERATION: &str = "RDBOperation";

/// Server-push stream of transaction state-change events.
pub const CMD_WATCH_TRANSACTION: &str = "WatchTransaction";

/// Reply codes surfaced to callers.
pub mod reply_code {
    pub const OK: u32 = 0;
    /// Opcode or command the dispatcher does not know.
    pub const NOT_SUPPORTED: u32 = 4001;
    /// Unknown or already-finalized transaction.
    pub const SESSION_NOT_FOUND: u32 = 4002;
    /// The underlying document store failed the operation.
    pub const STORE_ERROR: u32 = 4003;
    /// The envelope could not be decoded.
    pub const BAD_REQUEST: u32 = 4004;
}

/// Common envelope header carried by every operation body.
///
/// `txn_id = None` means "run outside any transaction, against the ambient
/// session".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MsgHeader {
    pub op_code: Option<Opcode>,
    #[serde(default)]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<TxnId>,
}

impl MsgHeader {
    pub fn new(op_code: Opcode) -> Self {
        Self {
            op_code: Some(op_code),
            ..Default::default()
        }
    }

    /// Stamp transaction identity from a propagation token.
    pub fn with_token(mut self, token: &TxnToken) -> Self {
        self.request_id = token.request_id.clone();
        self.txn_id = Some(token.txn_id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpInsert {
    pub header: MsgHeader,
    pub collection: String,
    pub docs: Vec<Document>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpUpdate {
    pub header: MsgHeader,
    pub collection: String,
    pub selector: Filter,
    pub doc: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpDelete {
    pub header: MsgHeader,
    pub collection: String,
    pub selector: Filter,
}

/// Sort key; `descending = true` flips the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpFind {
    pub header: MsgHeader,
    pub collection: String,
    pub selector: Filter,
    /// Projection: empty means all fields.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub sort: Vec<SortField>,
    #[serde(default)]
    pub start: u64,
    /// Zero means no limit.
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpFindAndModify {
    pub header: MsgHeader,
    pub collection: String,
    pub selector: Filter,
    pub doc: Document,
    #[serde(default)]
    pub upsert: bool,
    #[serde(default)]
    pub remove: bool,
    #[serde(default)]
    pub return_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpCount {
    pub header: MsgHeader,
    pub collection: String,
    pub selector: Filter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpDdl {
    pub header: MsgHeader,
    pub collection: String,
    pub command: DdlCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpStartTransaction {
    pub header: MsgHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpCommit {
    pub header: MsgHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpAbort {
    pub header: MsgHeader,
}

/// Uniform response body for `RDBOperation` calls.
///
/// All failures are values: a false `success` plus a code from
/// [`reply_code`] and a human-readable message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub docs: Vec<Document>,
    #[serde(default)]
    pub count: u64,
    /// Present on a successful `StartTransaction`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn: Option<TxnToken>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn with_docs(docs: Vec<Document>) -> Self {
        Self {
            docs,
            ..Self::ok()
        }
    }

    pub fn with_count(count: u64) -> Self {
        Self {
            count,
            ..Self::ok()
        }
    }

    pub fn with_token(token: TxnToken) -> Self {
        Self {
            txn: Some(token),
            ..Self::ok()
        }
    }

    pub fn fail(code: u32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Body of an `Error` frame: protocol-level failures such as an unknown
/// command or an undecodable payload. The connection stays usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u32,
    pub message: String,
}

impl ErrorPayload {
    pub const COMMAND_NOT_FOUND: u32 = 1001;
    pub const DECODE_FAILED: u32 = 1002;

    pub fn command_not_found(cmd: &str) -> Self {
        Self {
            code: Self::COMMAND_NOT_FOUND,
            message: format!("command not supported: {cmd}"),
        }
    }

    pub fn decode_failed(detail: impl std::fmt::Display) -> Self {
        Self {
            code: Self::DECODE_FAILED,
            message: format!("decode failed: {detail}"),
        }
    }
}

/// Peek the opcode tag out of an encoded `RDBOperation` payload without
/// committing to a typed body.
pub fn peek_opcode(payload: &serde_json::Value) -> Option<Opcode> {
    let tag = payload.get("header")?.get("op_code")?;
    serde_json::from_value(tag.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_opcode_from_envelope() {
        let op = OpCount {
            header: MsgHeader::new(Opcode::Count),
            collection: "hosts".into(),
            selector: Filter::new(),
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(peek_opcode(&value), Some(Opcode::Count));
    }

    #[test]
    fn peek_opcode_missing_header() {
        let value = serde_json::json!({"collection": "hosts"});
        assert_eq!(peek_opcode(&value), None);
    }

    #[test]
    fn reply_failure_is_a_value() {
        let reply = Reply::fail(reply_code::SESSION_NOT_FOUND, "session not found");
        let back: Reply =
            serde_json::from_slice(&serde_json::to_vec(&reply).unwrap()).unwrap();
        assert!(!back.success);
        assert_eq!(back.code, reply_code::SESSION_NOT_FOUND);
    }

    #[test]
    fn header_from_token() {
        let token = TxnToken::new("r1".into(), TxnId::new(), "1.2.3.4:50010".into());
        let header = MsgHeader::new(Opcode::Insert).with_token(&token);
        assert_eq!(header.txn_id, Some(token.txn_id));
        assert_eq!(header.request_id, "r1");
    }
}
