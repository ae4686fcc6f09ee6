//! Shared types for the txngate transaction coordinator
//!
//! Everything in this crate crosses at least one boundary: the wire, the
//! persisted transaction registry, or the request metadata used to join an
//! in-flight transaction from another service.

mod ddl;
mod opcode;
mod record;
mod token;
mod txn_id;

pub use ddl::DdlCommand;
pub use opcode::Opcode;
pub use record::{TxnRecord, TxnStatus};
pub use token::{TokenError, TxnToken, TXN_TOKEN_HEADER};
pub use txn_id::TxnId;

/// Collection holding persisted transaction records.
pub const TXN_COLLECTION: &str = "txn_records";

/// A document as stored and queried: a JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// A filter is a document matched by top-level field equality.
pub type Filter = Document;

/// Build a [`Document`] from key/value pairs, mostly for tests and examples.
pub fn doc(fields: &[(&str, serde_json::Value)]) -> Document {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
