//! Transaction propagation token
//!
//! The token is how a transaction crosses service boundaries: the service
//! that started it embeds the token into downstream request metadata, and
//! the receiving service directs its operations at the recorded processor,
//! which is the only coordinator instance holding the live store session.

use crate::TxnId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata key under which a serialized token travels between services.
pub const TXN_TOKEN_HEADER: &str = "x-txngate-txn";

/// Errors produced when decoding a token from request metadata.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed transaction token: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Opaque carrier of a transaction's identity across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnToken {
    /// Caller-supplied correlation ID, may be empty.
    #[serde(default)]
    pub request_id: String,
    /// The transaction being joined.
    pub txn_id: TxnId,
    /// Address of the coordinator instance owning the store session.
    pub processor: String,
}

impl TxnToken {
    pub fn new(request_id: String, txn_id: TxnId, processor: String) -> Self {
        Self {
            request_id,
            txn_id,
            processor,
        }
    }

    /// Serialize into a single metadata header value.
    pub fn to_header_value(&self) -> String {
        // A struct of strings cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode from a metadata header value produced by `to_header_value`.
    pub fn from_header_value(value: &str) -> Result<Self, TokenError> {
        Ok(serde_json::from_str(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let token = TxnToken::new("req-42".into(), TxnId::new(), "10.0.0.7:50010".into());
        let header = token.to_header_value();
        let back = TxnToken::from_header_value(&header).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(TxnToken::from_header_value("{not json").is_err());
    }
}
