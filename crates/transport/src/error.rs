//! Transport error types

use thiserror::Error;
use txngate_protocol::WireError;

/// Errors surfaced by transport sessions.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("stream closed")]
    StreamClosed,

    #[error("remote error {code}: {message}")]
    Remote { code: u32, message: String },
}

impl TransportError {
    /// Whether this error means the request may simply have been slow, as
    /// opposed to the connection being unusable.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
