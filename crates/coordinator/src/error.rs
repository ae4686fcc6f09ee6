//! Error types for the coordinator

use thiserror::Error;
use txngate_common::TxnId;

/// Coordinator error types
#[derive(Debug, Error)]
pub enum TxnError {
    /// The transaction is unknown to this instance: never started here,
    /// already finalized, or reclaimed by reconciliation.
    #[error("transaction session not found: {0}")]
    SessionNotFound(TxnId),

    /// Transaction support is switched off in the configuration.
    #[error("transaction support is disabled")]
    Disabled,

    #[error("store error: {0}")]
    Store(#[from] txngate_store::StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, TxnError>;
