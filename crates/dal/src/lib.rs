//! Data access facade
//!
//! Services talk to the coordinator through a [`Dal`]: a thin handle that
//! builds operation envelopes, routes them through the connection pool, and
//! carries transaction identity. An ambient `Dal` executes against the
//! store directly; calling [`Dal::start_transaction`] yields a new handle
//! whose operations all join one transaction, and whose token can travel to
//! another service via request metadata so both ends work inside the same
//! transaction.

mod table;
mod watch;

pub use table::{Find, FindAndModify, Table};
pub use watch::Watcher;

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use txngate_common::{DdlCommand, Filter, TokenError, TxnRecord, TxnToken, TXN_COLLECTION};
use txngate_pool::{Pool, PoolError};
use txngate_protocol::{
    reply_code, MsgHeader, OpAbort, OpCommit, OpDdl, OpStartTransaction, Reply,
    CMD_RDB_OPERATION, CMD_WATCH_TRANSACTION,
};

/// DAL error types
#[derive(Debug, Error)]
pub enum DalError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Token(#[from] TokenError),

    /// The coordinator answered, but refused the operation.
    #[error("operation failed (code {code}): {message}")]
    Op { code: u32, message: String },

    /// A reply document did not decode to the expected shape.
    #[error("malformed reply: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DalError {
    /// Whether the failure means the transaction no longer exists on the
    /// coordinator (finalized, reclaimed, or never started there).
    pub fn is_session_not_found(&self) -> bool {
        matches!(
            self,
            DalError::Op {
                code: reply_code::SESSION_NOT_FOUND,
                ..
            }
        )
    }
}

/// Result type for DAL operations.
pub type Result<T> = std::result::Result<T, DalError>;

/// Handle for issuing operations, ambient or transactional.
#[derive(Clone)]
pub struct Dal {
    pool: Arc<Pool>,
    token: Option<TxnToken>,
}

impl Dal {
    /// Ambient handle: operations execute outside any transaction.
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool, token: None }
    }

    /// Join a transaction started elsewhere, typically from a token pulled
    /// out of request metadata.
    pub fn join(pool: Arc<Pool>, token: TxnToken) -> Self {
        Self {
            pool,
            token: Some(token),
        }
    }

    /// Join from the serialized header value another service sent along.
    pub fn from_header(pool: Arc<Pool>, header_value: &str) -> Result<Self> {
        let token = TxnToken::from_header_value(header_value)?;
        Ok(Self::join(pool, token))
    }

    /// The transaction this handle participates in, if any.
    pub fn token(&self) -> Option<&TxnToken> {
        self.token.as_ref()
    }

    pub fn table(&self, name: &str) -> Table {
        Table::new(self.clone(), name)
    }

    /// Start a transaction and return a handle bound to it.
    ///
    /// Against a coordinator running in pass-through mode the reply carries
    /// no token and the returned handle stays ambient.
    pub async fn start_transaction(&self, request_id: &str) -> Result<Dal> {
        let mut header = MsgHeader::new(txngate_common::Opcode::StartTransaction);
        header.request_id = request_id.to_string();
        let reply = self.run(&OpStartTransaction { header }).await?;
        Ok(Self {
            pool: self.pool.clone(),
            token: reply.txn,
        })
    }

    /// Commit this handle's transaction. A no-op on an ambient handle.
    pub async fn commit(&self) -> Result<()> {
        let Some(token) = &self.token else {
            return Ok(());
        };
        let op = OpCommit {
            header: MsgHeader::new(txngate_common::Opcode::Commit).with_token(token),
        };
        self.run(&op).await?;
        Ok(())
    }

    /// Abort this handle's transaction. A no-op on an ambient handle.
    pub async fn abort(&self) -> Result<()> {
        let Some(token) = &self.token else {
            return Ok(());
        };
        let op = OpAbort {
            header: MsgHeader::new(txngate_common::Opcode::Abort).with_token(token),
        };
        self.run(&op).await?;
        Ok(())
    }

    /// Schema management; always executes ambiently.
    pub async fn ddl(&self, collection: &str, command: DdlCommand) -> Result<()> {
        let op = OpDdl {
            header: MsgHeader::new(txngate_common::Opcode::Ddl),
            collection: collection.to_string(),
            command,
        };
        self.run(&op).await?;
        Ok(())
    }

    /// Fetch the persisted record of this handle's transaction, or `None`
    /// on an ambient handle.
    pub async fn txn_info(&self) -> Result<Option<TxnRecord>> {
        let Some(token) = &self.token else {
            return Ok(None);
        };
        let mut filter = Filter::new();
        filter.insert(
            "txn_id".into(),
            serde_json::Value::String(token.txn_id.to_string()),
        );
        // records are read ambiently; they live outside any session
        let ambient = Dal::new(self.pool.clone());
        let doc = ambient.table(TXN_COLLECTION).find(filter).one().await?;
        match doc {
            Some(doc) => Ok(Some(serde_json::from_value(serde_json::Value::Object(
                doc,
            ))?)),
            None => Ok(None),
        }
    }

    /// Open a stream of transaction state-change events.
    pub async fn watch(&self) -> Result<Watcher> {
        let (session, stream) = self
            .pool
            .open_stream(CMD_WATCH_TRANSACTION, &serde_json::json!({}))
            .await?;
        Ok(Watcher::new(session, stream))
    }

    /// Envelope header for a data operation issued through this handle.
    pub(crate) fn header(&self, op_code: txngate_common::Opcode) -> MsgHeader {
        let header = MsgHeader::new(op_code);
        match &self.token {
            Some(token) => header.with_token(token),
            None => header,
        }
    }

    /// Issue one `RDBOperation`, routed at the transaction's processor when
    /// this handle carries a token.
    pub(crate) async fn run<I>(&self, op: &I) -> Result<Reply>
    where
        I: Serialize,
    {
        let processor = self.token.as_ref().map(|token| token.processor.as_str());
        let reply: Reply = self
            .pool
            .call_to(processor, CMD_RDB_OPERATION, op)
            .await?;
        if reply.success {
            Ok(reply)
        } else {
            Err(DalError::Op {
                code: reply.code,
                message: reply.message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txngate_common::{Opcode, TxnId};
    use txngate_pool::PoolConfig;

    fn pool() -> Arc<Pool> {
        Pool::with_addresses(vec!["127.0.0.1:1".into()], PoolConfig::default())
    }

    #[test]
    fn ambient_header_carries_no_txn() {
        let dal = Dal::new(pool());
        let header = dal.header(Opcode::Find);
        assert!(header.txn_id.is_none());
        assert!(dal.token().is_none());
    }

    #[test]
    fn joined_header_carries_token_identity() {
        let token = TxnToken::new("req-7".into(), TxnId::new(), "10.0.0.2:50010".into());
        let dal = Dal::join(pool(), token.clone());
        let header = dal.header(Opcode::Insert);
        assert_eq!(header.txn_id, Some(token.txn_id));
        assert_eq!(header.request_id, "req-7");
    }

    #[test]
    fn join_roundtrips_through_request_metadata() {
        let token = TxnToken::new("req-7".into(), TxnId::new(), "10.0.0.2:50010".into());
        let value = token.to_header_value();
        let dal = Dal::from_header(pool(), &value).unwrap();
        assert_eq!(dal.token(), Some(&token));

        assert!(Dal::from_header(pool(), "{garbage").is_err());
    }

    #[test]
    fn session_not_found_is_detectable() {
        let err = DalError::Op {
            code: reply_code::SESSION_NOT_FOUND,
            message: "gone".into(),
        };
        assert!(err.is_session_not_found());
        let other = DalError::Op {
            code: reply_code::STORE_ERROR,
            message: "boom".into(),
        };
        assert!(!other.is_session_not_found());
    }
}
