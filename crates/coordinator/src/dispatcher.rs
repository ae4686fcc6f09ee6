//! Opcode dispatch
//!
//! Every `RDBOperation` payload is decoded just far enough to read its
//! opcode, then routed to the registered handler. All handler failures are
//! values: the dispatcher always produces a [`Reply`], never a transport
//! error, so one bad operation cannot poison the connection.

use crate::error::TxnError;
use crate::manager::TxnManager;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use txngate_common::Opcode;
use txngate_protocol::{
    peek_opcode, reply_code, OpAbort, OpCommit, OpCount, OpDdl, OpDelete, OpFind, OpFindAndModify,
    OpInsert, OpStartTransaction, OpUpdate, Reply,
};
use txngate_store::{Collection, FindAndModifyOptions, FindOptions, Store, StoreError};

struct Ctx {
    manager: Arc<TxnManager>,
    store: Arc<dyn Store>,
}

/// A collection resolved for one operation. Transactional operations hold
/// the transaction's op lock for as long as this value lives.
struct Target {
    collection: Arc<dyn Collection>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl Ctx {
    /// Route an operation at the ambient store or, when the envelope names
    /// a transaction, at that transaction's session.
    async fn target(
        &self,
        header: &txngate_protocol::MsgHeader,
        collection: &str,
    ) -> Result<Target, Reply> {
        match header.txn_id {
            Some(txn_id) => {
                let cached = self.manager.get(&txn_id).map_err(|_| {
                    Reply::fail(
                        reply_code::SESSION_NOT_FOUND,
                        format!("transaction not found: {txn_id}"),
                    )
                })?;
                let guard = cached.op_lock.clone().lock_owned().await;
                Ok(Target {
                    collection: cached.session.collection(collection),
                    _guard: Some(guard),
                })
            }
            None => Ok(Target {
                collection: self.store.collection(collection),
                _guard: None,
            }),
        }
    }
}

fn store_failure(err: StoreError) -> Reply {
    Reply::fail(reply_code::STORE_ERROR, err.to_string())
}

fn bad_request(detail: impl std::fmt::Display) -> Reply {
    Reply::fail(reply_code::BAD_REQUEST, detail.to_string())
}

/// Decode the typed body for one opcode, or answer `BAD_REQUEST`.
fn body<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, Reply> {
    serde_json::from_value(payload).map_err(bad_request)
}

#[async_trait]
trait OpHandler: Send + Sync {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply;
}

struct Insert;

#[async_trait]
impl OpHandler for Insert {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpInsert = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        let target = match ctx.target(&op.header, &op.collection).await {
            Ok(target) => target,
            Err(reply) => return reply,
        };
        match target.collection.insert(op.docs).await {
            Ok(()) => Reply::ok(),
            Err(err) => store_failure(err),
        }
    }
}

struct Update;

#[async_trait]
impl OpHandler for Update {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpUpdate = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        let target = match ctx.target(&op.header, &op.collection).await {
            Ok(target) => target,
            Err(reply) => return reply,
        };
        match target.collection.update(&op.selector, &op.doc).await {
            Ok(count) => Reply::with_count(count),
            Err(err) => store_failure(err),
        }
    }
}

struct Delete;

#[async_trait]
impl OpHandler for Delete {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpDelete = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        let target = match ctx.target(&op.header, &op.collection).await {
            Ok(target) => target,
            Err(reply) => return reply,
        };
        match target.collection.delete(&op.selector).await {
            Ok(count) => Reply::with_count(count),
            Err(err) => store_failure(err),
        }
    }
}

struct Find;

#[async_trait]
impl OpHandler for Find {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpFind = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        let target = match ctx.target(&op.header, &op.collection).await {
            Ok(target) => target,
            Err(reply) => return reply,
        };
        let opts = FindOptions {
            fields: op.fields,
            sort: op
                .sort
                .into_iter()
                .map(|key| (key.field, key.descending))
                .collect(),
            start: op.start,
            limit: op.limit,
        };
        match target.collection.find(&op.selector, &opts).await {
            Ok(docs) => Reply::with_docs(docs),
            Err(err) => store_failure(err),
        }
    }
}

struct FindAndModify;

#[async_trait]
impl OpHandler for FindAndModify {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpFindAndModify = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        let target = match ctx.target(&op.header, &op.collection).await {
            Ok(target) => target,
            Err(reply) => return reply,
        };
        let opts = FindAndModifyOptions {
            upsert: op.upsert,
            remove: op.remove,
            return_new: op.return_new,
        };
        match target
            .collection
            .find_and_modify(&op.selector, &op.doc, &opts)
            .await
        {
            Ok(doc) => Reply::with_docs(doc.into_iter().collect()),
            Err(err) => store_failure(err),
        }
    }
}

struct Count;

#[async_trait]
impl OpHandler for Count {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpCount = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        let target = match ctx.target(&op.header, &op.collection).await {
            Ok(target) => target,
            Err(reply) => return reply,
        };
        match target.collection.count(&op.selector).await {
            Ok(count) => Reply::with_count(count),
            Err(err) => store_failure(err),
        }
    }
}

struct Ddl;

#[async_trait]
impl OpHandler for Ddl {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpDdl = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        // schema changes never join a transaction
        if op.header.txn_id.is_some() {
            return bad_request("ddl cannot run inside a transaction");
        }
        match ctx.store.ddl(&op.collection, &op.command).await {
            Ok(()) => Reply::ok(),
            Err(err) => store_failure(err),
        }
    }
}

struct StartTransaction;

#[async_trait]
impl OpHandler for StartTransaction {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpStartTransaction = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        // pass-through mode: succeed without a token so callers proceed
        // ambiently
        if !ctx.manager.enabled() {
            return Reply::ok();
        }
        match ctx.manager.create_transaction(&op.header.request_id).await {
            Ok(token) => Reply::with_token(token),
            Err(err) => store_failure_from_txn(err),
        }
    }
}

struct Commit;

#[async_trait]
impl OpHandler for Commit {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpCommit = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        finalize(ctx, op.header.txn_id, true).await
    }
}

struct Abort;

#[async_trait]
impl OpHandler for Abort {
    async fn handle(&self, ctx: &Ctx, payload: Value) -> Reply {
        let op: OpAbort = match body(payload) {
            Ok(op) => op,
            Err(reply) => return reply,
        };
        finalize(ctx, op.header.txn_id, false).await
    }
}

async fn finalize(ctx: &Ctx, txn_id: Option<txngate_common::TxnId>, commit: bool) -> Reply {
    if !ctx.manager.enabled() {
        return Reply::ok();
    }
    let Some(txn_id) = txn_id else {
        return bad_request("commit/abort requires a transaction id");
    };
    let outcome = if commit {
        ctx.manager.commit(&txn_id).await
    } else {
        ctx.manager.abort(&txn_id).await
    };
    match outcome {
        Ok(()) => Reply::ok(),
        Err(TxnError::SessionNotFound(id)) => Reply::fail(
            reply_code::SESSION_NOT_FOUND,
            format!("transaction not found: {id}"),
        ),
        Err(err) => store_failure_from_txn(err),
    }
}

fn store_failure_from_txn(err: TxnError) -> Reply {
    Reply::fail(reply_code::STORE_ERROR, err.to_string())
}

/// Routes decoded `RDBOperation` payloads to opcode handlers.
pub struct Dispatcher {
    ctx: Ctx,
    handlers: HashMap<Opcode, Arc<dyn OpHandler>>,
}

impl Dispatcher {
    pub fn new(manager: Arc<TxnManager>, store: Arc<dyn Store>) -> Self {
        let mut handlers: HashMap<Opcode, Arc<dyn OpHandler>> = HashMap::new();
        handlers.insert(Opcode::Insert, Arc::new(Insert));
        handlers.insert(Opcode::Update, Arc::new(Update));
        handlers.insert(Opcode::Delete, Arc::new(Delete));
        handlers.insert(Opcode::Find, Arc::new(Find));
        handlers.insert(Opcode::FindAndModify, Arc::new(FindAndModify));
        handlers.insert(Opcode::Count, Arc::new(Count));
        handlers.insert(Opcode::Ddl, Arc::new(Ddl));
        handlers.insert(Opcode::StartTransaction, Arc::new(StartTransaction));
        handlers.insert(Opcode::Commit, Arc::new(Commit));
        handlers.insert(Opcode::Abort, Arc::new(Abort));
        Self {
            ctx: Ctx { manager, store },
            handlers,
        }
    }

    /// Decode and execute one operation payload.
    pub async fn dispatch(&self, payload: &[u8]) -> Reply {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(err) => return bad_request(err),
        };
        let Some(opcode) = peek_opcode(&value) else {
            return Reply::fail(reply_code::NOT_SUPPORTED, "missing or unknown opcode");
        };
        let Some(handler) = self.handlers.get(&opcode) else {
            return Reply::fail(
                reply_code::NOT_SUPPORTED,
                format!("opcode not supported: {opcode}"),
            );
        };
        tracing::debug!(%opcode, "dispatching operation");
        handler.handle(&self.ctx, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::Publisher;
    use serde_json::json;
    use txngate_common::{doc, TxnToken};
    use txngate_protocol::MsgHeader;
    use txngate_store::MemoryStore;

    fn dispatcher(enabled: bool) -> Dispatcher {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let publisher = Arc::new(Publisher::new());
        let manager = Arc::new(TxnManager::new(
            store.clone(),
            publisher,
            "127.0.0.1:50010".to_string(),
            enabled,
        ));
        Dispatcher::new(manager, store)
    }

    async fn send<T: serde::Serialize>(dispatcher: &Dispatcher, op: &T) -> Reply {
        dispatcher
            .dispatch(&serde_json::to_vec(op).unwrap())
            .await
    }

    #[tokio::test]
    async fn transactional_writes_are_invisible_until_commit() {
        let d = dispatcher(true);

        let started = send(&d, &OpStartTransaction { header: MsgHeader::new(Opcode::StartTransaction) }).await;
        assert!(started.success);
        let token = started.txn.unwrap();

        let insert = OpInsert {
            header: MsgHeader::new(Opcode::Insert).with_token(&token),
            collection: "hosts".into(),
            docs: vec![doc(&[("ip", json!("10.0.0.1"))])],
        };
        assert!(send(&d, &insert).await.success);

        // ambient read sees nothing yet
        let ambient_find = OpFind {
            header: MsgHeader::new(Opcode::Find),
            collection: "hosts".into(),
            selector: txngate_common::Filter::new(),
            fields: vec![],
            sort: vec![],
            start: 0,
            limit: 0,
        };
        assert!(send(&d, &ambient_find).await.docs.is_empty());

        // the transaction reads its own write
        let txn_find = OpFind {
            header: MsgHeader::new(Opcode::Find).with_token(&token),
            ..ambient_find.clone()
        };
        assert_eq!(send(&d, &txn_find).await.docs.len(), 1);

        let commit = OpCommit {
            header: MsgHeader::new(Opcode::Commit).with_token(&token),
        };
        assert!(send(&d, &commit).await.success);
        assert_eq!(send(&d, &ambient_find).await.docs.len(), 1);
    }

    #[tokio::test]
    async fn second_commit_reports_session_not_found() {
        let d = dispatcher(true);
        let token = send(&d, &OpStartTransaction { header: MsgHeader::new(Opcode::StartTransaction) })
            .await
            .txn
            .unwrap();
        let commit = OpCommit {
            header: MsgHeader::new(Opcode::Commit).with_token(&token),
        };
        assert!(send(&d, &commit).await.success);

        let again = send(&d, &commit).await;
        assert!(!again.success);
        assert_eq!(again.code, reply_code::SESSION_NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_opcode_is_not_supported() {
        let d = dispatcher(true);
        let reply = d.dispatch(br#"{"collection": "hosts"}"#).await;
        assert!(!reply.success);
        assert_eq!(reply.code, reply_code::NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn undecodable_payload_is_bad_request() {
        let d = dispatcher(true);
        let reply = d.dispatch(b"{not json").await;
        assert!(!reply.success);
        assert_eq!(reply.code, reply_code::BAD_REQUEST);
    }

    #[tokio::test]
    async fn disabled_mode_passes_through_transaction_control() {
        let d = dispatcher(false);

        let started = send(&d, &OpStartTransaction { header: MsgHeader::new(Opcode::StartTransaction) }).await;
        assert!(started.success);
        assert!(started.txn.is_none());

        // ambient write works and commit is a harmless no-op
        let insert = OpInsert {
            header: MsgHeader::new(Opcode::Insert),
            collection: "hosts".into(),
            docs: vec![doc(&[("ip", json!("10.0.0.2"))])],
        };
        assert!(send(&d, &insert).await.success);
        let commit = OpCommit { header: MsgHeader::new(Opcode::Commit) };
        assert!(send(&d, &commit).await.success);
    }

    #[tokio::test]
    async fn ddl_rejected_inside_transaction() {
        let d = dispatcher(true);
        let token = send(&d, &OpStartTransaction { header: MsgHeader::new(Opcode::StartTransaction) })
            .await
            .txn
            .unwrap();
        let ddl = OpDdl {
            header: MsgHeader::new(Opcode::Ddl).with_token(&token),
            collection: "hosts".into(),
            command: txngate_common::DdlCommand::CreateCollection,
        };
        let reply = send(&d, &ddl).await;
        assert!(!reply.success);
        assert_eq!(reply.code, reply_code::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stale_token_gets_session_not_found() {
        let d = dispatcher(true);
        let token = TxnToken::new("req".into(), txngate_common::TxnId::new(), "x".into());
        let find = OpFind {
            header: MsgHeader::new(Opcode::Find).with_token(&token),
            collection: "hosts".into(),
            selector: txngate_common::Filter::new(),
            fields: vec![],
            sort: vec![],
            start: 0,
            limit: 0,
        };
        let reply = send(&d, &find).await;
        assert!(!reply.success);
        assert_eq!(reply.code, reply_code::SESSION_NOT_FOUND);
    }
}
