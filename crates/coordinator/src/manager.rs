//! Transaction session lifecycle
//!
//! The manager owns the in-memory session cache and the persisted record for
//! every transaction this instance started. A transaction exists in two
//! places at once: a live store session in the cache, and a [`TxnRecord`]
//! row in the record collection. The cache is authoritative for execution;
//! the records survive a crash and feed reconciliation.

use crate::error::{Result, TxnError};
use crate::pubsub::Publisher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use txngate_common::{Document, TxnId, TxnRecord, TxnStatus, TxnToken};
use txngate_store::{Store, StoreSession};

pub use txngate_common::TXN_COLLECTION;

/// One live transaction: its record, its store session, and the lock that
/// serializes operations targeting it. Concurrent requests carrying the same
/// transaction ID queue on `op_lock` instead of interleaving on the session.
pub struct CachedTxn {
    pub record: Mutex<TxnRecord>,
    pub session: Arc<dyn StoreSession>,
    pub op_lock: Arc<AsyncMutex<()>>,
}

/// Owns every transaction started on this coordinator instance.
pub struct TxnManager {
    store: Arc<dyn Store>,
    publisher: Arc<Publisher>,
    processor: String,
    enabled: bool,
    cache: Mutex<HashMap<TxnId, Arc<CachedTxn>>>,
}

impl TxnManager {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<Publisher>,
        processor: String,
        enabled: bool,
    ) -> Self {
        Self {
            store,
            publisher,
            processor,
            enabled,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn processor(&self) -> &str {
        &self.processor
    }

    /// Start a transaction: open a store session, persist an in-progress
    /// record, cache the pair, and mint the propagation token.
    ///
    /// The record insert happens before the session becomes visible; if it
    /// fails the session is torn down so nothing leaks.
    pub async fn create_transaction(&self, request_id: &str) -> Result<TxnToken> {
        if !self.enabled {
            return Err(TxnError::Disabled);
        }

        let session = self.store.start_session().await?;
        let txn_id = TxnId::new();
        let record = TxnRecord::new(txn_id, request_id.to_string(), self.processor.clone());

        let doc = record_to_doc(&record)?;
        if let Err(err) = self.store.collection(TXN_COLLECTION).insert(vec![doc]).await {
            tracing::error!(%txn_id, error = %err, "failed to persist transaction record");
            if let Err(abort_err) = session.abort().await {
                tracing::warn!(%txn_id, error = %abort_err, "session teardown after failed persist");
            }
            return Err(err.into());
        }

        self.cache.lock().insert(
            txn_id,
            Arc::new(CachedTxn {
                record: Mutex::new(record),
                session,
                op_lock: Arc::new(AsyncMutex::new(())),
            }),
        );

        tracing::info!(%txn_id, request_id, "transaction started");
        Ok(TxnToken::new(
            request_id.to_string(),
            txn_id,
            self.processor.clone(),
        ))
    }

    /// Look up a live transaction by ID.
    pub fn get(&self, txn_id: &TxnId) -> Result<Arc<CachedTxn>> {
        self.cache
            .lock()
            .get(txn_id)
            .cloned()
            .ok_or(TxnError::SessionNotFound(*txn_id))
    }

    pub fn contains(&self, txn_id: &TxnId) -> bool {
        self.cache.lock().contains_key(txn_id)
    }

    /// Cached transactions whose last activity predates `life_limit`.
    pub fn stale_cached(&self, life_limit: Duration) -> Vec<TxnId> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(life_limit).unwrap_or(chrono::Duration::zero());
        self.cache
            .lock()
            .iter()
            .filter(|(_, cached)| cached.record.lock().last_time < cutoff)
            .map(|(txn_id, _)| *txn_id)
            .collect()
    }

    pub async fn commit(&self, txn_id: &TxnId) -> Result<()> {
        self.finalize(txn_id, true).await
    }

    pub async fn abort(&self, txn_id: &TxnId) -> Result<()> {
        self.finalize(txn_id, false).await
    }

    /// Finalize a transaction.
    ///
    /// The cache entry is removed before anything else so a second commit or
    /// abort on the same ID fails with `SessionNotFound` instead of touching
    /// a dead session. If the store-level finalize or the record update
    /// fails, the record transitions to `Exception`; the state change is
    /// published either way.
    async fn finalize(&self, txn_id: &TxnId, commit: bool) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let cached = self
            .cache
            .lock()
            .remove(txn_id)
            .ok_or(TxnError::SessionNotFound(*txn_id))?;

        // wait for any in-flight operation on this transaction
        let _guard = cached.op_lock.lock().await;

        let outcome = if commit {
            cached.session.commit().await
        } else {
            cached.session.abort().await
        };

        let status = match &outcome {
            Ok(()) if commit => TxnStatus::Committed,
            Ok(()) => TxnStatus::Aborted,
            Err(err) => {
                tracing::error!(%txn_id, commit, error = %err, "store finalize failed");
                TxnStatus::Exception
            }
        };

        let record = {
            let mut record = cached.record.lock();
            record.transition(status);
            record.clone()
        };

        if let Err(err) = self.persist_transition(&record).await {
            tracing::error!(%txn_id, error = %err, "failed to persist final transaction status");
            let record = {
                let mut record = cached.record.lock();
                record.transition(TxnStatus::Exception);
                record.clone()
            };
            self.publisher.publish(&record).await;
            return Err(err);
        }

        tracing::info!(%txn_id, status = %record.status, "transaction finalized");
        self.publisher.publish(&record).await;
        outcome.map_err(Into::into)
    }

    /// Write a record's current status and last-activity time back to the
    /// record collection.
    pub async fn persist_transition(&self, record: &TxnRecord) -> Result<()> {
        let filter = txn_filter(&record.txn_id)?;
        let mut update = Document::new();
        update.insert("status".into(), serde_json::to_value(record.status)?);
        update.insert("last_time".into(), serde_json::to_value(record.last_time)?);
        self.store
            .collection(TXN_COLLECTION)
            .update(&filter, &update)
            .await?;
        Ok(())
    }
}

/// Serialize a record into a store document.
pub fn record_to_doc(record: &TxnRecord) -> Result<Document> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(doc) => Ok(doc),
        other => Err(TxnError::InvalidRecord(format!(
            "record serialized to {other}"
        ))),
    }
}

/// Deserialize a store document back into a record.
pub fn doc_to_record(doc: Document) -> Result<TxnRecord> {
    Ok(serde_json::from_value(serde_json::Value::Object(doc))?)
}

/// Equality filter selecting one record by transaction ID.
pub fn txn_filter(txn_id: &TxnId) -> Result<Document> {
    let mut filter = Document::new();
    filter.insert("txn_id".into(), serde_json::to_value(txn_id)?);
    Ok(filter)
}
