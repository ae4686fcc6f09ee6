//! Background reconciliation
//!
//! Two sweeps keep the cache and the persisted records honest:
//!
//! - the cache sweep runs every life-limit and aborts transactions that sat
//!   idle past it, releasing their store sessions;
//! - the store sweep runs every two life-limits and walks the persisted
//!   in-progress records. A stale record still cached here goes through the
//!   normal abort path; a stale record nobody caches (its owner crashed or
//!   was restarted) is marked `Exception` and published so downstream
//!   consumers learn the outcome is unknown.
//!
//! The store sweep also deletes finalized records older than the retention
//! window.
//!
//! Sweep failures are logged, never propagated; the next tick retries.

use crate::manager::{doc_to_record, txn_filter, TxnManager, TXN_COLLECTION};
use crate::pubsub::Publisher;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use txngate_common::{Document, TxnRecord, TxnStatus};
use txngate_store::{FindOptions, Store};

const SWEEP_PAGE: u64 = 200;

#[derive(Clone)]
struct SweepCtx {
    manager: Arc<TxnManager>,
    store: Arc<dyn Store>,
    publisher: Arc<Publisher>,
    life_limit: Duration,
    retention: Duration,
}

/// Owns the background sweep tasks.
pub struct Reconciler {
    ctx: SweepCtx,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn new(
        manager: Arc<TxnManager>,
        store: Arc<dyn Store>,
        publisher: Arc<Publisher>,
        life_limit: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            ctx: SweepCtx {
                manager,
                store,
                publisher,
                life_limit,
                retention,
            },
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn both sweep loops.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();

        let ctx = self.ctx.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ctx.life_limit);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep_cache(&ctx).await;
            }
        }));

        let ctx = self.ctx.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ctx.life_limit * 2);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep_store(&ctx).await;
            }
        }));
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Run the cache sweep once. Exposed for deterministic tests.
    pub async fn sweep_cache_once(&self) {
        sweep_cache(&self.ctx).await;
    }

    /// Run the store sweep once. Exposed for deterministic tests.
    pub async fn sweep_store_once(&self) {
        sweep_store(&self.ctx).await;
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Abort cached transactions idle past the life limit.
async fn sweep_cache(ctx: &SweepCtx) {
    for txn_id in ctx.manager.stale_cached(ctx.life_limit) {
        match ctx.manager.abort(&txn_id).await {
            Ok(()) => tracing::info!(%txn_id, "reclaimed idle transaction"),
            Err(err) => {
                tracing::warn!(%txn_id, error = %err, "failed to reclaim idle transaction")
            }
        }
    }
}

/// Reconcile persisted in-progress records against the cache, then apply
/// record retention.
async fn sweep_store(ctx: &SweepCtx) {
    if let Err(err) = sweep_in_progress(ctx).await {
        tracing::warn!(error = %err, "in-progress record sweep failed");
    }
    if let Err(err) = sweep_retention(ctx).await {
        tracing::warn!(error = %err, "record retention sweep failed");
    }
}

async fn sweep_in_progress(ctx: &SweepCtx) -> crate::error::Result<()> {
    let cutoff = cutoff(ctx.life_limit);
    let records = ctx.store.collection(TXN_COLLECTION);

    // Collect first, act after: reclaiming a record removes it from the
    // in-progress filter, and mutating the result set under an advancing
    // offset would skip one record per reclaim.
    let mut stale = Vec::new();
    let mut start = 0;
    loop {
        let page = records
            .find(&status_filter(TxnStatus::OnProgress), &page_opts(start))
            .await?;
        let fetched = page.len() as u64;

        for doc in page {
            match doc_to_record(doc) {
                Ok(record) => {
                    if record.last_time < cutoff {
                        stale.push(record);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping undecodable transaction record");
                }
            }
        }

        if fetched < SWEEP_PAGE {
            break;
        }
        start += SWEEP_PAGE;
    }

    for record in stale {
        if ctx.manager.contains(&record.txn_id) {
            // still live here; reclaim through the normal abort path
            if let Err(err) = ctx.manager.abort(&record.txn_id).await {
                tracing::warn!(txn_id = %record.txn_id, error = %err, "reclaim failed");
            }
        } else if let Err(err) = mark_orphan(ctx, record).await {
            tracing::warn!(error = %err, "failed to mark orphaned transaction");
        }
    }
    Ok(())
}

/// A stale record with no live session anywhere reachable: its outcome is
/// unknowable, so it becomes `Exception`.
async fn mark_orphan(ctx: &SweepCtx, mut record: TxnRecord) -> crate::error::Result<()> {
    record.transition(TxnStatus::Exception);
    ctx.manager.persist_transition(&record).await?;
    tracing::warn!(
        txn_id = %record.txn_id,
        processor = %record.processor,
        "orphaned transaction marked exception"
    );
    ctx.publisher.publish(&record).await;
    Ok(())
}

async fn sweep_retention(ctx: &SweepCtx) -> crate::error::Result<()> {
    let cutoff = cutoff(ctx.retention);
    let records = ctx.store.collection(TXN_COLLECTION);

    for status in [TxnStatus::Committed, TxnStatus::Aborted, TxnStatus::Exception] {
        let mut start = 0;
        let mut expired = Vec::new();
        loop {
            let page = records
                .find(&status_filter(status), &page_opts(start))
                .await?;
            let fetched = page.len() as u64;
            for doc in page {
                if let Ok(record) = doc_to_record(doc) {
                    if record.last_time < cutoff {
                        expired.push(record.txn_id);
                    }
                }
            }
            if fetched < SWEEP_PAGE {
                break;
            }
            start += SWEEP_PAGE;
        }
        for txn_id in expired {
            records.delete(&txn_filter(&txn_id)?).await?;
            tracing::debug!(%txn_id, "expired transaction record deleted");
        }
    }
    Ok(())
}

fn cutoff(age: Duration) -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now() - chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero())
}

fn status_filter(status: TxnStatus) -> Document {
    let mut filter = Document::new();
    filter.insert(
        "status".into(),
        serde_json::Value::String(status.to_string()),
    );
    filter
}

fn page_opts(start: u64) -> FindOptions {
    FindOptions {
        sort: vec![("create_time".to_string(), false)],
        start,
        limit: SWEEP_PAGE,
        ..FindOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::record_to_doc;
    use txngate_common::TxnId;
    use txngate_store::MemoryStore;

    fn harness(life_limit: Duration, retention: Duration) -> (Reconciler, Arc<TxnManager>, Arc<dyn Store>, Arc<Publisher>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let publisher = Arc::new(Publisher::new());
        let manager = Arc::new(TxnManager::new(
            store.clone(),
            publisher.clone(),
            "127.0.0.1:50010".to_string(),
            true,
        ));
        let reconciler = Reconciler::new(
            manager.clone(),
            store.clone(),
            publisher.clone(),
            life_limit,
            retention,
        );
        (reconciler, manager, store, publisher)
    }

    async fn load_record(store: &Arc<dyn Store>, txn_id: &TxnId) -> TxnRecord {
        let docs = store
            .collection(TXN_COLLECTION)
            .find(&txn_filter(txn_id).unwrap(), &FindOptions::default())
            .await
            .unwrap();
        doc_to_record(docs.into_iter().next().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn cache_sweep_aborts_idle_transactions() {
        let (reconciler, manager, store, publisher) =
            harness(Duration::from_millis(1), Duration::from_secs(3600));
        let (_sub, mut events) = publisher.subscribe();

        let token = manager.create_transaction("req-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        reconciler.sweep_cache_once().await;

        assert!(!manager.contains(&token.txn_id));
        assert_eq!(
            load_record(&store, &token.txn_id).await.status,
            TxnStatus::Aborted
        );
        assert_eq!(events.recv().await.unwrap().status, TxnStatus::Aborted);
    }

    #[tokio::test]
    async fn store_sweep_marks_orphans_exception() {
        let (reconciler, _manager, store, publisher) =
            harness(Duration::from_millis(1), Duration::from_secs(3600));
        let (_sub, mut events) = publisher.subscribe();

        // a record left behind by a crashed instance: persisted, not cached
        let mut orphan = TxnRecord::new(TxnId::new(), "req-9".into(), "10.0.0.9:50010".into());
        orphan.last_time = chrono::Utc::now() - chrono::Duration::seconds(120);
        store
            .collection(TXN_COLLECTION)
            .insert(vec![record_to_doc(&orphan).unwrap()])
            .await
            .unwrap();

        reconciler.sweep_store_once().await;

        assert_eq!(
            load_record(&store, &orphan.txn_id).await.status,
            TxnStatus::Exception
        );
        assert_eq!(events.recv().await.unwrap().status, TxnStatus::Exception);
    }

    #[tokio::test]
    async fn store_sweep_reclaims_backlog_spanning_multiple_pages() {
        let (reconciler, _manager, store, _publisher) =
            harness(Duration::from_millis(1), Duration::from_secs(3600));
        let records = store.collection(TXN_COLLECTION);

        // twice the page size, all stale and uncached
        for _ in 0..(SWEEP_PAGE * 2) {
            let mut orphan =
                TxnRecord::new(TxnId::new(), String::new(), "10.0.0.9:50010".into());
            orphan.last_time = chrono::Utc::now() - chrono::Duration::seconds(120);
            records
                .insert(vec![record_to_doc(&orphan).unwrap()])
                .await
                .unwrap();
        }

        // a single pass must reclaim the whole backlog
        reconciler.sweep_store_once().await;

        let left = records
            .count(&status_filter(TxnStatus::OnProgress))
            .await
            .unwrap();
        assert_eq!(left, 0);
        let marked = records
            .count(&status_filter(TxnStatus::Exception))
            .await
            .unwrap();
        assert_eq!(marked, SWEEP_PAGE * 2);
    }

    #[tokio::test]
    async fn fresh_transactions_survive_both_sweeps() {
        let (reconciler, manager, store, _publisher) =
            harness(Duration::from_secs(3600), Duration::from_secs(7200));

        let token = manager.create_transaction("req-1").await.unwrap();
        reconciler.sweep_cache_once().await;
        reconciler.sweep_store_once().await;

        assert!(manager.contains(&token.txn_id));
        assert_eq!(
            load_record(&store, &token.txn_id).await.status,
            TxnStatus::OnProgress
        );
    }

    #[tokio::test]
    async fn retention_deletes_old_finalized_records() {
        let (reconciler, _manager, store, _publisher) =
            harness(Duration::from_secs(3600), Duration::from_millis(1));

        let mut done = TxnRecord::new(TxnId::new(), "req-2".into(), "10.0.0.9:50010".into());
        done.transition(TxnStatus::Committed);
        done.last_time = chrono::Utc::now() - chrono::Duration::seconds(60);
        store
            .collection(TXN_COLLECTION)
            .insert(vec![record_to_doc(&done).unwrap()])
            .await
            .unwrap();

        reconciler.sweep_store_once().await;

        let remaining = store
            .collection(TXN_COLLECTION)
            .count(&txn_filter(&done.txn_id).unwrap())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
