//! In-memory document store
//!
//! Real enough for the coordinator and its tests: ambient operations apply
//! directly to the shared state, while a session buffers its writes in an
//! overlay. Session reads see the overlay replayed on top of the base data;
//! ambient readers see nothing until `commit` applies the overlay atomically
//! under the store lock.

use crate::query;
use crate::{
    Collection, FindAndModifyOptions, FindOptions, Result, Store, StoreError, StoreSession,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use txngate_common::{DdlCommand, Document, Filter};

#[derive(Debug, Clone)]
struct IndexSpec {
    #[allow(dead_code)]
    keys: Vec<String>,
    #[allow(dead_code)]
    unique: bool,
}

#[derive(Default)]
struct CollectionData {
    docs: Vec<Document>,
    indexes: HashMap<String, IndexSpec>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, CollectionData>,
}

/// In-process document store with transactional sessions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(AmbientCollection {
            name: name.to_string(),
            inner: self.inner.clone(),
        })
    }

    async fn start_session(&self) -> Result<Arc<dyn StoreSession>> {
        Ok(Arc::new(MemorySession {
            state: Arc::new(SessionState {
                inner: self.inner.clone(),
                pending: Mutex::new(Vec::new()),
                finalized: AtomicBool::new(false),
            }),
        }))
    }

    async fn ddl(&self, collection: &str, command: &DdlCommand) -> Result<()> {
        let mut inner = self.inner.lock();
        match command {
            DdlCommand::CreateCollection => {
                inner.collections.entry(collection.to_string()).or_default();
            }
            DdlCommand::DropCollection => {
                inner.collections.remove(collection);
            }
            DdlCommand::CreateIndex { name, keys, unique } => {
                inner
                    .collections
                    .entry(collection.to_string())
                    .or_default()
                    .indexes
                    .insert(
                        name.clone(),
                        IndexSpec {
                            keys: keys.clone(),
                            unique: *unique,
                        },
                    );
            }
            DdlCommand::DropIndex { name } => {
                let data = inner
                    .collections
                    .get_mut(collection)
                    .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
                data.indexes.remove(name);
            }
        }
        Ok(())
    }
}

struct AmbientCollection {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl Collection for AmbientCollection {
    async fn insert(&self, docs: Vec<Document>) -> Result<()> {
        let mut inner = self.inner.lock();
        let data = inner.collections.entry(self.name.clone()).or_default();
        query::do_insert(&mut data.docs, docs);
        Ok(())
    }

    async fn update(&self, filter: &Filter, doc: &Document) -> Result<u64> {
        let mut inner = self.inner.lock();
        let data = inner.collections.entry(self.name.clone()).or_default();
        Ok(query::do_update(&mut data.docs, filter, doc))
    }

    async fn delete(&self, filter: &Filter) -> Result<u64> {
        let mut inner = self.inner.lock();
        let data = inner.collections.entry(self.name.clone()).or_default();
        Ok(query::do_delete(&mut data.docs, filter))
    }

    async fn find(&self, filter: &Filter, opts: &FindOptions) -> Result<Vec<Document>> {
        let inner = self.inner.lock();
        let docs = inner
            .collections
            .get(&self.name)
            .map(|data| query::do_find(&data.docs, filter, opts))
            .unwrap_or_default();
        Ok(docs)
    }

    async fn find_and_modify(
        &self,
        filter: &Filter,
        doc: &Document,
        opts: &FindAndModifyOptions,
    ) -> Result<Option<Document>> {
        let mut inner = self.inner.lock();
        let data = inner.collections.entry(self.name.clone()).or_default();
        Ok(query::do_find_and_modify(&mut data.docs, filter, doc, opts))
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let inner = self.inner.lock();
        let count = inner
            .collections
            .get(&self.name)
            .map(|data| query::do_count(&data.docs, filter))
            .unwrap_or(0);
        Ok(count)
    }
}

enum PendingOp {
    Insert {
        collection: String,
        docs: Vec<Document>,
    },
    Update {
        collection: String,
        filter: Filter,
        doc: Document,
    },
    Delete {
        collection: String,
        filter: Filter,
    },
    FindAndModify {
        collection: String,
        filter: Filter,
        doc: Document,
        opts: FindAndModifyOptions,
    },
}

impl PendingOp {
    fn collection(&self) -> &str {
        match self {
            PendingOp::Insert { collection, .. }
            | PendingOp::Update { collection, .. }
            | PendingOp::Delete { collection, .. }
            | PendingOp::FindAndModify { collection, .. } => collection,
        }
    }

    /// Replay this op onto a materialized document list.
    fn apply(&self, docs: &mut Vec<Document>) {
        match self {
            PendingOp::Insert { docs: new, .. } => query::do_insert(docs, new.clone()),
            PendingOp::Update { filter, doc, .. } => {
                query::do_update(docs, filter, doc);
            }
            PendingOp::Delete { filter, .. } => {
                query::do_delete(docs, filter);
            }
            PendingOp::FindAndModify {
                filter, doc, opts, ..
            } => {
                query::do_find_and_modify(docs, filter, doc, opts);
            }
        }
    }
}

struct SessionState {
    inner: Arc<Mutex<Inner>>,
    pending: Mutex<Vec<PendingOp>>,
    finalized: AtomicBool,
}

impl SessionState {
    fn check_open(&self) -> Result<()> {
        if self.finalized.load(Ordering::SeqCst) {
            Err(StoreError::SessionFinalized)
        } else {
            Ok(())
        }
    }

    /// Base docs with this session's overlay replayed on top.
    fn view(&self, collection: &str) -> Vec<Document> {
        let mut docs = self
            .inner
            .lock()
            .collections
            .get(collection)
            .map(|data| data.docs.clone())
            .unwrap_or_default();
        for op in self.pending.lock().iter() {
            if op.collection() == collection {
                op.apply(&mut docs);
            }
        }
        docs
    }
}

struct MemorySession {
    state: Arc<SessionState>,
}

#[async_trait]
impl StoreSession for MemorySession {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(SessionCollection {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }

    async fn commit(&self) -> Result<()> {
        if self.state.finalized.swap(true, Ordering::SeqCst) {
            return Err(StoreError::SessionFinalized);
        }
        let pending = std::mem::take(&mut *self.state.pending.lock());
        // the overlay becomes visible in one step under the store lock
        let mut inner = self.state.inner.lock();
        for op in pending {
            let data = inner
                .collections
                .entry(op.collection().to_string())
                .or_default();
            op.apply(&mut data.docs);
        }
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        if self.state.finalized.swap(true, Ordering::SeqCst) {
            return Err(StoreError::SessionFinalized);
        }
        self.state.pending.lock().clear();
        Ok(())
    }
}

struct SessionCollection {
    name: String,
    state: Arc<SessionState>,
}

#[async_trait]
impl Collection for SessionCollection {
    async fn insert(&self, docs: Vec<Document>) -> Result<()> {
        self.state.check_open()?;
        self.state.pending.lock().push(PendingOp::Insert {
            collection: self.name.clone(),
            docs,
        });
        Ok(())
    }

    async fn update(&self, filter: &Filter, doc: &Document) -> Result<u64> {
        self.state.check_open()?;
        let matched = query::do_count(&self.state.view(&self.name), filter);
        self.state.pending.lock().push(PendingOp::Update {
            collection: self.name.clone(),
            filter: filter.clone(),
            doc: doc.clone(),
        });
        Ok(matched)
    }

    async fn delete(&self, filter: &Filter) -> Result<u64> {
        self.state.check_open()?;
        let matched = query::do_count(&self.state.view(&self.name), filter);
        self.state.pending.lock().push(PendingOp::Delete {
            collection: self.name.clone(),
            filter: filter.clone(),
        });
        Ok(matched)
    }

    async fn find(&self, filter: &Filter, opts: &FindOptions) -> Result<Vec<Document>> {
        self.state.check_open()?;
        Ok(query::do_find(&self.state.view(&self.name), filter, opts))
    }

    async fn find_and_modify(
        &self,
        filter: &Filter,
        doc: &Document,
        opts: &FindAndModifyOptions,
    ) -> Result<Option<Document>> {
        self.state.check_open()?;
        let mut docs = self.state.view(&self.name);
        let result = query::do_find_and_modify(&mut docs, filter, doc, opts);
        self.state.pending.lock().push(PendingOp::FindAndModify {
            collection: self.name.clone(),
            filter: filter.clone(),
            doc: doc.clone(),
            opts: opts.clone(),
        });
        Ok(result)
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        self.state.check_open()?;
        Ok(query::do_count(&self.state.view(&self.name), filter))
    }
}
