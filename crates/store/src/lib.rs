//! Narrow document-store interface
//!
//! The coordinator depends on the store only through these traits: a
//! [`Store`] handing out collection handles and transactional sessions, a
//! [`StoreSession`] capturing exactly `{collection, commit, abort}`, and a
//! [`Collection`] executing the CRUD surface. Keeping the seam this narrow
//! means the transaction manager and dispatcher never see a concrete driver
//! type.

mod memory;
mod query;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use txngate_common::{DdlCommand, Document, Filter};

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("session already finalized")]
    SessionFinalized,

    #[error("store failure: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Options for `find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Projection: empty keeps all fields.
    pub fields: Vec<String>,
    /// Sort keys; `true` means descending.
    pub sort: Vec<(String, bool)>,
    pub start: u64,
    /// Zero means no limit.
    pub limit: u64,
}

/// Options for `find_and_modify`.
#[derive(Debug, Clone, Default)]
pub struct FindAndModifyOptions {
    pub upsert: bool,
    pub remove: bool,
    pub return_new: bool,
}

/// One collection's CRUD surface.
#[async_trait]
pub trait Collection: Send + Sync {
    async fn insert(&self, docs: Vec<Document>) -> Result<()>;
    async fn update(&self, filter: &Filter, doc: &Document) -> Result<u64>;
    async fn delete(&self, filter: &Filter) -> Result<u64>;
    async fn find(&self, filter: &Filter, opts: &FindOptions) -> Result<Vec<Document>>;
    async fn find_and_modify(
        &self,
        filter: &Filter,
        doc: &Document,
        opts: &FindAndModifyOptions,
    ) -> Result<Option<Document>>;
    async fn count(&self, filter: &Filter) -> Result<u64>;
}

/// One multi-statement store transaction.
///
/// Sessions are not assumed safe for concurrent use; callers serialize
/// operations belonging to one transaction externally.
#[async_trait]
pub trait StoreSession: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn Collection>;
    async fn commit(&self) -> Result<()>;
    async fn abort(&self) -> Result<()>;
}

/// The document store itself.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Ambient (non-transactional) collection handle.
    fn collection(&self, name: &str) -> Arc<dyn Collection>;
    /// Open a session and start a store-level transaction on it.
    async fn start_session(&self) -> Result<Arc<dyn StoreSession>>;
    /// Schema management; always ambient.
    async fn ddl(&self, collection: &str, command: &DdlCommand) -> Result<()>;
}
