//! Per-collection operation builders

use crate::{Dal, Result};
use txngate_common::{Document, Filter, Opcode};
use txngate_protocol::{
    OpCount, OpDelete, OpFind, OpFindAndModify, OpInsert, OpUpdate, SortField,
};

/// Operations against one collection, inheriting the parent handle's
/// transaction identity.
pub struct Table {
    dal: Dal,
    name: String,
}

impl Table {
    pub(crate) fn new(dal: Dal, name: &str) -> Self {
        Self {
            dal,
            name: name.to_string(),
        }
    }

    pub async fn insert(&self, docs: Vec<Document>) -> Result<()> {
        let op = OpInsert {
            header: self.dal.header(Opcode::Insert),
            collection: self.name.clone(),
            docs,
        };
        self.dal.run(&op).await?;
        Ok(())
    }

    pub async fn insert_one(&self, doc: Document) -> Result<()> {
        self.insert(vec![doc]).await
    }

    /// Merge `doc`'s fields into every document matching `selector`;
    /// returns the match count.
    pub async fn update(&self, selector: Filter, doc: Document) -> Result<u64> {
        let op = OpUpdate {
            header: self.dal.header(Opcode::Update),
            collection: self.name.clone(),
            selector,
            doc,
        };
        Ok(self.dal.run(&op).await?.count)
    }

    /// Delete every document matching `selector`; returns the match count.
    pub async fn delete(&self, selector: Filter) -> Result<u64> {
        let op = OpDelete {
            header: self.dal.header(Opcode::Delete),
            collection: self.name.clone(),
            selector,
        };
        Ok(self.dal.run(&op).await?.count)
    }

    pub async fn count(&self, selector: Filter) -> Result<u64> {
        let op = OpCount {
            header: self.dal.header(Opcode::Count),
            collection: self.name.clone(),
            selector,
        };
        Ok(self.dal.run(&op).await?.count)
    }

    /// Query builder.
    pub fn find(&self, selector: Filter) -> Find {
        Find {
            dal: self.dal.clone(),
            op: OpFind {
                header: self.dal.header(Opcode::Find),
                collection: self.name.clone(),
                selector,
                fields: Vec::new(),
                sort: Vec::new(),
                start: 0,
                limit: 0,
            },
        }
    }

    /// Atomic read-modify-write builder.
    pub fn find_and_modify(&self, selector: Filter, doc: Document) -> FindAndModify {
        FindAndModify {
            dal: self.dal.clone(),
            op: OpFindAndModify {
                header: self.dal.header(Opcode::FindAndModify),
                collection: self.name.clone(),
                selector,
                doc,
                upsert: false,
                remove: false,
                return_new: false,
            },
        }
    }
}

/// Builder for `find` queries.
pub struct Find {
    dal: Dal,
    op: OpFind,
}

impl Find {
    /// Keep only the named fields in returned documents.
    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.op.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn sort(mut self, field: &str, descending: bool) -> Self {
        self.op.sort.push(SortField {
            field: field.to_string(),
            descending,
        });
        self
    }

    pub fn start(mut self, start: u64) -> Self {
        self.op.start = start;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.op.limit = limit;
        self
    }

    /// Execute, returning all matches.
    pub async fn all(self) -> Result<Vec<Document>> {
        Ok(self.dal.run(&self.op).await?.docs)
    }

    /// Execute, returning the first match if any.
    pub async fn one(mut self) -> Result<Option<Document>> {
        self.op.limit = 1;
        Ok(self.dal.run(&self.op).await?.docs.into_iter().next())
    }
}

/// Builder for `find_and_modify` operations.
pub struct FindAndModify {
    dal: Dal,
    op: OpFindAndModify,
}

impl FindAndModify {
    /// Insert the document when nothing matches.
    pub fn upsert(mut self) -> Self {
        self.op.upsert = true;
        self
    }

    /// Remove the matched document instead of updating it.
    pub fn remove(mut self) -> Self {
        self.op.remove = true;
        self
    }

    /// Return the document as it looks after the update.
    pub fn return_new(mut self) -> Self {
        self.op.return_new = true;
        self
    }

    /// Execute, returning the affected document per the builder flags.
    pub async fn run(self) -> Result<Option<Document>> {
        Ok(self.dal.run(&self.op).await?.docs.into_iter().next())
    }
}
