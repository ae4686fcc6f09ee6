//! Schema-management commands
//!
//! DDL always executes against the ambient store, never inside a
//! transaction session; document stores do not support transactional DDL.

use serde::{Deserialize, Serialize};

/// A schema-management command targeting one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdlCommand {
    CreateCollection,
    DropCollection,
    CreateIndex {
        name: String,
        keys: Vec<String>,
        unique: bool,
    },
    DropIndex {
        name: String,
    },
}
