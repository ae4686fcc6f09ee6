//! Operation codes carried by RPC envelopes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies which CRUD/DDL/transaction-control action a wire message
/// requests. Serialized by name inside operation envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Insert,
    Update,
    Delete,
    Find,
    FindAndModify,
    Count,
    Ddl,
    StartTransaction,
    Commit,
    Abort,
}

impl Opcode {
    /// All opcodes the dispatcher knows about.
    pub const ALL: [Opcode; 10] = [
        Opcode::Insert,
        Opcode::Update,
        Opcode::Delete,
        Opcode::Find,
        Opcode::FindAndModify,
        Opcode::Count,
        Opcode::Ddl,
        Opcode::StartTransaction,
        Opcode::Commit,
        Opcode::Abort,
    ];

    /// Whether this opcode controls a transaction rather than data.
    pub fn is_txn_control(&self) -> bool {
        matches!(
            self,
            Opcode::StartTransaction | Opcode::Commit | Opcode::Abort
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_vs_data() {
        assert!(Opcode::Commit.is_txn_control());
        assert!(!Opcode::Find.is_txn_control());
    }

    #[test]
    fn serde_by_name() {
        let json = serde_json::to_string(&Opcode::FindAndModify).unwrap();
        assert_eq!(json, "\"FindAndModify\"");
        let back: Opcode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Opcode::FindAndModify);
    }
}
