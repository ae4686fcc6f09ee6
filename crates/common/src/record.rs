//! Persisted transaction metadata

use crate::TxnId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a transaction.
///
/// `OnProgress` is the only live state; the other three are terminal. A
/// transaction whose store-level commit or abort itself failed, or that was
/// reclaimed after its owner crashed, ends up in `Exception` so downstream
/// auditing can detect inconsistent outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    OnProgress,
    Committed,
    Aborted,
    Exception,
}

impl TxnStatus {
    /// Whether this status is terminal.
    pub fn is_final(&self) -> bool {
        !matches!(self, TxnStatus::OnProgress)
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnStatus::OnProgress => "on_progress",
            TxnStatus::Committed => "committed",
            TxnStatus::Aborted => "aborted",
            TxnStatus::Exception => "exception",
        };
        f.write_str(s)
    }
}

/// Transaction record, persisted on start and updated on every state
/// transition. Survives coordinator crashes; reconciliation feeds on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnRecord {
    /// Coordinator-assigned transaction ID.
    pub txn_id: TxnId,
    /// Caller-supplied correlation ID, may be empty.
    #[serde(default)]
    pub request_id: String,
    /// Advertised address of the coordinator instance holding the live
    /// store session. Only that instance can execute operations for the
    /// transaction.
    pub processor: String,
    /// Current status.
    pub status: TxnStatus,
    /// When the transaction was started.
    pub create_time: DateTime<Utc>,
    /// Refreshed on every state transition.
    pub last_time: DateTime<Utc>,
}

impl TxnRecord {
    /// Create a new in-progress record owned by `processor`.
    pub fn new(txn_id: TxnId, request_id: String, processor: String) -> Self {
        let now = Utc::now();
        Self {
            txn_id,
            request_id,
            processor,
            status: TxnStatus::OnProgress,
            create_time: now,
            last_time: now,
        }
    }

    /// Transition to a new status, refreshing `last_time`.
    pub fn transition(&mut self, status: TxnStatus) {
        self.status = status;
        self.last_time = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_refreshes_last_time() {
        let mut record = TxnRecord::new(TxnId::new(), String::new(), "127.0.0.1:50010".into());
        let before = record.last_time;
        std::thread::sleep(std::time::Duration::from_millis(2));
        record.transition(TxnStatus::Committed);
        assert_eq!(record.status, TxnStatus::Committed);
        assert!(record.last_time > before);
        assert!(record.status.is_final());
    }

    #[test]
    fn serde_roundtrip() {
        let record = TxnRecord::new(TxnId::new(), "req-1".into(), "10.0.0.3:50010".into());
        let json = serde_json::to_string(&record).unwrap();
        let back: TxnRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.txn_id, record.txn_id);
        assert_eq!(back.status, TxnStatus::OnProgress);
    }
}
