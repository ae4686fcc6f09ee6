//! Transaction event fan-out
//!
//! Every state transition publishes the updated [`TxnRecord`] to all watch
//! subscribers. Delivery is best-effort with a bounded per-subscriber send:
//! a subscriber that cannot drain its channel within the timeout loses that
//! event rather than stalling the coordinator.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use txngate_common::TxnRecord;

const SUBSCRIBER_DEPTH: usize = 64;
const PUBLISH_TIMEOUT: Duration = Duration::from_millis(100);

/// Fan-out hub for transaction state-change events.
#[derive(Default)]
pub struct Publisher {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<TxnRecord>>>,
    next_id: AtomicU64,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; the returned id is used to unsubscribe.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<TxnRecord>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_DEPTH);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver one event to every subscriber.
    ///
    /// Senders are cloned out of the lock so a slow subscriber never holds
    /// it; closed subscribers are pruned afterwards.
    pub async fn publish(&self, record: &TxnRecord) {
        let senders: Vec<(u64, mpsc::Sender<TxnRecord>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, tx) in senders {
            match tx.send_timeout(record.clone(), PUBLISH_TIMEOUT).await {
                Ok(()) => {}
                Err(SendTimeoutError::Closed(_)) => closed.push(id),
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(
                        subscriber = id,
                        txn_id = %record.txn_id,
                        "subscriber too slow, dropping transaction event"
                    );
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in closed {
                subscribers.remove(&id);
            }
        }
    }
}
