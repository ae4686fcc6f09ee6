//! Transaction event subscription

use crate::Result;
use std::sync::Arc;
use txngate_common::TxnRecord;
use txngate_transport::{ClientSession, ClientStream};

/// A live subscription to transaction state-change events.
///
/// Holds its own connection; dropping the watcher tears it down.
pub struct Watcher {
    // keeps the connection's pump tasks alive for the stream's lifetime
    _session: Arc<ClientSession>,
    stream: ClientStream,
}

impl Watcher {
    pub(crate) fn new(session: Arc<ClientSession>, stream: ClientStream) -> Self {
        Self {
            _session: session,
            stream,
        }
    }

    /// Next event; `None` once the coordinator closes the stream or the
    /// connection goes away.
    pub async fn recv(&mut self) -> Result<Option<TxnRecord>> {
        Ok(self
            .stream
            .recv()
            .await
            .map_err(txngate_pool::PoolError::from)?)
    }

    /// Stop watching.
    pub async fn close(&mut self) {
        self.stream.close().await;
    }
}
