//! Connection pool over transport sessions
//!
//! Maintains a small set of warm connections to coordinator replicas whose
//! addresses come from a discovery callback. Calls pop a warm connection,
//! and on a connection-level failure the pool validates the connection with
//! a ping; only if the ping also fails is a fresh connection dialed and the
//! call retried once. Protocol and business-level errors are returned to the
//! caller verbatim, never retried.
//!
//! Retried calls are not exactly-once: if the first attempt's response was
//! lost in transit rather than never executed, a retried non-idempotent
//! operation may run twice. Only naturally idempotent operations (aborts,
//! reads) are safe to route through the retry path blindly; this is a caller
//! responsibility.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use txngate_transport::{ClientSession, ClientStream, TransportError};

/// Discovery callback yielding the current coordinator address list.
pub type DiscoverFn = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no coordinator address discovered")]
    NoAddress,
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Tuning knobs for [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upgrade path used when dialing.
    pub path: String,
    /// Warm connections kept per address.
    pub capacity: usize,
    /// Attempts when discovery momentarily returns no addresses.
    pub discover_attempts: u32,
    /// Sleep between discovery attempts.
    pub discover_backoff: Duration,
    /// How long a surplus connection stays reusable before being closed.
    pub grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            path: txngate_transport::DEFAULT_RPC_PATH.to_string(),
            capacity: 3,
            discover_attempts: 3,
            discover_backoff: Duration::from_millis(200),
            grace: Duration::from_secs(5),
        }
    }
}

/// Pool of multiplexed RPC connections to one or more coordinators.
type IdleMap = Arc<Mutex<HashMap<String, VecDeque<Arc<ClientSession>>>>>;

pub struct Pool {
    config: PoolConfig,
    discover: DiscoverFn,
    idle: IdleMap,
    round_robin: AtomicUsize,
}

impl Pool {
    pub fn new(discover: DiscoverFn, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            discover,
            idle: Arc::new(Mutex::new(HashMap::new())),
            round_robin: AtomicUsize::new(0),
        })
    }

    /// Convenience constructor for a fixed address list.
    pub fn with_addresses(addresses: Vec<String>, config: PoolConfig) -> Arc<Self> {
        Self::new(Arc::new(move || addresses.clone()), config)
    }

    /// Issue `cmd` against any discovered coordinator.
    pub async fn call<I, O>(&self, cmd: &str, input: &I) -> Result<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        self.call_to(None, cmd, input).await
    }

    /// Issue `cmd` against a specific processor address (transaction joins)
    /// or any discovered coordinator when `processor` is `None`.
    pub async fn call_to<I, O>(&self, processor: Option<&str>, cmd: &str, input: &I) -> Result<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let addr = match processor {
            Some(addr) => addr.to_string(),
            None => self.pick_address().await?,
        };
        let conn = self.checkout(&addr).await?;

        match conn.call(cmd, input).await {
            Ok(output) => {
                self.checkin(&addr, conn);
                Ok(output)
            }
            Err(err) if err.is_timeout() => {
                // slow, not broken; late responses are discarded by seq
                self.checkin(&addr, conn);
                Err(err.into())
            }
            Err(err) => {
                if conn.ping().await.is_ok() {
                    // connection is healthy, the failure belongs to the call
                    self.checkin(&addr, conn);
                    return Err(err.into());
                }
                tracing::warn!(%addr, error = %err, "discarding broken pooled connection");
                conn.close().await;

                let fresh = self.dial(&addr).await?;
                match fresh.call(cmd, input).await {
                    Ok(output) => {
                        self.checkin(&addr, fresh);
                        Ok(output)
                    }
                    Err(retry_err) => {
                        fresh.close().await;
                        Err(retry_err.into())
                    }
                }
            }
        }
    }

    /// Open a long-lived stream on a dedicated connection to any discovered
    /// coordinator.
    ///
    /// The stream rides its own session rather than a pooled one so a slow
    /// consumer never ties up a shared connection. The session must outlive
    /// the stream; dropping both tears the connection down.
    pub async fn open_stream<I: Serialize>(
        &self,
        cmd: &str,
        input: &I,
    ) -> Result<(Arc<ClientSession>, ClientStream)> {
        let addr = self.pick_address().await?;
        let session = self.dial(&addr).await?;
        let stream = session.open_stream(cmd, input).await?;
        Ok((session, stream))
    }

    /// Probe any discovered coordinator.
    pub async fn ping(&self) -> Result<()> {
        let addr = self.pick_address().await?;
        let conn = self.checkout(&addr).await?;
        let result = conn.ping().await;
        match result {
            Ok(()) => {
                self.checkin(&addr, conn);
                Ok(())
            }
            Err(err) => {
                conn.close().await;
                Err(err.into())
            }
        }
    }

    /// Close every warm connection.
    pub async fn close(&self) {
        let drained: Vec<Arc<ClientSession>> = {
            let mut idle = self.idle.lock();
            idle.drain().flat_map(|(_, conns)| conns).collect()
        };
        for conn in drained {
            conn.close().await;
        }
    }

    async fn pick_address(&self) -> Result<String> {
        for attempt in 0..self.config.discover_attempts {
            let addresses = (self.discover)();
            if !addresses.is_empty() {
                let index = self.round_robin.fetch_add(1, Ordering::Relaxed);
                return Ok(addresses[index % addresses.len()].clone());
            }
            if attempt + 1 < self.config.discover_attempts {
                tokio::time::sleep(self.config.discover_backoff).await;
            }
        }
        Err(PoolError::NoAddress)
    }

    async fn checkout(&self, addr: &str) -> Result<Arc<ClientSession>> {
        loop {
            let conn = self
                .idle
                .lock()
                .get_mut(addr)
                .and_then(|queue| queue.pop_front());
            match conn {
                Some(conn) if !conn.is_closed() => return Ok(conn),
                Some(stale) => drop(stale),
                None => return self.dial(addr).await,
            }
        }
    }

    async fn dial(&self, addr: &str) -> Result<Arc<ClientSession>> {
        let session = ClientSession::connect(addr, &self.config.path).await?;
        Ok(Arc::new(session))
    }

    fn checkin(&self, addr: &str, conn: Arc<ClientSession>) {
        if conn.is_closed() {
            return;
        }
        let over_capacity = {
            let mut idle = self.idle.lock();
            let queue = idle.entry(addr.to_string()).or_default();
            queue.push_back(conn);
            queue.len() > self.config.capacity
        };
        if over_capacity {
            // Surplus connections stay reusable for a grace period to avoid
            // connection storms, then get trimmed back to capacity.
            let addr = addr.to_string();
            let grace = self.config.grace;
            let capacity = self.config.capacity;
            let idle = self.idle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let surplus: Vec<Arc<ClientSession>> = {
                    let mut map = idle.lock();
                    match map.get_mut(&addr) {
                        Some(queue) if queue.len() > capacity => {
                            queue.drain(capacity..).collect()
                        }
                        _ => Vec::new(),
                    }
                };
                for conn in surplus {
                    conn.close().await;
                }
            });
        }
    }
}
