//! RPC surface of the coordinator
//!
//! Two commands exist on the wire: `RDBOperation` for unary data and
//! transaction-control calls, and `WatchTransaction` for a server-push
//! stream of state-change events. Anything else gets a typed error frame
//! and the connection stays up.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::pubsub::Publisher;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use txngate_protocol::{CodecKind, ErrorPayload, CMD_RDB_OPERATION, CMD_WATCH_TRANSACTION};
use txngate_transport::{serve_connection, RpcHandler, ServerStream};

/// Connection-level handler wiring commands to the dispatcher and the
/// event publisher.
pub struct RpcService {
    dispatcher: Arc<Dispatcher>,
    publisher: Arc<Publisher>,
}

impl RpcService {
    pub fn new(dispatcher: Arc<Dispatcher>, publisher: Arc<Publisher>) -> Self {
        Self {
            dispatcher,
            publisher,
        }
    }
}

#[async_trait]
impl RpcHandler for RpcService {
    async fn handle(
        &self,
        cmd: &str,
        _codec: CodecKind,
        payload: &[u8],
    ) -> std::result::Result<Vec<u8>, ErrorPayload> {
        match cmd {
            CMD_RDB_OPERATION => {
                let reply = self.dispatcher.dispatch(payload).await;
                CodecKind::Json
                    .encode(&reply)
                    .map_err(ErrorPayload::decode_failed)
            }
            _ => Err(ErrorPayload::command_not_found(cmd)),
        }
    }

    async fn handle_stream(
        &self,
        cmd: &str,
        _codec: CodecKind,
        _payload: &[u8],
        mut stream: ServerStream,
    ) {
        if cmd != CMD_WATCH_TRANSACTION {
            tracing::debug!(cmd, "rejecting unknown stream command");
            stream.close().await;
            return;
        }

        let (id, mut events) = self.publisher.subscribe();
        tracing::debug!(subscriber = id, "watch stream opened");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(record) => {
                        if stream.send(&record).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                inbound = stream.recv() => {
                    // clients never push data on a watch stream; `None`
                    // means the client closed it
                    if inbound.is_none() {
                        break;
                    }
                }
            }
        }
        self.publisher.unsubscribe(id);
        tracing::debug!(subscriber = id, "watch stream closed");
        stream.close().await;
    }
}

/// Accept loop lifecycle handle.
pub struct Server {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Bind the listener and start accepting connections.
    pub async fn bind(config: &Config, handler: Arc<dyn RpcHandler>) -> crate::error::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        let local_addr = listener.local_addr()?;
        let path = config.rpc_path.clone();

        let accept_task = tokio::spawn(async move {
            loop {
                let (socket, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let handler = handler.clone();
                let path = path.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(socket, &path, handler).await {
                        tracing::debug!(%peer, error = %err, "connection ended");
                    }
                });
            }
        });

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
