//! Server side of a transport session

use crate::conn::{read_message_with, write_message_with};
use crate::error::{Result, TransportError};
use crate::handshake::server_handshake;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use txngate_protocol::{CodecKind, ErrorPayload, Message, MessageType};

const OUTBOUND_DEPTH: usize = 256;
const STREAM_DEPTH: usize = 64;

/// Application seam for a served connection.
///
/// `handle` answers unary requests; a returned [`ErrorPayload`] becomes a
/// typed `Error` frame on the same sequence number and the connection stays
/// usable. `handle_stream` owns a long-lived stream until either side closes
/// it or the transport tears down.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        cmd: &str,
        codec: CodecKind,
        payload: &[u8],
    ) -> std::result::Result<Vec<u8>, ErrorPayload>;

    async fn handle_stream(&self, cmd: &str, codec: CodecKind, payload: &[u8], stream: ServerStream);
}

/// Server half of a multiplexed stream.
pub struct ServerStream {
    seq: u32,
    cmd: String,
    outbound: mpsc::Sender<Message>,
    inbound: mpsc::Receiver<Message>,
}

impl ServerStream {
    /// Push a typed item to the client.
    pub async fn send<T: Serialize>(&self, value: &T) -> Result<()> {
        let payload = CodecKind::Json.encode(value)?;
        self.outbound
            .send(Message::stream(self.seq, &self.cmd, payload))
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    /// Receive the next raw item from the client; `None` once the client
    /// closed the stream or the connection went away.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await.map(|msg| msg.payload)
    }

    /// Close the stream from the server side.
    pub async fn close(&self) {
        let _ = self
            .outbound
            .send(Message::stream_close(self.seq, &self.cmd))
            .await;
    }
}

/// Drive one accepted socket: handshake, then pump frames until the peer
/// closes or errors. Requests are dispatched on spawned tasks so a slow
/// handler never stalls the read loop.
pub async fn serve_connection(
    mut socket: TcpStream,
    path: &str,
    handler: Arc<dyn RpcHandler>,
) -> Result<()> {
    socket.set_nodelay(true)?;
    // the compressor agreed on during the handshake runs in both pumps
    let compressor = server_handshake(&mut socket, path).await?;

    let (mut read_half, mut write_half) = socket.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_DEPTH);

    let writer_compressor = compressor.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(err) =
                write_message_with(&mut write_half, &msg, writer_compressor.as_ref()).await
            {
                tracing::debug!(error = %err, "server outbound pump stopped");
                break;
            }
        }
    });

    // open client-initiated streams, keyed by the opening sequence number
    let streams: Mutex<HashMap<u32, mpsc::Sender<Message>>> = Mutex::new(HashMap::new());

    let result = loop {
        let msg = match read_message_with(&mut read_half, compressor.as_ref()).await {
            Ok(msg) => msg,
            Err(err) => break Err(err),
        };
        match msg.typ {
            MessageType::Request => {
                let handler = handler.clone();
                let outbound = outbound_tx.clone();
                tokio::spawn(async move {
                    let reply = match handler.handle(&msg.cmd, msg.codec, &msg.payload).await {
                        Ok(payload) => Message::response(msg.seq, &msg.cmd, payload),
                        Err(err) => {
                            let payload = CodecKind::Json.encode(&err).unwrap_or_default();
                            Message::error(msg.seq, &msg.cmd, payload)
                        }
                    };
                    let _ = outbound.send(reply).await;
                });
            }
            MessageType::Ping => {
                let _ = outbound_tx
                    .send(Message::response(msg.seq, "ping", Vec::new()))
                    .await;
            }
            MessageType::Stream => {
                let existing = streams.lock().get(&msg.seq).cloned();
                match existing {
                    Some(sender) => {
                        // follow-up data frame on an open stream
                        let _ = sender.send(msg).await;
                    }
                    None => {
                        let (tx, rx) = mpsc::channel(STREAM_DEPTH);
                        streams.lock().insert(msg.seq, tx);
                        let stream = ServerStream {
                            seq: msg.seq,
                            cmd: msg.cmd.clone(),
                            outbound: outbound_tx.clone(),
                            inbound: rx,
                        };
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handler
                                .handle_stream(&msg.cmd, msg.codec, &msg.payload, stream)
                                .await;
                        });
                    }
                }
            }
            MessageType::StreamClose => {
                streams.lock().remove(&msg.seq);
            }
            MessageType::Close => break Ok(()),
            MessageType::Response | MessageType::Error => {
                tracing::debug!(seq = msg.seq, "unexpected response frame on server");
            }
        }
    };

    // Stop stream tasks and the writer; spawned request tasks finish into a
    // closed channel.
    streams.lock().clear();
    drop(outbound_tx);
    writer.abort();
    result
}
