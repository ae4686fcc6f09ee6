//! Client side of a transport session
//!
//! A session owns one TCP connection and multiplexes concurrent calls over
//! it: callers block on a per-request completion channel keyed by sequence
//! number, never on the raw socket. A read error terminates the session and
//! fails every in-flight request with a transport error.

use crate::compress::{Compressor, Identity};
use crate::conn::{read_message_with, write_message_with};
use crate::error::{Result, TransportError};
use crate::handshake::client_handshake;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use txngate_protocol::{CodecKind, ErrorPayload, Message, MessageType};

/// Read timeout for normal calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Pings answer fast or not at all.
const PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Bounded resend attempts before a timeout surfaces to the caller.
const REQUEST_ATTEMPTS: u32 = 3;
const PING_ATTEMPTS: u32 = 2;

const OUTBOUND_DEPTH: usize = 256;
const STREAM_DEPTH: usize = 64;

struct Shared {
    outbound: mpsc::Sender<Message>,
    inflight: Mutex<HashMap<u32, oneshot::Sender<Message>>>,
    streams: Mutex<HashMap<u32, mpsc::Sender<Message>>>,
    seq: AtomicU32,
    closed: AtomicBool,
}

impl Shared {
    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Terminal teardown: wake every in-flight caller and stop every stream.
    fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the completion senders wakes callers with a closed error
        self.inflight.lock().clear();
        self.streams.lock().clear();
    }
}

/// A multiplexed RPC connection to one coordinator.
pub struct ClientSession {
    shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    peer: String,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Dial `addr` and perform the `CONNECT` upgrade on `path` with no
    /// payload compression.
    pub async fn connect(addr: &str, path: &str) -> Result<Self> {
        Self::connect_with(addr, path, Arc::new(Identity)).await
    }

    /// Dial `addr`, negotiate `compressor` during the `CONNECT` upgrade on
    /// `path`, and start the session pumps. The server refuses the upgrade
    /// if it does not carry the same scheme.
    pub async fn connect_with(
        addr: &str,
        path: &str,
        compressor: Arc<dyn Compressor>,
    ) -> Result<Self> {
        let mut socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        client_handshake(&mut socket, path, compressor.name()).await?;

        let (mut read_half, mut write_half) = socket.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_DEPTH);

        let shared = Arc::new(Shared {
            outbound: outbound_tx,
            inflight: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            seq: AtomicU32::new(1),
            closed: AtomicBool::new(false),
        });

        let writer_shared = shared.clone();
        let writer_compressor = compressor.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let is_close = msg.typ == MessageType::Close;
                if let Err(err) =
                    write_message_with(&mut write_half, &msg, writer_compressor.as_ref()).await
                {
                    tracing::debug!(error = %err, "outbound pump stopped");
                    break;
                }
                // the close frame is the last thing on the wire; stopping
                // here lets `close` await the flush instead of guessing
                if is_close {
                    break;
                }
            }
            writer_shared.fail_all();
        });

        let reader_shared = shared.clone();
        let reader = tokio::spawn(async move {
            loop {
                let msg = match read_message_with(&mut read_half, compressor.as_ref()).await {
                    Ok(msg) => msg,
                    Err(err) => {
                        tracing::debug!(error = %err, "inbound pump stopped");
                        break;
                    }
                };
                match msg.typ {
                    MessageType::Response | MessageType::Error => {
                        let pending = reader_shared.inflight.lock().remove(&msg.seq);
                        if let Some(tx) = pending {
                            let _ = tx.send(msg);
                        }
                    }
                    MessageType::Ping => {
                        let reply = Message::response(msg.seq, "ping", Vec::new());
                        let _ = reader_shared.outbound.try_send(reply);
                    }
                    MessageType::Stream => {
                        let sender = reader_shared.streams.lock().get(&msg.seq).cloned();
                        if let Some(sender) = sender {
                            if sender.send(msg).await.is_err() {
                                // receiver dropped without closing
                            }
                        }
                    }
                    MessageType::StreamClose => {
                        reader_shared.streams.lock().remove(&msg.seq);
                    }
                    MessageType::Close => break,
                    MessageType::Request => {
                        tracing::debug!(seq = msg.seq, "unexpected request frame on client");
                    }
                }
            }
            reader_shared.fail_all();
        });

        Ok(Self {
            shared,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            peer: addr.to_string(),
        })
    }

    /// Address this session was dialed against.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether the session has been torn down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Issue a request and wait for its typed response.
    ///
    /// Retries a bounded number of times on timeout (each resend uses a
    /// fresh sequence number); any other failure surfaces immediately.
    pub async fn call<I, O>(&self, cmd: &str, input: &I) -> Result<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let payload = CodecKind::Json.encode(input)?;
        let reply = self
            .roundtrip(
                |seq| Message::request(seq, cmd, payload.clone()),
                REQUEST_TIMEOUT,
                REQUEST_ATTEMPTS,
            )
            .await?;
        Ok(reply.codec.decode(&reply.payload)?)
    }

    /// Liveness probe with a short timeout.
    pub async fn ping(&self) -> Result<()> {
        self.roundtrip(Message::ping, PING_TIMEOUT, PING_ATTEMPTS)
            .await?;
        Ok(())
    }

    /// Open a long-lived stream for `cmd`, seeded with `input`.
    pub async fn open_stream<I: Serialize>(&self, cmd: &str, input: &I) -> Result<ClientStream> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let payload = CodecKind::Json.encode(input)?;
        let seq = self.shared.next_seq();
        let (tx, rx) = mpsc::channel(STREAM_DEPTH);
        self.shared.streams.lock().insert(seq, tx);

        let open = Message::stream(seq, cmd, payload);
        if self.shared.outbound.send(open).await.is_err() {
            self.shared.streams.lock().remove(&seq);
            return Err(TransportError::ConnectionClosed);
        }

        Ok(ClientStream {
            seq,
            cmd: cmd.to_string(),
            rx,
            shared: self.shared.clone(),
            closed: false,
        })
    }

    /// Tear the session down, unblocking every in-flight call and stream.
    ///
    /// The close frame is flushed before teardown: the writer pump exits
    /// after writing it, and we await that exit rather than sleep.
    pub async fn close(&self) {
        let _ = self.shared.outbound.send(Message::close(0)).await;
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let abort = writer.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), writer)
                .await
                .is_err()
            {
                abort.abort();
            }
        }
        self.shared.fail_all();
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }

    async fn roundtrip<F>(&self, build: F, timeout: Duration, attempts: u32) -> Result<Message>
    where
        F: Fn(u32) -> Message,
    {
        for _ in 0..attempts {
            if self.is_closed() {
                return Err(TransportError::ConnectionClosed);
            }
            let seq = self.shared.next_seq();
            let (tx, rx) = oneshot::channel();
            self.shared.inflight.lock().insert(seq, tx);

            if self.shared.outbound.send(build(seq)).await.is_err() {
                self.shared.inflight.lock().remove(&seq);
                return Err(TransportError::ConnectionClosed);
            }

            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(msg)) => {
                    if msg.typ == MessageType::Error {
                        let err: ErrorPayload = msg.codec.decode(&msg.payload)?;
                        return Err(TransportError::Remote {
                            code: err.code,
                            message: err.message,
                        });
                    }
                    return Ok(msg);
                }
                Ok(Err(_)) => return Err(TransportError::ConnectionClosed),
                Err(_) => {
                    self.shared.inflight.lock().remove(&seq);
                    // resend with a fresh sequence number
                }
            }
        }
        Err(TransportError::Timeout { attempts })
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.shared.fail_all();
        if let Some(writer) = self.writer.lock().take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

/// Client half of a multiplexed stream.
///
/// `recv` suspends until the peer produces the next frame, the stream is
/// closed by either side, or the session shuts down.
pub struct ClientStream {
    seq: u32,
    cmd: String,
    rx: mpsc::Receiver<Message>,
    shared: Arc<Shared>,
    closed: bool,
}

impl ClientStream {
    /// Receive the next typed item; `None` once the stream has ended.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.rx.recv().await {
            Some(msg) => Ok(Some(msg.codec.decode(&msg.payload)?)),
            None => Ok(None),
        }
    }

    /// Send a typed item to the peer.
    pub async fn send<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::StreamClosed);
        }
        let payload = CodecKind::Json.encode(value)?;
        self.shared
            .outbound
            .send(Message::stream(self.seq, &self.cmd, payload))
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    /// Close the stream from this side.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.streams.lock().remove(&self.seq);
            let _ = self
                .shared
                .outbound
                .send(Message::stream_close(self.seq, &self.cmd))
                .await;
        }
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.streams.lock().remove(&self.seq);
            let _ = self
                .shared
                .outbound
                .try_send(Message::stream_close(self.seq, &self.cmd));
        }
    }
}
