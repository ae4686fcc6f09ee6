//! Full-duplex message transport over TCP
//!
//! Both ends run the same symmetric pump: one task continuously reads frames
//! and dispatches them by type, one task drains an outbound queue, and
//! in-flight requests are correlated by sequence number. Connections are
//! established with an HTTP `CONNECT` handshake so the RPC channel can share
//! a port with an HTTP server; after the handshake only the binary protocol
//! runs on the socket.

mod client;
mod compress;
mod conn;
mod error;
mod handshake;
mod server;

pub use client::{ClientSession, ClientStream};
pub use compress::{compressor_by_name, Compressor, Identity};
pub use conn::{read_message, read_message_with, write_message, write_message_with};
pub use error::{Result, TransportError};
pub use handshake::{client_handshake, server_handshake, COMPRESS_HEADER, DEFAULT_RPC_PATH};
pub use server::{serve_connection, RpcHandler, ServerStream};
