//! HTTP `CONNECT` handshake
//!
//! The RPC channel shares its port with an HTTP server: the client opens a
//! plain TCP connection, issues `CONNECT <path> HTTP/1.0`, and once the
//! server answers 200 the socket is hijacked for the binary protocol. The
//! handshake reader consumes one byte at a time so no protocol bytes are
//! swallowed with the HTTP tail.
//!
//! The client names its payload compressor in a request header; a server
//! that does not carry the scheme refuses the upgrade, so after a 200 both
//! ends are guaranteed to run the same transform.

use crate::compress::{compressor_by_name, Compressor, Identity};
use crate::error::{Result, TransportError};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upgrade path served by the coordinator.
pub const DEFAULT_RPC_PATH: &str = "/txn/v1/rpc";

/// Header carrying the client's compressor token.
pub const COMPRESS_HEADER: &str = "X-Txngate-Compress";

/// Bound on handshake bytes before the peer is considered hostile.
const MAX_HANDSHAKE: usize = 4096;

/// Issue the `CONNECT` request, advertising `compress` as the payload
/// scheme, and wait for a 200 from the server.
pub async fn client_handshake<S>(stream: &mut S, path: &str, compress: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("CONNECT {path} HTTP/1.0\r\n{COMPRESS_HEADER}: {compress}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let response = read_until_blank_line(stream).await?;
    let status = response.lines().next().unwrap_or_default();
    if status.starts_with("HTTP/1.0 200") || status.starts_with("HTTP/1.1 200") {
        Ok(())
    } else {
        Err(TransportError::HandshakeRejected(status.to_string()))
    }
}

/// Accept a `CONNECT` request for `path` and confirm the upgrade.
///
/// Returns the compressor both sides agreed on. A client that names no
/// scheme gets [`Identity`]; one that names a scheme this build does not
/// carry is refused with a 400.
pub async fn server_handshake<S>(stream: &mut S, path: &str) -> Result<Arc<dyn Compressor>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = read_until_blank_line(stream).await?;
    let mut lines = request.lines();
    let line = lines.next().unwrap_or_default();
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let req_path = parts.next().unwrap_or_default();

    if method != "CONNECT" || req_path != path {
        stream.write_all(b"HTTP/1.0 400 Bad Request\r\n\r\n").await?;
        stream.flush().await?;
        return Err(TransportError::HandshakeRejected(line.to_string()));
    }

    let mut compressor: Arc<dyn Compressor> = Arc::new(Identity);
    for header in lines {
        let Some((name, value)) = header.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case(COMPRESS_HEADER) {
            let token = value.trim();
            match compressor_by_name(token) {
                Some(found) => compressor = found,
                None => {
                    stream.write_all(b"HTTP/1.0 400 Bad Request\r\n\r\n").await?;
                    stream.flush().await?;
                    return Err(TransportError::HandshakeRejected(format!(
                        "unsupported compressor: {token}"
                    )));
                }
            }
        }
    }

    stream.write_all(b"HTTP/1.0 200 Connected\r\n\r\n").await?;
    stream.flush().await?;
    Ok(compressor)
}

async fn read_until_blank_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut buf = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        if buf.len() >= MAX_HANDSHAKE {
            return Err(TransportError::HandshakeRejected(
                "handshake too long".to_string(),
            ));
        }
        stream.read_exact(&mut byte).await?;
        buf.push(byte[0]);
    }
    String::from_utf8(buf)
        .map_err(|_| TransportError::HandshakeRejected("handshake not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upgrade_accepted() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            let compressor = server_handshake(&mut server, DEFAULT_RPC_PATH).await.unwrap();
            assert_eq!(compressor.name(), "identity");
        });
        client_handshake(&mut client, DEFAULT_RPC_PATH, "identity")
            .await
            .unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn wrong_path_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            assert!(server_handshake(&mut server, DEFAULT_RPC_PATH).await.is_err());
        });
        let err = client_handshake(&mut client, "/somewhere/else", "identity")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::HandshakeRejected(_)));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_compressor_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            assert!(server_handshake(&mut server, DEFAULT_RPC_PATH).await.is_err());
        });
        let err = client_handshake(&mut client, DEFAULT_RPC_PATH, "zstd")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::HandshakeRejected(_)));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn missing_compress_header_defaults_to_identity() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            let compressor = server_handshake(&mut server, DEFAULT_RPC_PATH).await.unwrap();
            assert_eq!(compressor.name(), "identity");
        });
        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes(),
        )
        .await
        .unwrap();
        let response = read_until_blank_line(&mut client).await.unwrap();
        assert!(response.starts_with("HTTP/1.0 200"));
        server_task.await.unwrap();
    }
}
