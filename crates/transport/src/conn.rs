//! Framed message I/O over a byte stream

use crate::compress::Compressor;
use crate::error::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use txngate_protocol::{FrameHeader, Message, HEADER_LEN};

/// Read one complete frame. A magic mismatch or malformed header is a
/// [`WireError`](txngate_protocol::WireError) and the caller must tear the
/// connection down.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut header_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_buf).await?;
    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).await?;
    }
    Ok(header.into_message(payload))
}

/// Read one complete frame, inflating the payload with the connection's
/// negotiated compressor.
pub async fn read_message_with<R: AsyncRead + Unpin>(
    reader: &mut R,
    compressor: &dyn Compressor,
) -> Result<Message> {
    let mut msg = read_message(reader).await?;
    msg.payload = compressor.decompress(msg.payload)?;
    Ok(msg)
}

/// Write one complete frame and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<()> {
    let buf = msg.encode()?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one complete frame, deflating the payload with the connection's
/// negotiated compressor.
pub async fn write_message_with<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
    compressor: &dyn Compressor,
) -> Result<()> {
    let mut framed = msg.clone();
    framed.payload = compressor.compress(framed.payload)?;
    write_message(writer, &framed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use txngate_protocol::MessageType;

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = Message::request(9, "RDBOperation", b"{}".to_vec());
        write_message(&mut a, &msg).await.unwrap();
        let back = read_message(&mut b).await.unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.typ, MessageType::Request);
    }

    struct Obfuscate;

    impl Compressor for Obfuscate {
        fn name(&self) -> &'static str {
            "obfuscate"
        }

        fn compress(&self, mut payload: Vec<u8>) -> Result<Vec<u8>> {
            for b in &mut payload {
                *b ^= 0x5a;
            }
            Ok(payload)
        }

        fn decompress(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
            self.compress(payload)
        }
    }

    #[tokio::test]
    async fn compressor_transforms_payload_on_the_wire() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = Message::request(3, "RDBOperation", b"{\"op\":1}".to_vec());

        write_message_with(&mut a, &msg, &Obfuscate).await.unwrap();

        // the raw frame carries the transformed bytes, not the plaintext
        let raw = read_message(&mut b).await.unwrap();
        assert_ne!(raw.payload, msg.payload);

        let (mut a, mut b) = tokio::io::duplex(4096);
        write_message_with(&mut a, &msg, &Obfuscate).await.unwrap();
        let back = read_message_with(&mut b, &Obfuscate).await.unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn garbage_header_is_wire_error() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_all(&mut a, &[0u8; HEADER_LEN])
            .await
            .unwrap();
        let err = read_message(&mut b).await.unwrap_err();
        assert!(matches!(err, crate::TransportError::Wire(_)));
    }
}
