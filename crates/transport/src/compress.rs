//! Pluggable payload compression
//!
//! Frames are compressed per-payload, never per-stream: the 62-byte header
//! stays in the clear so the reader can frame without inflating. Which
//! compressor runs on a connection is negotiated once during the `CONNECT`
//! handshake and both pumps use it for every subsequent frame.

use crate::error::Result;
use std::sync::Arc;

/// Payload transform applied to every frame on a connection.
pub trait Compressor: Send + Sync + 'static {
    /// Token exchanged during the handshake.
    fn name(&self) -> &'static str;

    fn compress(&self, payload: Vec<u8>) -> Result<Vec<u8>>;

    fn decompress(&self, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// The no-op compressor every endpoint supports.
pub struct Identity;

impl Compressor for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn compress(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        Ok(payload)
    }

    fn decompress(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        Ok(payload)
    }
}

/// Look up a compressor by its negotiation token. `None` means the peer
/// asked for a scheme this endpoint does not carry and the handshake must
/// be refused.
pub fn compressor_by_name(name: &str) -> Option<Arc<dyn Compressor>> {
    match name {
        "identity" => Some(Arc::new(Identity)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_passes_payload_through() {
        let payload = b"{\"k\":\"v\"}".to_vec();
        let out = Identity.compress(payload.clone()).unwrap();
        assert_eq!(out, payload);
        let back = Identity.decompress(out).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn lookup_by_token() {
        assert_eq!(compressor_by_name("identity").unwrap().name(), "identity");
        assert!(compressor_by_name("zstd").is_none());
        assert!(compressor_by_name("").is_none());
    }
}
