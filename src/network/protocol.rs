//! Wire format
//!
//! There is no framing, versioning or sequence header. Per channel:
//!
//! - client → server: one handshake datagram, content ignored
//! - audio server → client: `"<decimal unit count>"` once, then one raw PCM
//!   chunk per datagram
//! - video server → client: one base64 JPEG per datagram, no size reply
//!
//! The heartbeat marker is the only payload a server treats specially.

use bytes::Bytes;

use crate::constants::MAX_UDP_PAYLOAD;
use crate::error::{HandshakeError, NetworkError};

/// Audio size reply: the unit count as decimal UTF-8 text
pub fn encode_size_reply(unit_count: u64) -> Bytes {
    Bytes::from(unit_count.to_string())
}

/// Parse an audio size reply
pub fn parse_size_reply(payload: &[u8]) -> Result<u64, HandshakeError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| HandshakeError::Malformed(String::from_utf8_lossy(payload).into_owned()))?;
    text.trim()
        .parse::<u64>()
        .map_err(|_| HandshakeError::Malformed(text.to_string()))
}

/// True if `payload` is exactly the heartbeat marker
pub fn is_marker(payload: &[u8], marker: &[u8]) -> bool {
    !marker.is_empty() && payload == marker
}

/// Reject payloads that cannot travel in one datagram
pub fn check_datagram_size(len: usize) -> Result<(), NetworkError> {
    if len > MAX_UDP_PAYLOAD {
        return Err(NetworkError::PacketTooLarge(len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_reply() {
        assert_eq!(encode_size_reply(50).as_ref(), b"50");
        assert_eq!(parse_size_reply(b"50").unwrap(), 50);
        assert_eq!(parse_size_reply(b" 1764\n").unwrap(), 1764);
    }

    #[test]
    fn test_malformed_size_reply() {
        assert!(matches!(parse_size_reply(b""), Err(HandshakeError::Malformed(_))));
        assert!(matches!(parse_size_reply(b"fifty"), Err(HandshakeError::Malformed(_))));
        assert!(matches!(parse_size_reply(b"-3"), Err(HandshakeError::Malformed(_))));
        assert!(matches!(parse_size_reply(&[0xff, 0xfe]), Err(HandshakeError::Malformed(_))));
    }

    #[test]
    fn test_marker_match() {
        assert!(is_marker(b"SYNC_MARKER", b"SYNC_MARKER"));
        assert!(!is_marker(b"Hello", b"SYNC_MARKER"));
        assert!(!is_marker(b"", b""));
    }

    #[test]
    fn test_datagram_limit() {
        assert!(check_datagram_size(65507).is_ok());
        assert!(matches!(
            check_datagram_size(65508),
            Err(NetworkError::PacketTooLarge(65508))
        ));
    }
}
