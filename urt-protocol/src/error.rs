//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding URT frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error during read/write
    #[error("I/O error: {0}")]
    Io(std::io::Error),
    /// The peer closed the stream
    #[error("Connection closed")]
    ConnectionClosed,
    /// Trailing byte of a datagram was not the complement of its size byte
    #[error("Checksum mismatch: expected 0x{expected:02x}, found 0x{found:02x}")]
    ChecksumMismatch { expected: u8, found: u8 },
    /// Payload does not fit in a single frame
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    /// Frame is structurally invalid
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// Unknown message type received
    #[error("Unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),
}

impl ProtocolError {
    /// True for errors that only affect the frame being decoded. The stream
    /// itself is still usable afterwards.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::ChecksumMismatch { .. } | ProtocolError::InvalidFormat(_)
        )
    }

    /// True when the underlying read timed out or would block.
    pub fn is_timeout(&self) -> bool {
        match self {
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_connection_closed() {
        let e: ProtocolError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(e, ProtocolError::ConnectionClosed));
    }

    #[test]
    fn test_timeout_classification() {
        let e: ProtocolError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert!(e.is_timeout());
        assert!(!e.is_framing());
        let e = ProtocolError::ChecksumMismatch {
            expected: 0xfb,
            found: 0x00,
        };
        assert!(e.is_framing());
    }
}
