//! ARD datagram framing and the handshake payload.

use std::io::{Read, Write};

use log::trace;

use crate::ProtocolError;

/// Largest payload a single datagram can carry (size byte minus 2 bytes overhead)
pub const MAX_PAYLOAD_SIZE: usize = 253;

/// Log target for per-byte wire tracing
pub const BYTES_TARGET: &str = "urt::bytes";

/// Message type constants.
///
/// `0x00` and `0x01` mean different things depending on direction, so both
/// names are provided.
pub mod msg_type {
    /// Host -> device: push all substates
    pub const POLL: u8 = 0x00;
    /// Host -> device: substate response
    pub const SUBSTATE: u8 = 0x01;
    /// Device -> host: set a substate
    pub const SET: u8 = 0x00;
    /// Device -> host: request a substate
    pub const GET: u8 = 0x01;
    /// Device -> host: subscribe to a substate
    pub const REGISTER: u8 = 0x02;
    /// Either direction: handshake
    pub const HANDSHAKE: u8 = 0xFF;
}

/// Bytes 0 and 1 between frames are padding, never a frame start.
pub fn is_interstitial(byte: u8) -> bool {
    byte <= 1
}

/// One complete, checksum-validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Datagram {
    pub fn new(kind: u8, payload: impl Into<Vec<u8>>) -> Self {
        Datagram {
            kind,
            payload: payload.into(),
        }
    }

    /// Encode to wire format
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self.kind, &self.payload)
    }

    /// Write datagram to a writer and flush it
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        let encoded = self.encode()?;
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one datagram from a reader (blocking, one byte at a time)
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Datagram, ProtocolError> {
        decode(|| {
            let mut byte = [0u8; 1];
            reader.read_exact(&mut byte)?;
            Ok(byte[0])
        })
    }
}

/// Encode a datagram: `[size][type][payload...][!size]` where
/// `size = payload.len() + 2`.
pub fn encode(kind: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }
    let size = (payload.len() + 2) as u8;
    let mut result = Vec::with_capacity(payload.len() + 3);
    result.push(size);
    result.push(kind);
    result.extend_from_slice(payload);
    result.push(!size);
    Ok(result)
}

/// Decode one datagram from a byte source.
///
/// Leading interstitial bytes are skipped. Read errors are returned as-is;
/// a bad trailer yields `ChecksumMismatch` after the whole frame has been
/// consumed, so the source is left at the next frame boundary.
pub fn decode<F>(mut next_byte: F) -> Result<Datagram, ProtocolError>
where
    F: FnMut() -> Result<u8, ProtocolError>,
{
    let size = loop {
        let byte = next_byte()?;
        if !is_interstitial(byte) {
            break byte;
        }
        trace!(target: BYTES_TARGET, "skipping interstitial 0x{:02x}", byte);
    };

    let kind = next_byte()?;
    let len = size as usize - 2;
    let mut payload = Vec::with_capacity(len);
    for _ in 0..len {
        payload.push(next_byte()?);
    }

    let trailer = next_byte()?;
    if trailer != !size {
        return Err(ProtocolError::ChecksumMismatch {
            expected: !size,
            found: trailer,
        });
    }

    trace!(target: BYTES_TARGET, "datagram type=0x{:02x} len={}", kind, len);
    Ok(Datagram { kind, payload })
}

/// Device identification exchanged during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub app_type: u8,
    pub uid: u8,
}

impl DeviceIdentity {
    pub fn new(app_type: u8, uid: u8) -> Self {
        DeviceIdentity { app_type, uid }
    }

    /// Length of a handshake response on the wire
    pub const RESPONSE_LEN: usize = 5;

    /// The handshake request a host sends: `{2, 0xFF, !2}`
    pub fn request() -> [u8; 3] {
        [2, msg_type::HANDSHAKE, !2]
    }

    /// The handshake response a device sends: `{4, 0xFF, app_type, uid, !4}`
    pub fn response(&self) -> [u8; Self::RESPONSE_LEN] {
        [4, msg_type::HANDSHAKE, self.app_type, self.uid, !4]
    }

    /// Validate a raw handshake response
    pub fn parse_response(bytes: &[u8]) -> Result<Self, ProtocolError> {
        match bytes {
            [4, msg_type::HANDSHAKE, app_type, uid, trailer] if *trailer == !4u8 => {
                Ok(DeviceIdentity::new(*app_type, *uid))
            }
            _ => Err(ProtocolError::InvalidFormat(format!(
                "Bad handshake response: {:02x?}",
                bytes
            ))),
        }
    }

    /// Prefix that scopes this device's keys in the host state
    pub fn key_prefix(&self) -> [u8; 2] {
        [self.app_type, self.uid]
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "app 0x{:02x} uid {}", self.app_type, self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_slice(bytes: &[u8]) -> Result<Datagram, ProtocolError> {
        let mut cursor = std::io::Cursor::new(bytes);
        Datagram::read_from(&mut cursor)
    }

    #[test]
    fn test_wire_format() {
        let encoded = encode(msg_type::SET, b"\x03son12").unwrap();
        assert_eq!(encoded, vec![8, 0x00, 3, b's', b'o', b'n', b'1', b'2', !8u8]);
    }

    #[test]
    fn test_empty_payload() {
        let encoded = encode(msg_type::POLL, &[]).unwrap();
        assert_eq!(encoded, vec![2, 0x00, 0xfd]);
        let decoded = decode_slice(&encoded).unwrap();
        assert_eq!(decoded, Datagram::new(msg_type::POLL, vec![]));
    }

    #[test]
    fn test_payload_bound() {
        assert!(encode(0x00, &[0xaa; MAX_PAYLOAD_SIZE]).is_ok());
        assert!(matches!(
            encode(0x00, &[0xaa; MAX_PAYLOAD_SIZE + 1]),
            Err(ProtocolError::PayloadTooLarge(254))
        ));
    }

    #[test]
    fn test_skips_interstitial_bytes() {
        let frame = [0x00, 0x01, 0x00, 4, 0x00, 0x41, 0xbb, !4u8];
        let decoded = decode_slice(&frame).unwrap();
        assert_eq!(decoded, Datagram::new(0x00, vec![0x41, 0xbb]));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut frame = encode(0x01, b"\x01k").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x10;
        assert!(matches!(
            decode_slice(&frame),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_recovers_after_bad_frame() {
        let mut stream = vec![3, 0x00, 0x55, 0x00];
        stream.extend(encode(0x02, b"\x01x").unwrap());
        let mut cursor = std::io::Cursor::new(stream);
        assert!(Datagram::read_from(&mut cursor).is_err());
        let next = Datagram::read_from(&mut cursor).unwrap();
        assert_eq!(next, Datagram::new(0x02, b"\x01x".to_vec()));
    }

    #[test]
    fn test_truncated_frame_is_connection_closed() {
        assert!(matches!(
            decode_slice(&[6, 0x01, 3, b's']),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_handshake_bytes() {
        assert_eq!(DeviceIdentity::request(), [0x02, 0xff, 0xfd]);
        let id = DeviceIdentity::new(0x41, 0);
        assert_eq!(id.response(), [0x04, 0xff, 0x41, 0x00, 0xfb]);
        assert_eq!(DeviceIdentity::parse_response(&id.response()).unwrap(), id);
        assert!(DeviceIdentity::parse_response(&[4, 0xff, 0x41, 0x00, 0x00]).is_err());
        assert!(DeviceIdentity::parse_response(&[4, 0xfe, 0x41, 0x00, 0xfb]).is_err());
    }
}
