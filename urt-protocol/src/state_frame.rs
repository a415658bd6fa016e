//! StateSocket frames: `[size][type][key_len][key...][value...]`.
//!
//! `size` counts every byte after itself. There is no trailer; these frames
//! travel over reliable streams only.

use std::io::{Read, Write};

use crate::ProtocolError;

/// Largest `key.len() + value.len()` a frame can carry
pub const MAX_FRAME_BODY: usize = u8::MAX as usize - 2;

/// Frame type constants
pub mod frame_type {
    /// Set a key
    pub const SET: u8 = 0x00;
    /// Request a key (inbound) or carry its value (outbound)
    pub const GET: u8 = 0x01;
}

/// A StateSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFrame {
    pub kind: u8,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl StateFrame {
    /// Set `key` to `value` on the peer
    pub fn set(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        StateFrame {
            kind: frame_type::SET,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Ask the peer for `key`
    pub fn get(key: impl Into<Vec<u8>>) -> Self {
        StateFrame {
            kind: frame_type::GET,
            key: key.into(),
            value: Vec::new(),
        }
    }

    /// Answer a get with the current value
    pub fn response(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        StateFrame {
            kind: frame_type::GET,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Encode message to wire format
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = self.key.len() + self.value.len();
        if body > MAX_FRAME_BODY {
            return Err(ProtocolError::PayloadTooLarge(body));
        }
        let size = (body + 2) as u8;
        let mut result = Vec::with_capacity(body + 3);
        result.push(size);
        result.push(self.kind);
        result.push(self.key.len() as u8);
        result.extend_from_slice(&self.key);
        result.extend_from_slice(&self.value);
        Ok(result)
    }

    /// Decode a frame from a buffer, returning it and the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(StateFrame, usize), ProtocolError> {
        let Some(&size) = data.first() else {
            return Err(ProtocolError::InvalidFormat("Message too short".to_string()));
        };
        let total_len = 1 + size as usize;
        if data.len() < total_len {
            return Err(ProtocolError::InvalidFormat(format!(
                "Incomplete message: have {} bytes, need {}",
                data.len(),
                total_len
            )));
        }
        let frame = Self::from_body(&data[1..total_len])?;
        Ok((frame, total_len))
    }

    /// Write message to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        let encoded = self.encode()?;
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(())
    }

    /// Read message from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<StateFrame, ProtocolError> {
        let mut size = [0u8; 1];
        reader.read_exact(&mut size)?;
        let mut body = vec![0u8; size[0] as usize];
        reader.read_exact(&mut body)?;
        Self::from_body(&body)
    }

    fn from_body(body: &[u8]) -> Result<StateFrame, ProtocolError> {
        if body.len() < 2 {
            return Err(ProtocolError::InvalidFormat(format!(
                "Frame of {} bytes has no key length",
                body.len()
            )));
        }
        let kind = body[0];
        let key_len = body[1] as usize;
        let rest = &body[2..];
        if key_len > rest.len() {
            return Err(ProtocolError::InvalidFormat(format!(
                "Key length {} exceeds frame body of {} bytes",
                key_len,
                rest.len()
            )));
        }
        let (key, value) = rest.split_at(key_len);
        Ok(StateFrame {
            kind,
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let encoded = StateFrame::set("speed", "42").encode().unwrap();
        assert_eq!(encoded, b"\x09\x00\x05speed42".to_vec());
    }

    #[test]
    fn test_no_checksum_trailer() {
        let encoded = StateFrame::get("k").encode().unwrap();
        assert_eq!(encoded, vec![3, 0x01, 1, b'k']);
    }

    #[test]
    fn test_decode_reports_consumed() {
        let mut stream = StateFrame::response("a", "1").encode().unwrap();
        stream.extend(StateFrame::set("b", "2").encode().unwrap());
        let (first, used) = StateFrame::decode(&stream).unwrap();
        assert_eq!(first, StateFrame::response("a", "1"));
        let (second, _) = StateFrame::decode(&stream[used..]).unwrap();
        assert_eq!(second, StateFrame::set("b", "2"));
    }

    #[test]
    fn test_read_from_stream() {
        let mut cursor = std::io::Cursor::new(StateFrame::set("x", "").encode().unwrap());
        let frame = StateFrame::read_from(&mut cursor).unwrap();
        assert_eq!(frame.key, b"x");
        assert!(frame.value.is_empty());
        assert!(matches!(
            StateFrame::read_from(&mut cursor),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(StateFrame::decode(&[1, 0x00]).is_err());
        assert!(StateFrame::decode(&[4, 0x00, 9, b'a', b'b']).is_err());
        assert!(StateFrame::decode(&[9, 0x00]).is_err());
    }

    #[test]
    fn test_body_limit() {
        assert!(StateFrame::set(vec![b'k'; 3], vec![b'v'; 250]).encode().is_ok());
        assert!(StateFrame::set(vec![b'k'; 3], vec![b'v'; 251]).encode().is_err());
    }
}
