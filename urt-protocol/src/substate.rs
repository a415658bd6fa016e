//! Substate payloads: `[key_len][key...][value...]`.

use crate::datagram::MAX_PAYLOAD_SIZE;
use crate::ProtocolError;

/// A key/value pair borrowed from a received payload.
///
/// Valid only as long as the buffer it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Substate<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> Substate<'a> {
    pub fn new(key: &'a [u8], value: &'a [u8]) -> Self {
        Substate { key, value }
    }

    /// Split a payload into key and value.
    ///
    /// An empty payload or a key length running past the payload is
    /// rejected.
    pub fn parse(payload: &'a [u8]) -> Result<Self, ProtocolError> {
        let (&key_len, rest) = payload.split_first().ok_or_else(|| {
            ProtocolError::InvalidFormat("Substate payload is empty".to_string())
        })?;
        let key_len = key_len as usize;
        if key_len > rest.len() {
            return Err(ProtocolError::InvalidFormat(format!(
                "Key length {} exceeds payload of {} bytes",
                key_len,
                rest.len()
            )));
        }
        let (key, value) = rest.split_at(key_len);
        Ok(Substate { key, value })
    }

    /// Encode as a datagram payload
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self.key, self.value)
    }
}

/// Encode `key` and `value` into a substate payload.
pub fn encode(key: &[u8], value: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = 1 + key.len() + value.len();
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(len));
    }
    let mut payload = Vec::with_capacity(len);
    payload.push(key.len() as u8);
    payload.extend_from_slice(key);
    payload.extend_from_slice(value);
    Ok(payload)
}

/// Encode a key-only payload (get and register requests).
pub fn encode_key(key: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode(key, &[])
}
