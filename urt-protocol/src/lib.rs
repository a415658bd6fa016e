//! # URT Protocol
//!
//! Wire formats shared by URT hosts and devices.
//!
//! ## ARD datagrams (serial links)
//!
//! ```text
//! [size:u8][type:u8][payload: size-2 bytes][!size:u8]
//! ```
//!
//! `size` is the payload length plus 2. Bytes `0x00` and `0x01` at a frame
//! boundary are padding and are skipped. A trailer that is not the one's
//! complement of `size` invalidates the frame.
//!
//! | Type | Host -> device | Device -> host | Payload |
//! |------|----------------|----------------|---------|
//! | 0x00 | POLL | SET | empty / `key_len, key, value` |
//! | 0x01 | SUBSTATE | GET | `key_len, key, value` / `key_len, key` |
//! | 0x02 | - | REGISTER | `key_len, key` |
//! | 0xFF | HANDSHAKE | HANDSHAKE | empty / `app_type, uid` |
//!
//! ## StateSocket frames (TCP)
//!
//! ```text
//! [size:u8][type:u8][key_len:u8][key...][value...]
//! ```
//!
//! `size` counts every byte after itself; there is no trailer. Type `0x00`
//! sets a key, type `0x01` requests a key and also carries the answer.

pub mod assembler;
pub mod datagram;
pub mod device;
mod error;
pub mod queue;
pub mod state_frame;
pub mod substate;

pub use assembler::{ReceiveAssembler, RxState};
pub use datagram::{msg_type, Datagram, DeviceIdentity, BYTES_TARGET, MAX_PAYLOAD_SIZE};
pub use device::{BufferedDevice, DeviceHandler, DeviceLink, DirectDevice, NoInterrupt, RxInterrupt};
pub use error::ProtocolError;
pub use queue::{MessageKind, MessageQueue};
pub use state_frame::StateFrame;
pub use substate::Substate;
