//! Byte-at-a-time datagram assembly for receive interrupts.
//!
//! The assembler owns a single substate buffer. While a substate message is
//! queued and not yet processed, further substate frames are dropped so the
//! buffered payload stays valid until the application consumes it.

use log::trace;

use crate::datagram::{is_interstitial, msg_type, BYTES_TARGET, MAX_PAYLOAD_SIZE};
use crate::queue::{MessageKind, MessageQueue};
use crate::substate::Substate;

/// Receive state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    AwaitingType,
    AwaitingPayload,
    AwaitingChecksum,
}

#[derive(Debug)]
pub struct ReceiveAssembler {
    state: RxState,
    size: u8,
    kind: u8,
    remaining: usize,
    drop: bool,
    store: bool,
    buffer: Vec<u8>,
}

impl Default for ReceiveAssembler {
    fn default() -> Self {
        ReceiveAssembler {
            state: RxState::Idle,
            size: 0,
            kind: 0,
            remaining: 0,
            drop: false,
            store: false,
            buffer: Vec::with_capacity(MAX_PAYLOAD_SIZE),
        }
    }
}

impl ReceiveAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Feed one received byte.
    ///
    /// Returns the message kind pushed onto `queue` when this byte completes
    /// an intact frame.
    pub fn feed(&mut self, byte: u8, queue: &mut MessageQueue) -> Option<MessageKind> {
        trace!(target: BYTES_TARGET, "rx 0x{:02x} in {:?}", byte, self.state);
        match self.state {
            RxState::Idle => {
                if !is_interstitial(byte) {
                    self.size = byte;
                    self.state = RxState::AwaitingType;
                }
                None
            }
            RxState::AwaitingType => {
                self.kind = byte;
                self.remaining = self.size as usize - 2;
                let substate = byte == msg_type::SUBSTATE;
                self.drop = substate && queue.contains(MessageKind::Substate);
                self.store = substate && !self.drop;
                if self.store {
                    self.buffer.clear();
                }
                self.state = if self.remaining == 0 {
                    RxState::AwaitingChecksum
                } else {
                    RxState::AwaitingPayload
                };
                None
            }
            RxState::AwaitingPayload => {
                if self.store {
                    self.buffer.push(byte);
                }
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.state = RxState::AwaitingChecksum;
                }
                None
            }
            RxState::AwaitingChecksum => {
                self.state = RxState::Idle;
                let intact = byte == !self.size;
                let dropped = std::mem::take(&mut self.drop);
                if !intact || dropped {
                    trace!(target: BYTES_TARGET, "frame discarded (intact={})", intact);
                    return None;
                }
                let kind = MessageKind::from_type(self.kind)?;
                if kind == MessageKind::Substate && Substate::parse(&self.buffer).is_err() {
                    return None;
                }
                queue.push(kind);
                Some(kind)
            }
        }
    }

    /// The substate of the last accepted substate frame.
    ///
    /// Only meaningful while a `Substate` entry is queued.
    pub fn substate(&self) -> Option<Substate<'_>> {
        Substate::parse(&self.buffer).ok()
    }
}
