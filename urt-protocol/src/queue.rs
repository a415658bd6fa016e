//! Pending-message queue shared between the receive path and the
//! application loop of a buffered device.

use crate::datagram::msg_type;

/// Kinds of host -> device messages a device reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Poll,
    Substate,
    Handshake,
}

impl MessageKind {
    /// Map a host -> device datagram type to a message kind
    pub fn from_type(kind: u8) -> Option<Self> {
        match kind {
            msg_type::POLL => Some(MessageKind::Poll),
            msg_type::SUBSTATE => Some(MessageKind::Substate),
            msg_type::HANDSHAKE => Some(MessageKind::Handshake),
            _ => None,
        }
    }
}

/// Number of slots; one per message kind
pub const QUEUE_CAPACITY: usize = 3;

/// Ordered queue holding at most one entry per message kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageQueue {
    slots: [Option<MessageKind>; QUEUE_CAPACITY],
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `kind` unless it is already queued.
    pub fn push(&mut self, kind: MessageKind) {
        for slot in self.slots.iter_mut() {
            match slot {
                Some(queued) if *queued == kind => return,
                Some(_) => continue,
                None => {
                    *slot = Some(kind);
                    return;
                }
            }
        }
    }

    /// Remove the head, shifting the rest down.
    pub fn pop(&mut self) -> Option<MessageKind> {
        let head = self.slots[0];
        self.slots.rotate_left(1);
        self.slots[QUEUE_CAPACITY - 1] = None;
        head
    }

    pub fn head(&self) -> Option<MessageKind> {
        self.slots[0]
    }

    pub fn contains(&self, kind: MessageKind) -> bool {
        self.slots.contains(&Some(kind))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().take_while(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }

    /// Queued kinds, head first
    pub fn kinds(&self) -> Vec<MessageKind> {
        self.slots.iter().map_while(|s| *s).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MessageKind::*;

    #[test]
    fn test_dedup_preserves_order() {
        let mut queue = MessageQueue::new();
        for kind in [Poll, Poll, Substate, Poll] {
            queue.push(kind);
        }
        assert_eq!(queue.kinds(), vec![Poll, Substate]);
    }

    #[test]
    fn test_pop_shifts() {
        let mut queue = MessageQueue::new();
        queue.push(Handshake);
        queue.push(Poll);
        queue.push(Substate);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(Handshake));
        assert_eq!(queue.kinds(), vec![Poll, Substate]);
        queue.push(Handshake);
        assert_eq!(queue.kinds(), vec![Poll, Substate, Handshake]);
        assert_eq!(queue.pop(), Some(Poll));
        assert_eq!(queue.pop(), Some(Substate));
        assert_eq!(queue.pop(), Some(Handshake));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_from_type() {
        assert_eq!(MessageKind::from_type(0x00), Some(Poll));
        assert_eq!(MessageKind::from_type(0x01), Some(Substate));
        assert_eq!(MessageKind::from_type(0xff), Some(Handshake));
        assert_eq!(MessageKind::from_type(0x02), None);
    }
}
