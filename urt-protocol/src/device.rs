//! Device-side endpoints of the ARD protocol.
//!
//! A device answers the host's handshake with its [`DeviceIdentity`], pushes
//! substates when polled, and receives substates the host sends back. Two
//! receive strategies are provided:
//!
//! * [`DirectDevice`] blocks on the link and handles one datagram per call.
//! * [`BufferedDevice`] is fed one byte at a time from a receive interrupt
//!   and handles queued messages from the application loop.

use std::io::{Read, Write};

use log::{debug, trace};

use crate::assembler::ReceiveAssembler;
use crate::datagram::{self, msg_type, Datagram, DeviceIdentity};
use crate::queue::{MessageKind, MessageQueue};
use crate::substate::{self, Substate};
use crate::ProtocolError;

/// Outbound half of a device link
pub struct DeviceLink<'a> {
    writer: &'a mut dyn Write,
}

impl<'a> DeviceLink<'a> {
    pub fn new(writer: &'a mut dyn Write) -> Self {
        DeviceLink { writer }
    }

    /// Send a raw datagram
    pub fn send_datagram(&mut self, kind: u8, payload: &[u8]) -> Result<(), ProtocolError> {
        let encoded = datagram::encode(kind, payload)?;
        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Set `key` to `value` in the host state
    pub fn set_substate(&mut self, key: &[u8], value: &[u8]) -> Result<(), ProtocolError> {
        let payload = substate::encode(key, value)?;
        self.send_datagram(msg_type::SET, &payload)
    }

    /// Ask the host for the value of `key`
    pub fn ask_substate(&mut self, key: &[u8]) -> Result<(), ProtocolError> {
        let payload = substate::encode_key(key)?;
        self.send_datagram(msg_type::GET, &payload)
    }

    /// Ask the host to push `key` whenever it changes
    pub fn register_substate(&mut self, key: &[u8]) -> Result<(), ProtocolError> {
        let payload = substate::encode_key(key)?;
        self.send_datagram(msg_type::REGISTER, &payload)
    }

    /// Answer a handshake request
    pub fn send_handshake(&mut self, identity: DeviceIdentity) -> Result<(), ProtocolError> {
        self.writer.write_all(&identity.response())?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Application callbacks of a device.
pub trait DeviceHandler {
    /// The host asked for all substates.
    fn on_poll(&mut self, link: &mut DeviceLink<'_>) -> Result<(), ProtocolError>;

    /// The host sent a substate, usually in reply to `ask_substate` or
    /// because of a `register_substate` subscription.
    fn on_substate(
        &mut self,
        _link: &mut DeviceLink<'_>,
        _substate: Substate<'_>,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Called after the handshake response has been sent.
    fn on_handshake(&mut self, _link: &mut DeviceLink<'_>) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Receive interrupt control for [`BufferedDevice`].
///
/// Byte delivery must be masked while the shared queue is modified.
pub trait RxInterrupt {
    fn disable_rx(&mut self);
    fn enable_rx(&mut self);
}

/// For hosts where byte delivery is already serialized
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInterrupt;

impl RxInterrupt for NoInterrupt {
    fn disable_rx(&mut self) {}
    fn enable_rx(&mut self) {}
}

/// Device endpoint that reads datagrams synchronously.
pub struct DirectDevice<T: Read + Write, H: DeviceHandler> {
    identity: DeviceIdentity,
    link: T,
    handler: H,
}

impl<T: Read + Write, H: DeviceHandler> DirectDevice<T, H> {
    pub fn new(identity: DeviceIdentity, link: T, handler: H) -> Self {
        DirectDevice {
            identity,
            link,
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn link_mut(&mut self) -> &mut T {
        &mut self.link
    }

    /// Block for one datagram and dispatch it.
    ///
    /// Corrupt frames are dropped and reported as `Ok(None)`, as are
    /// datagram types a device does not handle.
    pub fn process_message(&mut self) -> Result<Option<MessageKind>, ProtocolError> {
        let datagram = match Datagram::read_from(&mut self.link) {
            Ok(d) => d,
            Err(e) if e.is_framing() => {
                debug!("dropping corrupt datagram: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(kind) = MessageKind::from_type(datagram.kind) else {
            trace!("ignoring datagram type 0x{:02x}", datagram.kind);
            return Ok(None);
        };

        let mut link = DeviceLink::new(&mut self.link);
        match kind {
            MessageKind::Poll => self.handler.on_poll(&mut link)?,
            MessageKind::Substate => match Substate::parse(&datagram.payload) {
                Ok(sub) => self.handler.on_substate(&mut link, sub)?,
                Err(e) => {
                    debug!("dropping malformed substate: {}", e);
                    return Ok(None);
                }
            },
            MessageKind::Handshake => {
                link.send_handshake(self.identity)?;
                self.handler.on_handshake(&mut link)?;
            }
        }
        Ok(Some(kind))
    }

    pub fn into_inner(self) -> (T, H) {
        (self.link, self.handler)
    }
}

/// Device endpoint fed from a receive interrupt.
pub struct BufferedDevice<W: Write, H: DeviceHandler, I: RxInterrupt = NoInterrupt> {
    identity: DeviceIdentity,
    writer: W,
    handler: H,
    irq: I,
    assembler: ReceiveAssembler,
    queue: MessageQueue,
}

impl<W: Write, H: DeviceHandler> BufferedDevice<W, H, NoInterrupt> {
    pub fn new(identity: DeviceIdentity, writer: W, handler: H) -> Self {
        Self::with_interrupt(identity, writer, handler, NoInterrupt)
    }
}

impl<W: Write, H: DeviceHandler, I: RxInterrupt> BufferedDevice<W, H, I> {
    pub fn with_interrupt(identity: DeviceIdentity, writer: W, handler: H, irq: I) -> Self {
        BufferedDevice {
            identity,
            writer,
            handler,
            irq,
            assembler: ReceiveAssembler::new(),
            queue: MessageQueue::new(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Receive-interrupt entry point.
    pub fn on_rx_byte(&mut self, byte: u8) {
        self.irq.disable_rx();
        self.assembler.feed(byte, &mut self.queue);
        self.irq.enable_rx();
    }

    /// Process the message at the head of the queue, if any.
    pub fn process_message(&mut self) -> Result<Option<MessageKind>, ProtocolError> {
        let Some(kind) = self.queue.head() else {
            return Ok(None);
        };
        match kind {
            MessageKind::Poll => {
                self.atomic_pop();
                let mut link = DeviceLink::new(&mut self.writer);
                self.handler.on_poll(&mut link)?;
            }
            MessageKind::Substate => {
                // The buffer may be overwritten once the entry is popped.
                let result = match self.assembler.substate() {
                    Some(sub) => {
                        let mut link = DeviceLink::new(&mut self.writer);
                        self.handler.on_substate(&mut link, sub)
                    }
                    None => Ok(()),
                };
                self.atomic_pop();
                result?;
            }
            MessageKind::Handshake => {
                self.atomic_pop();
                let mut link = DeviceLink::new(&mut self.writer);
                link.send_handshake(self.identity)?;
                self.handler.on_handshake(&mut link)?;
            }
        }
        Ok(Some(kind))
    }

    fn atomic_pop(&mut self) {
        self.irq.disable_rx();
        self.queue.pop();
        self.irq.enable_rx();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl DeviceHandler for Recorder {
        fn on_poll(&mut self, link: &mut DeviceLink<'_>) -> Result<(), ProtocolError> {
            self.events.push("poll".to_string());
            link.set_substate(b"son", b"12")
        }

        fn on_substate(
            &mut self,
            _link: &mut DeviceLink<'_>,
            substate: Substate<'_>,
        ) -> Result<(), ProtocolError> {
            self.events.push(format!(
                "substate {}={}",
                String::from_utf8_lossy(substate.key),
                String::from_utf8_lossy(substate.value)
            ));
            Ok(())
        }

        fn on_handshake(&mut self, link: &mut DeviceLink<'_>) -> Result<(), ProtocolError> {
            self.events.push("handshake".to_string());
            link.register_substate(b"mode")
        }
    }

    /// Reads from a fixed input, records everything written
    struct Loopback {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Loopback {
        fn new(input: Vec<u8>) -> Self {
            Loopback {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_link_helpers() {
        let mut out = Vec::new();
        let mut link = DeviceLink::new(&mut out);
        link.set_substate(b"son", b"12").unwrap();
        link.ask_substate(b"son").unwrap();
        link.register_substate(b"m").unwrap();
        assert_eq!(
            out,
            vec![
                8, 0x00, 3, b's', b'o', b'n', b'1', b'2', !8u8, //
                6, 0x01, 3, b's', b'o', b'n', !6u8, //
                4, 0x02, 1, b'm', !4u8,
            ]
        );
    }

    #[test]
    fn test_direct_handshake_and_poll() {
        let mut input = vec![0u8; 16];
        input.extend(DeviceIdentity::request());
        input.extend(datagram::encode(msg_type::POLL, &[]).unwrap());
        let identity = DeviceIdentity::new(0x41, 0);
        let mut device = DirectDevice::new(identity, Loopback::new(input), Recorder::default());

        assert_eq!(device.process_message().unwrap(), Some(MessageKind::Handshake));
        assert_eq!(device.process_message().unwrap(), Some(MessageKind::Poll));
        assert!(matches!(
            device.process_message(),
            Err(ProtocolError::ConnectionClosed)
        ));

        let (link, handler) = device.into_inner();
        assert_eq!(handler.events, vec!["handshake", "poll"]);
        let mut expected = identity.response().to_vec();
        expected.extend(datagram::encode(msg_type::REGISTER, b"\x04mode").unwrap());
        expected.extend(datagram::encode(msg_type::SET, b"\x03son12").unwrap());
        assert_eq!(link.output, expected);
    }

    #[test]
    fn test_direct_drops_corrupt_frame() {
        let mut input = vec![4, 0x01, 1, b'k', 0x00];
        input.extend(datagram::encode(msg_type::SUBSTATE, b"\x01k7").unwrap());
        let mut device = DirectDevice::new(
            DeviceIdentity::new(1, 2),
            Loopback::new(input),
            Recorder::default(),
        );
        assert_eq!(device.process_message().unwrap(), None);
        assert_eq!(device.process_message().unwrap(), Some(MessageKind::Substate));
        assert_eq!(device.handler().events, vec!["substate k=7"]);
    }

    #[test]
    fn test_buffered_processing_order() {
        let identity = DeviceIdentity::new(0x41, 3);
        let mut device = BufferedDevice::new(identity, Vec::new(), Recorder::default());
        let mut stream = datagram::encode(msg_type::SUBSTATE, b"\x04mode\x02").unwrap();
        stream.extend(DeviceIdentity::request());
        stream.extend(datagram::encode(msg_type::POLL, &[]).unwrap());
        stream.extend(datagram::encode(msg_type::POLL, &[]).unwrap());
        for byte in stream {
            device.on_rx_byte(byte);
        }
        assert_eq!(
            device.queue().kinds(),
            vec![MessageKind::Substate, MessageKind::Handshake, MessageKind::Poll]
        );

        while device.process_message().unwrap().is_some() {}
        assert_eq!(
            device.handler().events,
            vec!["substate mode=\u{2}", "handshake", "poll"]
        );
        assert!(device.queue().is_empty());
    }

    #[derive(Default)]
    struct CountingIrq {
        depth: i32,
        toggles: usize,
    }

    impl RxInterrupt for CountingIrq {
        fn disable_rx(&mut self) {
            self.depth += 1;
            self.toggles += 1;
        }
        fn enable_rx(&mut self) {
            self.depth -= 1;
        }
    }

    #[test]
    fn test_buffered_masks_interrupt() {
        let mut device = BufferedDevice::with_interrupt(
            DeviceIdentity::new(0, 0),
            Vec::new(),
            Recorder::default(),
            CountingIrq::default(),
        );
        for byte in datagram::encode(msg_type::POLL, &[]).unwrap() {
            device.on_rx_byte(byte);
        }
        device.process_message().unwrap();
        assert_eq!(device.irq.depth, 0);
        assert_eq!(device.irq.toggles, 4);
    }
}
