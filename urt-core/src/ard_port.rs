//! Host end of an ARD link: handshake and datagram exchange.

use std::io::{Read, Write};
use std::time::Duration;

use log::{debug, info, trace};
use urt_protocol::{datagram, Datagram, DeviceIdentity, ProtocolError, BYTES_TARGET};

use crate::transport::Transport;
use crate::Error;

/// Handshake and link timing for ARD devices
#[derive(Debug, Clone)]
pub struct ArdConfig {
    /// Line speeds tried in order during the handshake
    pub baud_rates: Vec<u32>,
    /// How long to wait for a handshake response at each speed
    pub handshake_timeout: Duration,
    /// Null bytes sent to flush a half-received frame out of the device
    pub flush_len: usize,
    /// Read timeout once the link is up. `None` blocks indefinitely.
    pub byte_timeout: Option<Duration>,
}

impl Default for ArdConfig {
    fn default() -> Self {
        ArdConfig {
            baud_rates: vec![2400, 19200],
            handshake_timeout: Duration::from_millis(500),
            flush_len: 255,
            byte_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// A handshaken ARD link.
pub struct ArdPort<T: Transport> {
    transport: T,
    identity: DeviceIdentity,
    name: String,
}

impl<T: Transport> ArdPort<T> {
    /// Identify the device on `transport`, trying each configured baud rate.
    pub fn handshake(mut transport: T, config: &ArdConfig) -> Result<Self, Error> {
        let name = transport.name();
        transport.set_timeout(Some(config.handshake_timeout))?;
        for &baud in &config.baud_rates {
            match Self::try_baud(&mut transport, baud, config)? {
                Some(identity) => {
                    transport.set_timeout(config.byte_timeout)?;
                    info!("{}: {} at {} baud", name, identity, baud);
                    return Ok(ArdPort {
                        transport,
                        identity,
                        name,
                    });
                }
                None => debug!("{}: no handshake at {} baud", name, baud),
            }
        }
        Err(Error::HandshakeFailed { device: name })
    }

    fn try_baud(
        transport: &mut T,
        baud: u32,
        config: &ArdConfig,
    ) -> Result<Option<DeviceIdentity>, Error> {
        transport.set_baud_rate(baud)?;
        transport.write_all(&vec![0u8; config.flush_len])?;
        transport.flush()?;
        transport.clear_input()?;
        transport.write_all(&DeviceIdentity::request())?;
        transport.flush()?;

        if !transport.wait_readable(config.handshake_timeout)? {
            return Ok(None);
        }
        let mut response = [0u8; DeviceIdentity::RESPONSE_LEN];
        if let Err(e) = transport.read_exact(&mut response) {
            debug!("handshake read failed at {} baud: {}", baud, e);
            return Ok(None);
        }
        trace!(target: BYTES_TARGET, "handshake response {:02x?}", response);
        Ok(DeviceIdentity::parse_response(&response).ok())
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn app_type(&self) -> u8 {
        self.identity.app_type
    }

    pub fn uid(&self) -> u8 {
        self.identity.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receive one datagram (blocking, bounded by the byte timeout)
    pub fn get_datagram(&mut self) -> Result<Datagram, ProtocolError> {
        let datagram = Datagram::read_from(&mut self.transport)?;
        trace!(
            "{} <- type=0x{:02x} {:02x?}",
            self.name,
            datagram.kind,
            datagram.payload
        );
        Ok(datagram)
    }

    /// Send one datagram. Oversized payloads are rejected before any I/O.
    pub fn send_datagram(&mut self, kind: u8, payload: &[u8]) -> Result<(), ProtocolError> {
        let encoded = datagram::encode(kind, payload)?;
        trace!("{} -> type=0x{:02x} {:02x?}", self.name, kind, payload);
        self.transport.write_all(&encoded)?;
        self.transport.flush()?;
        Ok(())
    }
}

impl<T: Transport> Drop for ArdPort<T> {
    fn drop(&mut self) {
        info!("ARD device {} ({}) closed", self.name, self.identity);
    }
}
