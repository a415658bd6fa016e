mod parse_args;

use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};

use log::{debug, error, info, trace};
use parse_args::{parse_args, AppArgs};
use urt_core::logger::Logger;
use urt_protocol::{
    BufferedDevice, DeviceHandler, DeviceIdentity, DeviceLink, DirectDevice, ProtocolError,
    Substate, BYTES_TARGET,
};

/// Key the simulated board asks the host to push to it
const COMMAND_KEY: &[u8] = b"cmd";

/// A sensor whose reading climbs by one on every poll
struct Sensor {
    key: Vec<u8>,
    reading: u32,
}

impl Sensor {
    fn new(key: &str) -> Self {
        Sensor {
            key: key.as_bytes().to_vec(),
            reading: 0,
        }
    }
}

impl DeviceHandler for Sensor {
    fn on_poll(&mut self, link: &mut DeviceLink<'_>) -> Result<(), ProtocolError> {
        self.reading = (self.reading + 1) % 1000;
        debug!("poll, reporting {}", self.reading);
        link.set_substate(&self.key, self.reading.to_string().as_bytes())
    }

    fn on_substate(
        &mut self,
        _link: &mut DeviceLink<'_>,
        substate: Substate<'_>,
    ) -> Result<(), ProtocolError> {
        info!(
            "host sent {} = {}",
            String::from_utf8_lossy(substate.key),
            String::from_utf8_lossy(substate.value)
        );
        Ok(())
    }

    fn on_handshake(&mut self, link: &mut DeviceLink<'_>) -> Result<(), ProtocolError> {
        info!("handshake complete");
        link.register_substate(COMMAND_KEY)
    }
}

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            std::process::exit(1);
        }
    };

    let logger = match &args.log_file {
        Some(path) => match Logger::file(path, args.verbosity) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Failed to open log file '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Logger::stderr(args.verbosity),
    };
    if let Err(e) = logger.init() {
        eprintln!("Failed to install logger: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = serve(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn serve(args: &AppArgs) -> io::Result<()> {
    let identity = DeviceIdentity::new(args.app_type, args.uid);
    let listener = TcpListener::bind(&args.listen)?;
    info!("simulating {} on {}", identity, args.listen);

    for stream in listener.incoming() {
        let stream = stream?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "host".to_string());
        info!("host {} connected", peer);
        let _ = stream.set_nodelay(true);
        let result = if args.direct {
            run_direct(identity, stream, Sensor::new(&args.key))
        } else {
            run_buffered(identity, stream, Sensor::new(&args.key))
        };
        match result {
            Ok(()) | Err(ProtocolError::ConnectionClosed) => info!("host {} disconnected", peer),
            Err(e) => error!("host {}: {}", peer, e),
        }
    }
    Ok(())
}

/// One blocking datagram read per message
fn run_direct(identity: DeviceIdentity, stream: TcpStream, sensor: Sensor) -> Result<(), ProtocolError> {
    let mut device = DirectDevice::new(identity, stream, sensor);
    loop {
        if let Some(kind) = device.process_message()? {
            trace!("handled {:?}", kind);
        }
    }
}

/// Bytes fed one at a time, as a receive interrupt would
fn run_buffered(identity: DeviceIdentity, stream: TcpStream, sensor: Sensor) -> Result<(), ProtocolError> {
    let mut reader = stream.try_clone()?;
    let mut device = BufferedDevice::new(identity, stream, sensor);
    let mut buf = [0u8; 256];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        for &byte in &buf[..n] {
            trace!(target: BYTES_TARGET, "rx {:02x}", byte);
            device.on_rx_byte(byte);
            while let Some(kind) = device.process_message()? {
                trace!("handled {:?}", kind);
            }
        }
    }
}
