use std::cell::RefCell;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use urt_core::{ArdConfig, EventLoop, State, StateDevice, StreamTransport};
use urt_protocol::{DeviceHandler, DeviceIdentity, DeviceLink, DirectDevice, ProtocolError, Substate};

const IDENTITY: DeviceIdentity = DeviceIdentity {
    app_type: 0x41,
    uid: 7,
};

/// Reports a sensor reading on every poll and waits for a command
#[derive(Default)]
struct Sonar {
    polls: u32,
    registered: bool,
    received: Vec<(Vec<u8>, Vec<u8>)>,
}

impl DeviceHandler for Sonar {
    fn on_poll(&mut self, link: &mut DeviceLink<'_>) -> Result<(), ProtocolError> {
        if !self.registered {
            link.register_substate(b"cmd")?;
            self.registered = true;
        }
        self.polls += 1;
        link.set_substate(b"son", b"12")
    }

    fn on_substate(
        &mut self,
        _link: &mut DeviceLink<'_>,
        substate: Substate<'_>,
    ) -> Result<(), ProtocolError> {
        self.received.push((substate.key.to_vec(), substate.value.to_vec()));
        Ok(())
    }
}

/// Asks for a setting right after the handshake
#[derive(Default)]
struct Configured {
    limit: Option<Vec<u8>>,
}

impl DeviceHandler for Configured {
    fn on_poll(&mut self, _link: &mut DeviceLink<'_>) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn on_handshake(&mut self, link: &mut DeviceLink<'_>) -> Result<(), ProtocolError> {
        link.ask_substate(b"limit")
    }

    fn on_substate(
        &mut self,
        _link: &mut DeviceLink<'_>,
        substate: Substate<'_>,
    ) -> Result<(), ProtocolError> {
        self.limit = Some(substate.value.to_vec());
        Ok(())
    }
}

/// Run `handler` as a device on the far end of a stream until `done` says so
fn spawn_device<H, F>(stream: UnixStream, handler: H, done: F) -> thread::JoinHandle<H>
where
    H: DeviceHandler + Send + 'static,
    F: Fn(&H) -> bool + Send + 'static,
{
    thread::spawn(move || {
        let mut device = DirectDevice::new(IDENTITY, stream, handler);
        while !done(device.handler()) {
            if device.process_message().is_err() {
                break;
            }
        }
        // dropping the stream hangs up on the host
        device.into_inner().1
    })
}

fn config() -> ArdConfig {
    ArdConfig {
        handshake_timeout: Duration::from_millis(200),
        ..ArdConfig::default()
    }
}

#[test]
fn test_poll_set_register_push() {
    let (host, dev) = UnixStream::pair().unwrap();
    let sonar = spawn_device(dev, Sonar::default(), |s| !s.received.is_empty());

    let event_loop = EventLoop::new(Duration::from_millis(20));
    let state = State::new();
    let mut device =
        StateDevice::connect(StreamTransport::from_unix(host), &config(), state.clone()).unwrap();
    assert_eq!(device.identity(), IDENTITY);
    if let Some(sub) = event_loop.handle().register_interval_slot(device.poller()) {
        device.hold(sub);
    }
    event_loop.add_source(device).unwrap();

    // answer the first reading with a command
    let readings = Rc::new(RefCell::new(Vec::new()));
    let (r, s) = (readings.clone(), state.clone());
    let _reaction = state.register_slot(b"\x41\x07son", move |_, value| {
        r.borrow_mut().push(value.to_vec());
        s.set(b"\x41\x07cmd", "go");
    });

    event_loop.run().unwrap();

    let sonar = sonar.join().unwrap();
    assert!(sonar.polls >= 1);
    assert_eq!(sonar.received, vec![(b"cmd".to_vec(), b"go".to_vec())]);
    assert_eq!(state.get(b"\x41\x07son"), b"12");
    assert_eq!(*readings.borrow(), vec![b"12".to_vec()]);
    // the device's push registration went away with it
    assert_eq!(state.slot_count(b"\x41\x07cmd"), 0);
}

#[test]
fn test_device_get_is_answered() {
    let (host, dev) = UnixStream::pair().unwrap();
    let configured = spawn_device(dev, Configured::default(), |c| c.limit.is_some());

    let event_loop = EventLoop::default();
    let state = State::new();
    state.set(b"\x41\x07limit", "9");
    let device =
        StateDevice::connect(StreamTransport::from_unix(host), &config(), state.clone()).unwrap();
    event_loop.add_source(device).unwrap();

    event_loop.run().unwrap();
    assert_eq!(configured.join().unwrap().limit, Some(b"9".to_vec()));
}

#[test]
fn test_silent_device_fails_handshake() {
    let (host, _dev) = UnixStream::pair().unwrap();
    let config = ArdConfig {
        handshake_timeout: Duration::from_millis(20),
        ..ArdConfig::default()
    };
    let result = StateDevice::connect(StreamTransport::from_unix(host), &config, State::new());
    assert!(matches!(result, Err(urt_core::Error::HandshakeFailed { .. })));
}
