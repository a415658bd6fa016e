//! StateSocket: the shared state exposed over a reliable byte stream.
//!
//! Keys travel verbatim, without any device prefix.

use std::os::unix::io::RawFd;
use std::time::Duration;

use log::{debug, info, trace};
use urt_protocol::state_frame::frame_type;
use urt_protocol::{ProtocolError, StateFrame};

use crate::event_loop::EventSource;
use crate::state::State;
use crate::transport::{StreamTransport, Transport};
use crate::Error;

/// Read timeout for the rest of a frame once its first byte arrived
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Which end of the connection this socket is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted connection: inbound gets are answered
    Server,
    /// Outbound connection: inbound 0x01 frames are responses and get stored
    Client,
}

/// Apply one inbound frame to `state`, returning the reply to send, if any.
pub(crate) fn apply_frame(state: &State, role: Role, frame: StateFrame) -> Option<StateFrame> {
    match (frame.kind, role) {
        (frame_type::SET, _) => {
            state.set(&frame.key, &frame.value);
            None
        }
        (frame_type::GET, Role::Server) => {
            let value = state.get(&frame.key);
            Some(StateFrame::response(frame.key, value))
        }
        (frame_type::GET, Role::Client) => {
            state.set(&frame.key, &frame.value);
            None
        }
        (other, _) => {
            debug!("ignoring StateSocket frame type 0x{:02x}", other);
            None
        }
    }
}

pub struct StateSocket<T: Transport = StreamTransport> {
    transport: T,
    state: State,
    role: Role,
    name: String,
}

impl StateSocket<StreamTransport> {
    /// Open an outbound StateSocket to `addr`
    pub fn connect(addr: &str, state: State) -> Result<Self, Error> {
        let transport = StreamTransport::connect(addr)?;
        info!("StateSocket connected to {}", addr);
        Self::new(transport, state, Role::Client)
    }
}

impl<T: Transport> StateSocket<T> {
    pub fn new(mut transport: T, state: State, role: Role) -> Result<Self, Error> {
        transport.set_timeout(Some(FRAME_TIMEOUT))?;
        let name = transport.name();
        Ok(StateSocket {
            transport,
            state,
            role,
            name,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> &str {
        &self.name
    }

    /// Send `key` with `value` as a 0x01 frame
    pub fn send_substate(
        &mut self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), ProtocolError> {
        self.send(&StateFrame::response(key, value))
    }

    /// Set `key` on the peer
    pub fn send_set(
        &mut self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), ProtocolError> {
        self.send(&StateFrame::set(key, value))
    }

    /// Ask the peer for `key`
    pub fn request(&mut self, key: impl Into<Vec<u8>>) -> Result<(), ProtocolError> {
        self.send(&StateFrame::get(key))
    }

    fn send(&mut self, frame: &StateFrame) -> Result<(), ProtocolError> {
        trace!("{} -> {:?}", self.name, frame);
        frame.write_to(&mut self.transport)
    }

    fn process(&mut self) -> Result<(), ProtocolError> {
        let frame = StateFrame::read_from(&mut self.transport)?;
        trace!("{} <- {:?}", self.name, frame);
        if let Some(reply) = apply_frame(&self.state, self.role, frame) {
            self.send(&reply)?;
        }
        Ok(())
    }
}

impl<T: Transport> EventSource for StateSocket<T> {
    fn raw_fd(&self) -> RawFd {
        self.transport.raw_fd()
    }

    fn on_activity(&mut self) -> bool {
        match self.process() {
            Ok(()) => true,
            Err(ProtocolError::ConnectionClosed) => {
                info!("StateSocket {} closed by peer", self.name);
                false
            }
            Err(e) => {
                info!("StateSocket {}: {}", self.name, e);
                false
            }
        }
    }

    fn name(&self) -> String {
        format!("StateSocket {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn server(state: &State) -> (StateSocket, StreamTransport) {
        let (near, far) = StreamTransport::pair().unwrap();
        let socket = StateSocket::new(near, state.clone(), Role::Server).unwrap();
        (socket, far)
    }

    #[test]
    fn test_set_frame_updates_state() {
        let state = State::new();
        let (mut socket, mut peer) = server(&state);
        peer.write_all(b"\x09\x00\x05speed42").unwrap();
        assert!(socket.on_activity());
        assert_eq!(state.get("speed"), b"42");
    }

    #[test]
    fn test_get_frame_is_answered() {
        let state = State::new();
        state.set("mode", "auto");
        let (mut socket, mut peer) = server(&state);
        StateFrame::get("mode").write_to(&mut peer).unwrap();
        assert!(socket.on_activity());
        let reply = StateFrame::read_from(&mut peer).unwrap();
        assert_eq!(reply, StateFrame::response("mode", "auto"));
    }

    #[test]
    fn test_client_stores_responses() {
        let state = State::new();
        let (near, mut far) = StreamTransport::pair().unwrap();
        let mut socket = StateSocket::new(near, state.clone(), Role::Client).unwrap();
        StateFrame::response("mode", "manual").write_to(&mut far).unwrap();
        assert!(socket.on_activity());
        assert_eq!(state.get("mode"), b"manual");
        assert!(!far.has_input().unwrap());
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let state = State::new();
        let (mut socket, mut peer) = server(&state);
        peer.write_all(b"\x03\x07\x01k").unwrap();
        assert!(socket.on_activity());
        assert_eq!(state.keys(), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn test_peer_hangup_removes_socket() {
        let state = State::new();
        let (mut socket, peer) = server(&state);
        drop(peer);
        assert!(!socket.on_activity());
    }

    #[test]
    fn test_outbound_helpers() {
        let state = State::new();
        let (mut socket, mut peer) = server(&state);
        socket.send_set("a", "1").unwrap();
        socket.request("b").unwrap();
        socket.send_substate("c", "3").unwrap();
        assert_eq!(StateFrame::read_from(&mut peer).unwrap(), StateFrame::set("a", "1"));
        assert_eq!(StateFrame::read_from(&mut peer).unwrap(), StateFrame::get("b"));
        assert_eq!(StateFrame::read_from(&mut peer).unwrap(), StateFrame::response("c", "3"));
    }
}
