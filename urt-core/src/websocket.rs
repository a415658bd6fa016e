//! StateSocket frames over WebSocket.
//!
//! Each binary WebSocket message carries exactly one StateSocket frame.
//! Connections are always served in the server role.

use std::cell::RefCell;
use std::io;
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

use log::{debug, info, trace, warn};
use tungstenite::protocol::Message as WsMessage;
use tungstenite::{accept, WebSocket};
use urt_protocol::{ProtocolError, StateFrame};

use crate::event_loop::{EventSource, LoopHandle, SourceRef};
use crate::socket_server::SocketServer;
use crate::state::State;
use crate::state_socket::{apply_frame, Role, FRAME_TIMEOUT};
use crate::Error;

/// Convert tungstenite error to ProtocolError, preserving WouldBlock
fn convert_ws_error(e: tungstenite::Error) -> ProtocolError {
    match e {
        tungstenite::Error::Io(io_err) => ProtocolError::Io(io_err),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ProtocolError::ConnectionClosed
        }
        other => ProtocolError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            other.to_string(),
        )),
    }
}

pub struct WsStateSocket {
    websocket: WebSocket<TcpStream>,
    state: State,
    peer: String,
}

impl WsStateSocket {
    /// Perform the WebSocket handshake on an accepted stream
    pub fn accept(stream: TcpStream, state: State) -> Result<Self, Error> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "websocket".to_string());
        // Disable Nagle's algorithm for lower latency
        let _ = stream.set_nodelay(true);
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(FRAME_TIMEOUT))?;
        let websocket = accept(stream).map_err(|e| {
            Error::connection(
                peer.clone(),
                io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()),
            )
        })?;
        info!("WebSocket handshake with {} complete", peer);
        Ok(WsStateSocket {
            websocket,
            state,
            peer,
        })
    }

    /// Send `key` with `value` as a 0x01 frame
    pub fn send_substate(
        &mut self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), ProtocolError> {
        self.send(WsMessage::Binary(StateFrame::response(key, value).encode()?))
    }

    fn send(&mut self, msg: WsMessage) -> Result<(), ProtocolError> {
        self.websocket.send(msg).map_err(convert_ws_error)
    }

    /// Read every message already available. Returns the messages to send
    /// back, or `None` once the peer closed the connection.
    fn drain(&mut self) -> Result<Option<Vec<WsMessage>>, ProtocolError> {
        let mut outgoing = Vec::new();
        loop {
            let msg = match self.websocket.read() {
                Ok(msg) => msg,
                Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Some(outgoing));
                }
                Err(e) => return Err(convert_ws_error(e)),
            };
            match msg {
                WsMessage::Binary(data) => {
                    let (frame, _len) = StateFrame::decode(&data)?;
                    trace!("{} <- {:?}", self.peer, frame);
                    if let Some(reply) = apply_frame(&self.state, Role::Server, frame) {
                        outgoing.push(WsMessage::Binary(reply.encode()?));
                    }
                }
                WsMessage::Ping(data) => outgoing.push(WsMessage::Pong(data)),
                WsMessage::Close(_) => return Ok(None),
                WsMessage::Text(_) => debug!("{}: ignoring text message", self.peer),
                WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    fn process(&mut self) -> Result<bool, ProtocolError> {
        self.websocket.get_ref().set_nonblocking(true)?;
        let drained = self.drain();
        self.websocket.get_ref().set_nonblocking(false)?;
        match drained? {
            Some(outgoing) => {
                for msg in outgoing {
                    self.send(msg)?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl EventSource for WsStateSocket {
    fn raw_fd(&self) -> RawFd {
        self.websocket.get_ref().as_raw_fd()
    }

    fn on_activity(&mut self) -> bool {
        match self.process() {
            Ok(open) => {
                if !open {
                    info!("WebSocket {} closed by peer", self.peer);
                }
                open
            }
            Err(e) => {
                info!("WebSocket {}: {}", self.peer, e);
                false
            }
        }
    }

    fn name(&self) -> String {
        format!("WsStateSocket {}", self.peer)
    }
}

impl SocketServer {
    /// Serve every connection with a [`WsStateSocket`] bound to `state`
    pub fn ws_state_sockets(addr: &str, handle: LoopHandle, state: State) -> Result<Self, Error> {
        Self::bind(addr, handle, move |stream, peer| {
            match WsStateSocket::accept(stream, state.clone()) {
                Ok(socket) => Some(Rc::new(RefCell::new(socket)) as SourceRef),
                Err(e) => {
                    warn!("{}: {}", peer, e);
                    None
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn client(addr: std::net::SocketAddr) -> WebSocket<TcpStream> {
        let stream = TcpStream::connect(addr).unwrap();
        let (ws, _response) = tungstenite::client(format!("ws://{}/", addr), stream).unwrap();
        ws
    }

    fn served(state: &State) -> (WsStateSocket, thread::JoinHandle<WebSocket<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || client(addr));
        let (stream, _) = listener.accept().unwrap();
        let socket = WsStateSocket::accept(stream, state.clone()).unwrap();
        (socket, peer)
    }

    #[test]
    fn test_binary_frames_set_and_get() {
        let state = State::new();
        let (mut socket, peer) = served(&state);
        let mut ws = peer.join().unwrap();

        let set = StateFrame::set("mode", "auto").encode().unwrap();
        let get = StateFrame::get("mode").encode().unwrap();
        ws.send(WsMessage::Binary(set)).unwrap();
        ws.send(WsMessage::Binary(get)).unwrap();

        let reader = thread::spawn(move || loop {
            if let WsMessage::Binary(data) = ws.read().unwrap() {
                return StateFrame::decode(&data).unwrap().0;
            }
        });
        while !reader.is_finished() {
            if sys::wait_readable(socket.raw_fd(), Duration::from_millis(50)).unwrap() {
                assert!(socket.on_activity());
            }
        }
        assert_eq!(state.get("mode"), b"auto");
        assert_eq!(reader.join().unwrap(), StateFrame::response("mode", "auto"));
    }

    #[test]
    fn test_close_removes_socket() {
        let state = State::new();
        let (mut socket, peer) = served(&state);
        let mut ws = peer.join().unwrap();
        ws.close(None).unwrap();
        let _ = ws.flush();

        let mut open = true;
        for _ in 0..20 {
            if sys::wait_readable(socket.raw_fd(), Duration::from_millis(50)).unwrap() {
                open = socket.on_activity();
                if !open {
                    break;
                }
            }
        }
        assert!(!open);
    }
}
