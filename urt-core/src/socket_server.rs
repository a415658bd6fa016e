//! Listening socket that turns accepted connections into event sources.

use std::cell::RefCell;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

use log::{info, warn};

use crate::event_loop::{EventSource, LoopHandle, SourceRef};
use crate::state::State;
use crate::state_socket::{Role, StateSocket};
use crate::transport::StreamTransport;
use crate::Error;

/// Builds the source serving one accepted connection. `None` rejects it.
pub type ConnectionFactory = Box<dyn FnMut(TcpStream, SocketAddr) -> Option<SourceRef>>;

pub struct SocketServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handle: LoopHandle,
    factory: ConnectionFactory,
}

impl SocketServer {
    /// Listen on `addr`, building connection sources with `factory`
    pub fn bind(
        addr: &str,
        handle: LoopHandle,
        factory: impl FnMut(TcpStream, SocketAddr) -> Option<SourceRef> + 'static,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).map_err(|e| Error::connection(addr, e))?;
        // accept() must never block the loop
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("listening on {}", local_addr);
        Ok(SocketServer {
            listener,
            local_addr,
            handle,
            factory: Box::new(factory),
        })
    }

    /// Serve every connection with a [`StateSocket`] bound to `state`
    pub fn state_sockets(addr: &str, handle: LoopHandle, state: State) -> Result<Self, Error> {
        Self::bind(addr, handle, move |stream, peer| {
            if let Err(e) = stream.set_nonblocking(false) {
                warn!("{}: {}", peer, e);
                return None;
            }
            match StateSocket::new(StreamTransport::from_tcp(stream), state.clone(), Role::Server) {
                Ok(socket) => Some(Rc::new(RefCell::new(socket)) as SourceRef),
                Err(e) => {
                    warn!("{}: {}", peer, e);
                    None
                }
            }
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl EventSource for SocketServer {
    fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn on_activity(&mut self) -> bool {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                info!("accepted connection from {}", peer);
                if let Some(source) = (self.factory)(stream, peer) {
                    self.handle.add(source);
                }
                true
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                ) =>
            {
                true
            }
            Err(e) => {
                warn!("accept on {} failed: {}", self.local_addr, e);
                false
            }
        }
    }

    fn name(&self) -> String {
        format!("SocketServer {}", self.local_addr)
    }
}
