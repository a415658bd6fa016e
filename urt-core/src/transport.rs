//! Duplex byte transports: serial lines and stream sockets.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::{sys, Error};

/// A duplex byte stream the event loop can watch.
pub trait Transport: Read + Write {
    /// Descriptor used for readiness polling
    fn raw_fd(&self) -> RawFd;

    /// Human-readable name for logs (device path or peer address)
    fn name(&self) -> String;

    /// Bound blocking reads. `None` blocks until data arrives.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Change line speed. Streams without a line speed ignore this.
    fn set_baud_rate(&mut self, _baud_rate: u32) -> io::Result<()> {
        Ok(())
    }

    /// Discard any received but unread input
    fn clear_input(&mut self) -> io::Result<()>;

    /// Wait up to `timeout` for input. Returns false on timeout.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        sys::wait_readable(self.raw_fd(), timeout)
    }

    /// Non-blocking check for pending input
    fn has_input(&mut self) -> io::Result<bool> {
        self.wait_readable(Duration::ZERO)
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn raw_fd(&self) -> RawFd {
        (**self).raw_fd()
    }

    fn name(&self) -> String {
        (**self).name()
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        (**self).set_baud_rate(baud_rate)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        (**self).wait_readable(timeout)
    }
}

/// Internal enum for stream types
enum StreamInner {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl StreamInner {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            StreamInner::Unix(s) => s.set_nonblocking(nonblocking),
            StreamInner::Tcp(s) => s.set_nonblocking(nonblocking),
        }
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        match self {
            StreamInner::Unix(s) => s.set_read_timeout(dur),
            StreamInner::Tcp(s) => s.set_read_timeout(dur),
        }
    }

    fn as_raw_fd(&self) -> RawFd {
        match self {
            StreamInner::Unix(s) => s.as_raw_fd(),
            StreamInner::Tcp(s) => s.as_raw_fd(),
        }
    }
}

impl Read for StreamInner {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamInner::Unix(s) => s.read(buf),
            StreamInner::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for StreamInner {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StreamInner::Unix(s) => s.write(buf),
            StreamInner::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StreamInner::Unix(s) => s.flush(),
            StreamInner::Tcp(s) => s.flush(),
        }
    }
}

/// Transport over a connected TCP or Unix stream socket.
pub struct StreamTransport {
    inner: StreamInner,
    name: String,
}

impl StreamTransport {
    pub fn from_tcp(stream: TcpStream) -> Self {
        // Disable Nagle's algorithm for lower latency
        let _ = stream.set_nodelay(true);
        let name = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "tcp".to_string());
        StreamTransport {
            inner: StreamInner::Tcp(stream),
            name,
        }
    }

    pub fn from_unix(stream: UnixStream) -> Self {
        let name = stream
            .peer_addr()
            .ok()
            .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "unix".to_string());
        StreamTransport {
            inner: StreamInner::Unix(stream),
            name,
        }
    }

    /// Connect to a TCP address
    pub fn connect(addr: &str) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).map_err(|e| Error::connection(addr, e))?;
        Ok(Self::from_tcp(stream))
    }

    /// Connected pair of Unix stream transports
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from_unix(a), Self::from_unix(b)))
    }

    /// Replace the name used in logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Read for StreamTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for StreamTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Transport for StreamTransport {
    fn raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.inner.set_nonblocking(true)?;
        let mut scratch = [0u8; 256];
        let result = loop {
            match self.inner.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        self.inner.set_nonblocking(false)?;
        result
    }
}
