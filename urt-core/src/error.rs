//! Host runtime errors.

use std::path::PathBuf;

use thiserror::Error;
use urt_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum Error {
    /// A device or peer could not be opened or connected
    #[error("Cannot connect to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: std::io::Error,
    },
    /// I/O failure on an established link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// No candidate baud rate produced a valid handshake response
    #[error("Handshake failed on {device}")]
    HandshakeFailed { device: String },
    /// An OS timer could not be created or armed
    #[error("Timer error: {0}")]
    Timer(#[source] std::io::Error),
    /// Waiting for readiness failed
    #[error("poll failed: {0}")]
    Poll(#[source] std::io::Error),
    #[error("Invalid device rule '{rule}': {source}")]
    InvalidRule {
        rule: String,
        #[source]
        source: regex::Error,
    },
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

impl Error {
    pub fn connection(target: impl Into<String>, source: std::io::Error) -> Self {
        Error::Connection {
            target: target.into(),
            source,
        }
    }
}
