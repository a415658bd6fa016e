//! # URT Core
//!
//! Host runtime for URT: a single-threaded reactor driving serial devices
//! and state sockets around one shared key/value [`State`].
//!
//! ## Sources
//!
//! | Source | Descriptor | Activity |
//! |--------|------------|----------|
//! | [`StateDevice`] | serial line or stream | one ARD datagram |
//! | [`StateSocket`] | stream socket | one StateSocket frame |
//! | [`WsStateSocket`] | TCP socket | every pending WebSocket message |
//! | [`SocketServer`] | listening socket | one accepted connection |
//! | [`HotDeviceManager`] | inotify | newly created device files |
//! | [`Timer`], [`Watchdog`] | timerfd | one expiry |
//!
//! Sources are registered with an [`EventLoop`]; one returning false from
//! `on_activity` is removed after the current pass.

pub mod ard_port;
pub mod device_manager;
mod error;
pub mod event_loop;
pub mod hot_device_manager;
pub mod logger;
pub mod serial;
pub mod signal;
pub mod socket_server;
pub mod state;
pub mod state_device;
pub mod state_socket;
mod sys;
pub mod timer;
pub mod transport;
pub mod watchdog;
pub mod websocket;

pub use ard_port::{ArdConfig, ArdPort};
pub use device_manager::DeviceManager;
pub use error::Error;
pub use event_loop::{EventLoop, EventSource, LoopHandle, SourceId, SourceRef};
pub use hot_device_manager::HotDeviceManager;
pub use serial::{SerialConfig, SerialTransport};
pub use signal::Subscription;
pub use socket_server::SocketServer;
pub use state::State;
pub use state_device::StateDevice;
pub use state_socket::{Role, StateSocket};
pub use sys::wait_readable;
pub use timer::{Timer, TimerHandle};
pub use transport::{StreamTransport, Transport};
pub use watchdog::Watchdog;
pub use websocket::WsStateSocket;
