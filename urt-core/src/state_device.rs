//! ARD devices as event sources bound to the shared state.
//!
//! Device keys are stored in the state prefixed with the device's
//! `(app_type, uid)`, so identical devices never collide.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use log::{debug, info, trace, warn};
use urt_protocol::{msg_type, substate, DeviceIdentity, ProtocolError, Substate};

use crate::ard_port::{ArdConfig, ArdPort};
use crate::event_loop::EventSource;
use crate::signal::Subscription;
use crate::state::State;
use crate::transport::Transport;
use crate::Error;

/// `[app_type, uid] ++ key`
pub fn state_key(identity: DeviceIdentity, key: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(key.len() + 2);
    full.extend_from_slice(&identity.key_prefix());
    full.extend_from_slice(key);
    full
}

/// Send `key`/`value` to the device as a substate (type 0x01).
///
/// With `remove_ids`, a key carrying this device's prefix is sent without it.
fn push_substate<T: Transport>(
    port: &mut ArdPort<T>,
    key: &[u8],
    value: &[u8],
    remove_ids: bool,
) -> Result<(), ProtocolError> {
    let prefix = port.identity().key_prefix();
    let key = if remove_ids && key.starts_with(&prefix) {
        &key[prefix.len()..]
    } else {
        key
    };
    let payload = substate::encode(key, value)?;
    port.send_datagram(msg_type::SUBSTATE, &payload)
}

pub struct StateDevice<T: Transport + 'static> {
    link: Rc<RefCell<ArdPort<T>>>,
    state: State,
    identity: DeviceIdentity,
    fd: RawFd,
    subscriptions: Vec<Subscription>,
}

impl<T: Transport + 'static> StateDevice<T> {
    pub fn new(port: ArdPort<T>, state: State) -> Self {
        let identity = port.identity();
        let fd = port.transport().raw_fd();
        StateDevice {
            link: Rc::new(RefCell::new(port)),
            state,
            identity,
            fd,
            subscriptions: Vec::new(),
        }
    }

    /// Handshake on `transport` and bind the device to `state`
    pub fn connect(transport: T, config: &ArdConfig, state: State) -> Result<Self, Error> {
        Ok(Self::new(ArdPort::handshake(transport, config)?, state))
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn device_name(&self) -> String {
        self.link.borrow().name().to_string()
    }

    /// The state key this device uses for `key`
    pub fn state_key(&self, key: &[u8]) -> Vec<u8> {
        state_key(self.identity, key)
    }

    /// Ask the device to push all of its substates.
    ///
    /// Send errors are ignored; a dead link shows up as activity on the
    /// descriptor and is handled there.
    pub fn poll(&self) {
        poll_link(&self.link);
    }

    /// A callback polling this device, for the loop's interval signal.
    ///
    /// The callback does not keep the device alive.
    pub fn poller(&self) -> impl Fn() + 'static {
        let link: Weak<RefCell<ArdPort<T>>> = Rc::downgrade(&self.link);
        move || {
            if let Some(link) = link.upgrade() {
                poll_link(&link);
            }
        }
    }

    pub fn send_substate(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        remove_ids: bool,
    ) -> Result<(), ProtocolError> {
        push_substate(
            &mut self.link.borrow_mut(),
            key.as_ref(),
            value.as_ref(),
            remove_ids,
        )
    }

    /// Send the current state value of `key`
    pub fn send_state_substate(
        &self,
        key: impl AsRef<[u8]>,
        remove_ids: bool,
    ) -> Result<(), ProtocolError> {
        let key = key.as_ref();
        let value = self.state.get(key);
        self.send_substate(key, value, remove_ids)
    }

    /// Keep `subscription` alive for as long as this device exists
    pub fn hold(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Push every change of `key` to the device
    pub fn register_push(&mut self, key: &[u8]) {
        let link = Rc::downgrade(&self.link);
        let subscription = self.state.register_slot(key, move |key, value| {
            let Some(link) = link.upgrade() else {
                return;
            };
            let Ok(mut port) = link.try_borrow_mut() else {
                warn!("device link busy, push of {:02x?} skipped", key);
                return;
            };
            if let Err(e) = push_substate(&mut port, key, value, true) {
                debug!("{}: push failed: {}", port.name(), e);
            }
        });
        self.subscriptions.push(subscription);
    }

    fn process(&mut self) -> Result<bool, ProtocolError> {
        let datagram = self.link.borrow_mut().get_datagram()?;
        match datagram.kind {
            msg_type::SET => {
                let sub = Substate::parse(&datagram.payload)?;
                self.state.set(self.state_key(sub.key), sub.value);
            }
            msg_type::GET => {
                let sub = Substate::parse(&datagram.payload)?;
                let mut payload = datagram.payload.clone();
                payload.extend(self.state.get(self.state_key(sub.key)));
                self.link
                    .borrow_mut()
                    .send_datagram(msg_type::SUBSTATE, &payload)?;
            }
            msg_type::REGISTER => {
                let sub = Substate::parse(&datagram.payload)?;
                let key = self.state_key(sub.key);
                trace!("{}: push registered for {:02x?}", self.identity, key);
                self.register_push(&key);
            }
            other => {
                warn!("{}: unexpected datagram type 0x{:02x}", self.identity, other);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn poll_link<T: Transport>(link: &RefCell<ArdPort<T>>) {
    let Ok(mut port) = link.try_borrow_mut() else {
        return;
    };
    if let Err(e) = port.send_datagram(msg_type::POLL, &[]) {
        debug!("{}: poll failed: {}", port.name(), e);
    }
}

impl<T: Transport + 'static> EventSource for StateDevice<T> {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn on_activity(&mut self) -> bool {
        match self.process() {
            Ok(keep) => keep,
            Err(e) => {
                info!("{} ({}): {}", self.device_name(), self.identity, e);
                false
            }
        }
    }

    fn name(&self) -> String {
        format!("StateDevice {} ({})", self.device_name(), self.identity)
    }
}
