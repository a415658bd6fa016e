//! The shared key/value state with per-key change notification.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Display;
use std::rc::Rc;
use std::str::FromStr;

use thiserror::Error;

use crate::signal::{SlotList, Subscription};

/// Callback invoked with `(key, value)` when a key is set
pub type SlotFn = dyn Fn(&[u8], &[u8]);

/// A stored value could not be parsed as the requested type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot convert '{value}' at key '{key}' to {target}")]
pub struct ConversionError {
    pub key: String,
    pub value: String,
    pub target: &'static str,
}

#[derive(Default)]
struct Entry {
    value: Vec<u8>,
    signal_on_touch: bool,
    slots: SlotList<SlotFn>,
}

/// Process-wide state store.
///
/// Cloning a `State` yields another handle to the same table. Keys and
/// values are byte strings; entries are created on first use.
#[derive(Clone, Default)]
pub struct State {
    inner: Rc<RefCell<HashMap<Vec<u8>, Entry>>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, empty if it was never set.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Vec<u8> {
        let key = key.as_ref();
        self.inner
            .borrow_mut()
            .entry(key.to_vec())
            .or_default()
            .value
            .clone()
    }

    /// [`State::get`] decoded as UTF-8, lossily
    pub fn get_string(&self, key: impl AsRef<[u8]>) -> String {
        String::from_utf8_lossy(&self.get(key)).into_owned()
    }

    /// Set `key` to `value` and notify its slots.
    ///
    /// Slots run synchronously, in registration order, only when the value
    /// changed or the key signals on touch. A slot may call `set` again,
    /// including on the key that triggered it; nothing stops a pair of slots
    /// from re-triggering each other forever.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        let (key, value) = (key.as_ref(), value.as_ref());
        let slots = {
            let mut table = self.inner.borrow_mut();
            let entry = table.entry(key.to_vec()).or_default();
            if entry.value == value && !entry.signal_on_touch {
                return;
            }
            entry.value.clear();
            entry.value.extend_from_slice(value);
            entry.slots.snapshot()
        };

        for (id, slot) in slots {
            // skip slots unsubscribed by an earlier slot in this firing
            let live = self
                .inner
                .borrow()
                .get(key)
                .is_some_and(|entry| entry.slots.contains(id));
            if live {
                slot(key, value);
            }
        }
    }

    /// Make same-value sets of `key` notify its slots too
    pub fn set_signal_on_touch(&self, key: impl AsRef<[u8]>, on_touch: bool) {
        self.inner
            .borrow_mut()
            .entry(key.as_ref().to_vec())
            .or_default()
            .signal_on_touch = on_touch;
    }

    pub fn signal_on_touch(&self, key: impl AsRef<[u8]>) -> bool {
        self.inner
            .borrow()
            .get(key.as_ref())
            .is_some_and(|entry| entry.signal_on_touch)
    }

    /// Subscribe `slot` to changes of `key`.
    ///
    /// Registering the same callback twice makes it run twice per change.
    pub fn register_slot(
        &self,
        key: impl AsRef<[u8]>,
        slot: impl Fn(&[u8], &[u8]) + 'static,
    ) -> Subscription {
        let key = key.as_ref().to_vec();
        let id = self
            .inner
            .borrow_mut()
            .entry(key.clone())
            .or_default()
            .slots
            .insert(Rc::new(slot));
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                // dropped once the table is released
                let _slot = inner
                    .borrow_mut()
                    .get_mut(&key)
                    .and_then(|entry| entry.slots.remove(id));
            }
        })
    }

    /// Number of slots subscribed to `key`
    pub fn slot_count(&self, key: impl AsRef<[u8]>) -> usize {
        self.inner
            .borrow()
            .get(key.as_ref())
            .map_or(0, |entry| entry.slots.len())
    }

    /// Parse the value of `key`. An unset key is an error.
    pub fn get_as<T: FromStr>(&self, key: impl AsRef<[u8]>) -> Result<T, ConversionError> {
        let key = key.as_ref();
        let value = self.get(key);
        std::str::from_utf8(&value)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| ConversionError {
                key: String::from_utf8_lossy(key).into_owned(),
                value: String::from_utf8_lossy(&value).into_owned(),
                target: std::any::type_name::<T>(),
            })
    }

    /// Parse the value of `key`, or return `default` if it is unset.
    pub fn get_as_or<T: FromStr>(
        &self,
        key: impl AsRef<[u8]>,
        default: T,
    ) -> Result<T, ConversionError> {
        let key = key.as_ref();
        if self.get(key).is_empty() {
            return Ok(default);
        }
        self.get_as(key)
    }

    /// Store the textual form of `value`
    pub fn set_as<T: Display>(&self, key: impl AsRef<[u8]>, value: T) {
        self.set(key, value.to_string());
    }

    /// All keys currently in the table
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.inner.borrow().keys().cloned().collect()
    }
}
