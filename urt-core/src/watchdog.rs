//! Trips when none of its watched keys is touched for a whole timeout.

use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, warn};

use crate::event_loop::EventSource;
use crate::signal::Subscription;
use crate::state::State;
use crate::timer::{Timer, TimerHandle};
use crate::Error;

/// A one-shot countdown restarted by every touch of an associated key.
///
/// On expiry the countdown stops and `on_trip` runs once; it only starts
/// again after the next touch or [`Watchdog::reset`]. Touches made while
/// `on_trip` runs are ignored, so the trip handler can write to watched keys.
pub struct Watchdog {
    timer: Timer,
    handle: TimerHandle,
    state: State,
    tripping: Rc<Cell<bool>>,
    subscriptions: Vec<Subscription>,
}

impl Watchdog {
    /// Create an armed watchdog
    pub fn new(timeout: Duration, state: State, mut on_trip: impl FnMut() + 'static) -> Result<Self, Error> {
        let tripping = Rc::new(Cell::new(false));
        let flag = tripping.clone();
        let timer = Timer::new(move |handle| {
            if let Err(e) = handle.stop() {
                warn!("watchdog: {}", e);
            }
            warn!("watchdog tripped after {:?} without a check-in", timeout);
            flag.set(true);
            on_trip();
            flag.set(false);
            true
        })?;
        let handle = timer.handle();
        handle.start(timeout, false)?;
        Ok(Watchdog {
            timer,
            handle,
            state,
            tripping,
            subscriptions: Vec::new(),
        })
    }

    /// Reset the countdown whenever `key` is set, even to its current value.
    pub fn associate_key(&mut self, key: impl AsRef<[u8]>) {
        let key = key.as_ref();
        self.state.set_signal_on_touch(key, true);
        let handle = self.handle.clone();
        let tripping = self.tripping.clone();
        let subscription = self.state.register_slot(key, move |key, _| {
            if tripping.get() {
                return;
            }
            debug!("watchdog reset by {}", String::from_utf8_lossy(key));
            if let Err(e) = handle.reset() {
                warn!("watchdog: {}", e);
            }
        });
        self.subscriptions.push(subscription);
    }

    /// [`Watchdog::associate_key`], chainable
    pub fn with_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.associate_key(key);
        self
    }

    /// Check in manually
    pub fn reset(&self) -> Result<(), Error> {
        self.handle.reset()
    }
}

impl EventSource for Watchdog {
    fn raw_fd(&self) -> RawFd {
        self.timer.raw_fd()
    }

    fn on_activity(&mut self) -> bool {
        self.timer.on_activity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys;

    fn expired(watchdog: &Watchdog, within: Duration) -> bool {
        sys::wait_readable(watchdog.raw_fd(), within).unwrap()
    }

    #[test]
    fn test_trips_once_without_check_in() {
        let trips = Rc::new(Cell::new(0));
        let t = trips.clone();
        let mut watchdog = Watchdog::new(Duration::from_millis(20), State::new(), move || {
            t.set(t.get() + 1)
        })
        .unwrap();
        assert!(expired(&watchdog, Duration::from_millis(500)));
        assert!(watchdog.on_activity());
        assert_eq!(trips.get(), 1);
        assert!(!expired(&watchdog, Duration::from_millis(60)));
    }

    #[test]
    fn test_touch_resets_and_rearms() {
        let state = State::new();
        let watchdog = Watchdog::new(Duration::from_millis(60), state.clone(), || {})
            .unwrap()
            .with_key("heartbeat");
        assert!(state.signal_on_touch("heartbeat"));
        for _ in 0..4 {
            assert!(!expired(&watchdog, Duration::from_millis(25)));
            state.set("heartbeat", "1");
        }
        assert!(expired(&watchdog, Duration::from_millis(500)));
    }

    #[test]
    fn test_touches_during_trip_are_ignored() {
        let state = State::new();
        let s = state.clone();
        let mut watchdog = Watchdog::new(Duration::from_millis(10), state.clone(), move || {
            s.set("motor", "0")
        })
        .unwrap();
        watchdog.associate_key("motor");
        assert!(expired(&watchdog, Duration::from_millis(500)));
        assert!(watchdog.on_activity());
        assert_eq!(state.get("motor"), b"0");
        assert!(!expired(&watchdog, Duration::from_millis(40)));

        watchdog.reset().unwrap();
        assert!(expired(&watchdog, Duration::from_millis(500)));
    }

    #[test]
    fn test_drop_unsubscribes_keys() {
        let state = State::new();
        let watchdog = Watchdog::new(Duration::from_secs(5), state.clone(), || {})
            .unwrap()
            .with_key("a");
        assert_eq!(state.slot_count("a"), 1);
        drop(watchdog);
        assert_eq!(state.slot_count("a"), 0);
        state.set("a", "still fine");
    }
}
