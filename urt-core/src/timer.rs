//! Monotonic timers as event sources, backed by `timerfd`.

use std::cell::Cell;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{trace, warn};

use crate::event_loop::EventSource;
use crate::Error;

/// Closure run on expiry. Returning false removes the timer from the loop.
pub type TimerFn = dyn FnMut(&TimerHandle) -> bool;

struct TimerFd {
    fd: OwnedFd,
    interval: Cell<Duration>,
    repeat: Cell<bool>,
}

fn timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

impl TimerFd {
    fn create() -> Result<Self, Error> {
        // SAFETY: plain syscall, no pointers involved
        let fd = unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
        };
        if fd < 0 {
            return Err(Error::Timer(io::Error::last_os_error()));
        }
        Ok(TimerFd {
            // SAFETY: fd was just created and is owned by nobody else
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            interval: Cell::new(Duration::ZERO),
            repeat: Cell::new(false),
        })
    }

    /// Arm with `value` until the first expiry and `interval` after it.
    /// A zero `value` disarms.
    fn settime(&self, value: Duration, interval: Duration) -> Result<(), Error> {
        let spec = libc::itimerspec {
            it_interval: timespec(interval),
            it_value: timespec(value),
        };
        // SAFETY: spec outlives the call; the old value is not requested
        let rc = unsafe {
            libc::timerfd_settime(self.fd.as_raw_fd(), 0, &spec, std::ptr::null_mut())
        };
        if rc < 0 {
            return Err(Error::Timer(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn arm(&self) -> Result<(), Error> {
        // a zero it_value would disarm the timer
        let value = self.interval.get().max(Duration::from_nanos(1));
        let interval = if self.repeat.get() { value } else { Duration::ZERO };
        self.settime(value, interval)
    }

    /// Consume pending expirations. Returns how many there were.
    fn acknowledge(&self) -> io::Result<u64> {
        let mut count = [0u8; 8];
        // SAFETY: count is a valid, writable 8-byte buffer
        let rc = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                count.as_mut_ptr() as *mut libc::c_void,
                count.len(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(u64::from_ne_bytes(count))
    }
}

/// Controls a [`Timer`] from anywhere on the loop thread.
///
/// Operations on a handle whose timer has been dropped succeed and do nothing.
#[derive(Clone)]
pub struct TimerHandle {
    timer: Weak<TimerFd>,
}

impl TimerHandle {
    /// Arm the timer to expire after `interval`, and every `interval` after
    /// that if `repeat` is set.
    pub fn start(&self, interval: Duration, repeat: bool) -> Result<(), Error> {
        let Some(timer) = self.timer.upgrade() else {
            return Ok(());
        };
        timer.interval.set(interval);
        timer.repeat.set(repeat);
        timer.arm()
    }

    /// Disarm the timer
    pub fn stop(&self) -> Result<(), Error> {
        match self.timer.upgrade() {
            Some(timer) => timer.settime(Duration::ZERO, Duration::ZERO),
            None => Ok(()),
        }
    }

    /// Restart the countdown with the last started settings
    pub fn reset(&self) -> Result<(), Error> {
        match self.timer.upgrade() {
            Some(timer) => timer.arm(),
            None => Ok(()),
        }
    }
}

pub struct Timer {
    timer: Rc<TimerFd>,
    handler: Box<TimerFn>,
}

impl Timer {
    /// Create a disarmed timer
    pub fn new(handler: impl FnMut(&TimerHandle) -> bool + 'static) -> Result<Self, Error> {
        Ok(Timer {
            timer: Rc::new(TimerFd::create()?),
            handler: Box::new(handler),
        })
    }

    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            timer: Rc::downgrade(&self.timer),
        }
    }
}

impl EventSource for Timer {
    fn raw_fd(&self) -> RawFd {
        self.timer.fd.as_raw_fd()
    }

    fn on_activity(&mut self) -> bool {
        match self.timer.acknowledge() {
            Ok(0) => true,
            Ok(expirations) => {
                trace!("timer expired ({} pending)", expirations);
                let handle = self.handle();
                (self.handler)(&handle)
            }
            Err(e) => {
                warn!("timer read failed: {}", e);
                false
            }
        }
    }
}
