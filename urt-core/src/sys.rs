//! Readiness syscalls.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[cfg(target_os = "linux")]
const POLLRDHUP: libc::c_short = libc::POLLRDHUP;
#[cfg(not(target_os = "linux"))]
const POLLRDHUP: libc::c_short = 0;

/// Events requested for every registered descriptor
pub(crate) const WATCH_EVENTS: libc::c_short = libc::POLLIN | POLLRDHUP;

/// Returned events that dispatch a source
pub(crate) const ACTIVITY_EVENTS: libc::c_short =
    libc::POLLIN | libc::POLLERR | libc::POLLHUP | POLLRDHUP | libc::POLLNVAL;

pub(crate) fn pollfd(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: WATCH_EVENTS,
        revents: 0,
    }
}

/// Clamp a duration to a poll(2) timeout in milliseconds.
pub(crate) fn timeout_ms(timeout: Duration) -> libc::c_int {
    timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
}

/// Wait for readiness on `fds`. An interrupted wait reports nothing ready.
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
    // SAFETY: the pointer and length describe a valid, exclusively borrowed slice.
    let rc = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_ms(timeout),
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(rc as usize)
}

/// True once `fd` has input (or a hangup) pending, false on timeout.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut fds = [pollfd(fd)];
    Ok(poll(&mut fds, timeout)? > 0 && fds[0].revents & ACTIVITY_EVENTS != 0)
}
