//! Hot-plug discovery: devices created while the loop runs.
//!
//! Only creation is watched. A device that goes away is noticed by its own
//! adapter, which removes itself from the loop.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::device_manager::DeviceManager;
use crate::event_loop::{EventSource, LoopHandle};
use crate::Error;

/// Pause before the second attempt on a freshly created device file
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Size of `struct inotify_event` without its name
const EVENT_HEADER_LEN: usize = 16;

/// One parsed inotify event: watch descriptor and created name
fn parse_events(buf: &[u8]) -> Vec<(i32, String)> {
    let mut events = Vec::new();
    let mut offset = 0;
    while offset + EVENT_HEADER_LEN <= buf.len() {
        let field = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[offset + at..offset + at + 4]);
            bytes
        };
        let wd = i32::from_ne_bytes(field(0));
        let len = u32::from_ne_bytes(field(12)) as usize;
        let start = offset + EVENT_HEADER_LEN;
        let end = (start + len).min(buf.len());
        // the name is NUL padded
        let name = &buf[start..end];
        let name = name.split(|&b| b == 0).next().unwrap_or(name);
        if !name.is_empty() {
            events.push((wd, String::from_utf8_lossy(name).into_owned()));
        }
        offset = start + len;
    }
    events
}

pub struct HotDeviceManager {
    manager: DeviceManager,
    inotify: OwnedFd,
    watches: HashMap<i32, usize>,
    handle: LoopHandle,
    retry_delay: Duration,
}

impl HotDeviceManager {
    /// Wrap `manager`; found devices are added through `handle`.
    ///
    /// Directories already in `manager` are not watched; add them through
    /// [`HotDeviceManager::add_directory`].
    pub fn new(manager: DeviceManager, handle: LoopHandle) -> Result<Self, Error> {
        // SAFETY: plain syscall, no pointers involved
        let fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC | libc::IN_NONBLOCK) };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(HotDeviceManager {
            manager,
            // SAFETY: fd was just created and is owned by nobody else
            inotify: unsafe { OwnedFd::from_raw_fd(fd) },
            watches: HashMap::new(),
            handle,
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn set_retry_delay(&mut self, delay: Duration) {
        self.retry_delay = delay;
    }

    /// Add `dir` to the scanned directories and watch it for new names matching `rule`
    pub fn add_directory(&mut self, dir: impl AsRef<Path>, rule: &str) -> Result<(), Error> {
        let dir = dir.as_ref();
        self.manager.add_directory(dir, rule)?;
        let path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        // SAFETY: path is a valid NUL-terminated string for the whole call
        let wd = unsafe { libc::inotify_add_watch(self.inotify.as_raw_fd(), path.as_ptr(), libc::IN_CREATE) };
        if wd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        self.watches.insert(wd, self.manager.directory_count() - 1);
        Ok(())
    }

    /// One-shot scan of every directory
    pub fn execute(&mut self) -> usize {
        let handle = self.handle.clone();
        self.manager.execute(&handle)
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut DeviceManager {
        &mut self.manager
    }

    fn created(&mut self, wd: i32, name: &str) {
        let Some(dir) = self.watches.get(&wd).and_then(|&i| self.manager.directory(i)) else {
            return;
        };
        if !dir.matches(name) {
            return;
        }
        let path = dir.path.join(name);
        info!("Detected newly added {}", path.display());
        let result = match self.manager.connect(&path) {
            Ok(device) => Ok(device),
            Err(e) => {
                // the device node may not be usable yet
                info!("{}: {}, retrying", path.display(), e);
                thread::sleep(self.retry_delay);
                self.manager.connect(&path)
            }
        };
        let handle = self.handle.clone();
        self.manager.attach(&path, result, &handle);
    }
}

impl EventSource for HotDeviceManager {
    fn raw_fd(&self) -> RawFd {
        self.inotify.as_raw_fd()
    }

    fn on_activity(&mut self) -> bool {
        let mut buf = [0u8; 4096];
        // SAFETY: buf is valid and writable for its whole length
        let rc = unsafe {
            libc::read(
                self.inotify.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
                return true;
            }
            warn!("inotify read failed: {}", err);
            return false;
        }
        for (wd, name) in parse_events(&buf[..rc as usize]) {
            self.created(wd, &name);
        }
        true
    }
}
