//! Finds ARD devices by file name and puts them on the loop.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{info, warn};
use regex::Regex;

use crate::ard_port::ArdConfig;
use crate::event_loop::{LoopHandle, SourceRef};
use crate::serial::{SerialConfig, SerialTransport};
use crate::state::State;
use crate::state_device::StateDevice;
use crate::transport::Transport;
use crate::Error;

/// A device found by a manager
pub type Device = StateDevice<Box<dyn Transport>>;

/// Opens the device file at a path
pub type Opener = Box<dyn Fn(&Path) -> Result<Box<dyn Transport>, Error>>;

/// Inspects a freshly connected device. Returning false vetoes it.
pub type FoundHook = Box<dyn FnMut(&mut Device) -> bool>;

/// A searched directory and the rule file names must match
pub(crate) struct Directory {
    pub(crate) path: PathBuf,
    rule: Regex,
}

impl Directory {
    fn new(path: &Path, rule: &str) -> Result<Self, Error> {
        if !path.is_dir() {
            return Err(Error::NotADirectory(path.to_path_buf()));
        }
        // the rule must match the whole name
        let rule = Regex::new(&format!("^(?:{})$", rule)).map_err(|source| Error::InvalidRule {
            rule: rule.to_string(),
            source,
        })?;
        Ok(Directory {
            path: path.to_path_buf(),
            rule,
        })
    }

    pub(crate) fn matches(&self, name: &str) -> bool {
        self.rule.is_match(name)
    }
}

/// Default opener: the path as a serial line
pub fn serial_opener(config: SerialConfig) -> Opener {
    Box::new(move |path| {
        let transport = SerialTransport::open(&path.to_string_lossy(), &config)?;
        Ok(Box::new(transport) as Box<dyn Transport>)
    })
}

pub struct DeviceManager {
    directories: Vec<Directory>,
    state: State,
    ard_config: ArdConfig,
    opener: Opener,
    on_found: Option<FoundHook>,
    failed: Vec<PathBuf>,
    io_failures: Vec<PathBuf>,
}

impl DeviceManager {
    /// A manager opening devices as serial lines with default settings
    pub fn new(state: State) -> Self {
        Self::with_opener(state, serial_opener(SerialConfig::default()))
    }

    pub fn with_opener(state: State, opener: Opener) -> Self {
        DeviceManager {
            directories: Vec::new(),
            state,
            ard_config: ArdConfig::default(),
            opener,
            on_found: None,
            failed: Vec::new(),
            io_failures: Vec::new(),
        }
    }

    pub fn set_opener(&mut self, opener: Opener) {
        self.opener = opener;
    }

    pub fn set_ard_config(&mut self, config: ArdConfig) {
        self.ard_config = config;
    }

    pub fn ard_config(&self) -> &ArdConfig {
        &self.ard_config
    }

    /// Run `hook` on every device before it is added to the loop
    pub fn set_on_found(&mut self, hook: impl FnMut(&mut Device) -> bool + 'static) {
        self.on_found = Some(Box::new(hook));
    }

    /// Search `dir` for names fully matching the regular expression `rule`.
    ///
    /// Nothing is searched until [`DeviceManager::execute`].
    pub fn add_directory(&mut self, dir: impl AsRef<Path>, rule: &str) -> Result<(), Error> {
        self.directories.push(Directory::new(dir.as_ref(), rule)?);
        Ok(())
    }

    pub(crate) fn directory(&self, index: usize) -> Option<&Directory> {
        self.directories.get(index)
    }

    pub(crate) fn directory_count(&self) -> usize {
        self.directories.len()
    }

    /// Scan every directory once. Returns the number of devices added.
    pub fn execute(&mut self, handle: &LoopHandle) -> usize {
        let mut found = Vec::new();
        for dir in &self.directories {
            let entries = match fs::read_dir(&dir.path) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Cannot scan {}: {}", dir.path.display(), e);
                    continue;
                }
            };
            let mut names: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| dir.matches(name))
                .collect();
            names.sort();
            found.extend(names.into_iter().map(|name| dir.path.join(name)));
        }

        let mut added = 0;
        for path in found {
            info!("Found {}", path.display());
            let result = self.connect(&path);
            if self.attach(&path, result, handle) {
                added += 1;
            }
        }
        added
    }

    /// Open and handshake the device at `path`
    pub(crate) fn connect(&self, path: &Path) -> Result<Device, Error> {
        let transport = (self.opener)(path)?;
        StateDevice::connect(transport, &self.ard_config, self.state.clone())
    }

    /// Record a failed connection, or hand a device to the found hook and
    /// then to the loop. Returns true if the device was added.
    pub(crate) fn attach(
        &mut self,
        path: &Path,
        result: Result<Device, Error>,
        handle: &LoopHandle,
    ) -> bool {
        let mut device = match result {
            Ok(device) => device,
            Err(e) => {
                warn!("Error loading {}. {}", path.display(), e);
                match e {
                    Error::HandshakeFailed { .. } => self.failed.push(path.to_path_buf()),
                    _ => self.io_failures.push(path.to_path_buf()),
                }
                return false;
            }
        };
        if let Some(hook) = self.on_found.as_mut() {
            if !hook(&mut device) {
                warn!("Error loading {}. Vetoed.", path.display());
                return false;
            }
        }
        if let Some(subscription) = handle.register_interval_slot(device.poller()) {
            device.hold(subscription);
        }
        let source: SourceRef = Rc::new(RefCell::new(device));
        handle.add(source).is_some()
    }

    /// Paths whose device did not answer the handshake
    pub fn failed(&self) -> &[PathBuf] {
        &self.failed
    }

    /// Paths that could not be opened at all
    pub fn io_failures(&self) -> &[PathBuf] {
        &self.io_failures
    }

    pub fn reset_failed(&mut self) {
        self.failed.clear();
        self.io_failures.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::transport::StreamTransport;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use urt_protocol::DeviceIdentity;

    /// A fresh, empty directory under the system temp dir
    pub(crate) fn scratch_dir(tag: &str) -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "urt-{}-{}-{}",
            tag,
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Opener simulating devices by file name: `good*` answers the
    /// handshake, `mute*` never does, anything else fails to open.
    pub(crate) fn fake_opener() -> Opener {
        Box::new(|path| {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if !name.starts_with("good") && !name.starts_with("mute") {
                return Err(Error::connection(
                    name,
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            let answers = name.starts_with("good");
            let (host, mut dev) = StreamTransport::pair()?;
            thread::spawn(move || {
                let mut window = Vec::new();
                let mut buf = [0u8; 64];
                while let Ok(n) = dev.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    window.extend_from_slice(&buf[..n]);
                    if answers && window.ends_with(&DeviceIdentity::request()) {
                        let _ = dev.write_all(&DeviceIdentity::new(0x41, 7).response());
                    }
                }
            });
            Ok(Box::new(host.with_name(name)) as Box<dyn Transport>)
        })
    }

    pub(crate) fn quick_config() -> ArdConfig {
        ArdConfig {
            handshake_timeout: Duration::from_millis(50),
            ..ArdConfig::default()
        }
    }

    fn manager(state: &State) -> DeviceManager {
        let mut manager = DeviceManager::with_opener(state.clone(), fake_opener());
        manager.set_ard_config(quick_config());
        manager
    }

    #[test]
    fn test_add_directory_validates() {
        let mut manager = DeviceManager::new(State::new());
        let dir = scratch_dir("validate");
        assert!(matches!(
            manager.add_directory(dir.join("missing"), "tty.*"),
            Err(Error::NotADirectory(_))
        ));
        assert!(matches!(
            manager.add_directory(&dir, "tty("),
            Err(Error::InvalidRule { .. })
        ));
        assert!(manager.add_directory(&dir, "tty.*").is_ok());
        assert_eq!(manager.directory_count(), 1);
    }

    #[test]
    fn test_rule_matches_whole_name() {
        let dir = scratch_dir("rule");
        let directory = Directory::new(&dir, "ttyUSB[0-9]+").unwrap();
        assert!(directory.matches("ttyUSB0"));
        assert!(!directory.matches("xttyUSB0"));
        assert!(!directory.matches("ttyUSB0.lock"));
    }

    #[test]
    fn test_execute_sorts_out_devices() {
        let dir = scratch_dir("execute");
        for name in ["good0", "mute0", "gone0", "unrelated"] {
            fs::write(dir.join(name), b"").unwrap();
        }
        let event_loop = EventLoop::default();
        let state = State::new();
        let mut manager = manager(&state);
        manager.add_directory(&dir, "(good|mute|gone)[0-9]").unwrap();

        assert_eq!(manager.execute(&event_loop.handle()), 1);
        assert_eq!(event_loop.len(), 1);
        assert_eq!(manager.failed(), &[dir.join("mute0")]);
        assert_eq!(manager.io_failures(), &[dir.join("gone0")]);

        manager.reset_failed();
        assert!(manager.failed().is_empty());
        assert!(manager.io_failures().is_empty());
    }

    #[test]
    fn test_found_hook_can_veto() {
        let dir = scratch_dir("veto");
        fs::write(dir.join("good1"), b"").unwrap();
        let event_loop = EventLoop::default();
        let mut manager = manager(&State::new());
        manager.add_directory(&dir, "good[0-9]").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        manager.set_on_found(move |device| {
            s.borrow_mut().push(device.identity());
            false
        });

        assert_eq!(manager.execute(&event_loop.handle()), 0);
        assert!(event_loop.is_empty());
        assert!(manager.failed().is_empty());
        assert_eq!(*seen.borrow(), vec![DeviceIdentity::new(0x41, 7)]);
    }
}
