//! Process logger for the URT binaries.
//!
//! Lines look like `2026-03-01 12:00:00.123 INFO  urt_core::event_loop: ...`
//! and go to stderr or a file, flushed one by one.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{LevelFilter, Log, Metadata, Record};
use urt_protocol::BYTES_TARGET;

/// How much the binaries report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Warnings, errors and lifecycle messages
    #[default]
    Quiet,
    /// Plus debug messages
    Verbose,
    /// Plus every datagram and frame
    Trace,
    /// Plus every raw byte
    TraceBytes,
}

impl Verbosity {
    /// Verbosity for a count of `-v` flags
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => Verbosity::Quiet,
            1 => Verbosity::Verbose,
            2 => Verbosity::Trace,
            _ => Verbosity::TraceBytes,
        }
    }

    pub fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::Info,
            Verbosity::Verbose => LevelFilter::Debug,
            Verbosity::Trace | Verbosity::TraceBytes => LevelFilter::Trace,
        }
    }
}

enum Output {
    Stderr,
    File(BufWriter<File>),
}

impl Output {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self {
            Output::Stderr => {
                let mut stderr = io::stderr().lock();
                writeln!(stderr, "{}", line)
            }
            Output::File(file) => {
                writeln!(file, "{}", line)?;
                file.flush()
            }
        }
    }
}

#[derive(Clone)]
pub struct Logger {
    output: Arc<Mutex<Output>>,
    verbosity: Verbosity,
}

impl Logger {
    pub fn stderr(verbosity: Verbosity) -> Self {
        Logger {
            output: Arc::new(Mutex::new(Output::Stderr)),
            verbosity,
        }
    }

    /// Write to a new file at `path`, replacing any old one
    pub fn file(path: &Path, verbosity: Verbosity) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Logger {
            output: Arc::new(Mutex::new(Output::File(BufWriter::new(file)))),
            verbosity,
        })
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Install as the global logger
    pub fn init(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(self.verbosity.level_filter());
        log::set_boxed_logger(Box::new(self))
    }

    fn format(record: &Record) -> String {
        format!(
            "{} {:<5} {}: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if metadata.target() == BYTES_TARGET {
            return self.verbosity >= Verbosity::TraceBytes;
        }
        metadata.level() <= self.verbosity.level_filter()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::format(record);
        if let Ok(mut output) = self.output.lock() {
            // nowhere left to report a failing log sink
            let _ = output.write_line(&line);
        }
    }

    fn flush(&self) {
        if let Ok(mut output) = self.output.lock() {
            if let Output::File(file) = &mut *output {
                let _ = file.flush();
            }
        }
    }
}
