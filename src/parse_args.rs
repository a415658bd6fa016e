use std::path::PathBuf;

use urt_core::logger::Verbosity;

const HELP: &str = "\
urtd - URT host daemon

Shares one state store between ARD devices and StateSocket clients.

USAGE:
  urtd [OPTIONS]

OPTIONS:
  -h, --help              Prints help information
  --port <n>              StateSocket TCP port (default: 4444)
  --ws-port <n>           Also serve StateSocket frames over WebSocket
  --connect <host:port>   Open an outbound StateSocket (repeatable)
  --dev-dir <dir>         Directory searched for devices (default: /dev)
  --dev-rule <regex>      Device file names to use (default: ttyUSB[0-9]+|ttyACM[0-9]+)
  --hot                   Keep watching --dev-dir for new devices
  --ard-tcp <host:port>   ARD device reached over TCP (repeatable)
  --baud <n>              Handshake baud rate, tried in order (repeatable)
  --interval <ms>         Device poll interval (default: 500)
  --watch <key>           Key the watchdog expects to be touched (repeatable)
  --watchdog-ms <n>       Watchdog timeout (default: 10000)
  --echo <key>            Log every change of a key (repeatable)
  -v, --verbose           Show debug messages
  -vv, --trace            Show every datagram and frame
  -vvv, --trace-bytes     Show individual link bytes (very verbose)
  --log <file>            Write log output to file instead of stderr
";

#[derive(Debug)]
pub struct AppArgs {
    pub port: u16,
    pub ws_port: Option<u16>,
    pub connect: Vec<String>,
    pub dev_dir: PathBuf,
    pub dev_rule: String,
    pub hot: bool,
    pub ard_tcp: Vec<String>,
    pub bauds: Vec<u32>,
    pub interval_ms: u64,
    pub watch: Vec<String>,
    pub watchdog_ms: u64,
    pub echo: Vec<String>,
    pub verbosity: Verbosity,
    pub log_file: Option<PathBuf>,
}

pub fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    // Count -v flags for verbosity level
    let verbosity = if pargs.contains("--trace-bytes") || pargs.contains("-vvv") {
        Verbosity::TraceBytes
    } else if pargs.contains("--trace") || pargs.contains("-vv") {
        Verbosity::Trace
    } else if pargs.contains(["-v", "--verbose"]) {
        Verbosity::Verbose
    } else {
        Verbosity::Quiet
    };

    let args = AppArgs {
        port: pargs.opt_value_from_str("--port")?.unwrap_or(4444),
        ws_port: pargs.opt_value_from_str("--ws-port")?,
        connect: pargs.values_from_str("--connect")?,
        dev_dir: pargs
            .opt_value_from_str("--dev-dir")?
            .unwrap_or_else(|| PathBuf::from("/dev")),
        dev_rule: pargs
            .opt_value_from_str("--dev-rule")?
            .unwrap_or_else(|| "ttyUSB[0-9]+|ttyACM[0-9]+".to_string()),
        hot: pargs.contains("--hot"),
        ard_tcp: pargs.values_from_str("--ard-tcp")?,
        bauds: pargs.values_from_str("--baud")?,
        interval_ms: pargs.opt_value_from_str("--interval")?.unwrap_or(500),
        watch: pargs.values_from_str("--watch")?,
        watchdog_ms: pargs.opt_value_from_str("--watchdog-ms")?.unwrap_or(10_000),
        echo: pargs.values_from_str("--echo")?,
        verbosity,
        log_file: pargs.opt_value_from_str("--log")?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(args)
}
