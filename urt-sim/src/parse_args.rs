use std::path::PathBuf;

use urt_core::logger::Verbosity;

const HELP: &str = "\
urt-sim - simulated ARD device

Listens on TCP and behaves like a sensor board: answers the handshake,
reports a reading on every poll and logs what the host sends back.
Point urtd at it with --ard-tcp.

USAGE:
  urt-sim [OPTIONS]

OPTIONS:
  -h, --help              Prints help information
  --listen <host:port>    Address to listen on (default: 127.0.0.1:5555)
  --app-type <n>          Application type, decimal or 0x hex (default: 0x41)
  --uid <n>               Unit id, decimal or 0x hex (default: 0)
  --key <name>            Key the reading is reported under (default: son)
  --direct                Read datagrams directly instead of byte by byte
  -v, --verbose           Show debug messages
  -vv, --trace            Show every datagram
  -vvv, --trace-bytes     Show individual link bytes (very verbose)
  --log <file>            Write log output to file instead of stderr
";

#[derive(Debug)]
pub struct AppArgs {
    pub listen: String,
    pub app_type: u8,
    pub uid: u8,
    pub key: String,
    pub direct: bool,
    pub verbosity: Verbosity,
    pub log_file: Option<PathBuf>,
}

fn parse_u8(s: &str) -> Result<u8, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

pub fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

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
        listen: pargs
            .opt_value_from_str("--listen")?
            .unwrap_or_else(|| "127.0.0.1:5555".to_string()),
        app_type: pargs.opt_value_from_fn("--app-type", parse_u8)?.unwrap_or(0x41),
        uid: pargs.opt_value_from_fn("--uid", parse_u8)?.unwrap_or(0),
        key: pargs
            .opt_value_from_str("--key")?
            .unwrap_or_else(|| "son".to_string()),
        direct: pargs.contains("--direct"),
        verbosity,
        log_file: pargs.opt_value_from_str("--log")?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(args)
}
