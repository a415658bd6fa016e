mod parse_args;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use log::{error, info, warn};
use parse_args::{parse_args, AppArgs};
use urt_core::device_manager::serial_opener;
use urt_core::logger::Logger;
use urt_core::{
    ArdConfig, DeviceManager, Error, EventLoop, HotDeviceManager, SerialConfig, SocketServer,
    State, StateDevice, StateSocket, StreamTransport, Subscription, Watchdog,
};

/// State key counting watchdog trips
const WATCHDOG_TRIPS_KEY: &str = "urtd.watchdog.trips";

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            std::process::exit(1);
        }
    };

    let logger = match &args.log_file {
        Some(path) => match Logger::file(path, args.verbosity) {
            Ok(l) => {
                eprintln!("Logging to: {}", path.display());
                l
            }
            Err(e) => {
                eprintln!("Failed to open log file '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Logger::stderr(args.verbosity),
    };
    if let Err(e) = logger.init() {
        eprintln!("Failed to install logger: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        error!("{}", e);
        eprintln!("urtd: {}", e);
        std::process::exit(1);
    }
}

fn run(args: AppArgs) -> Result<(), Error> {
    let event_loop = EventLoop::new(Duration::from_millis(args.interval_ms));
    let handle = event_loop.handle();
    let state = State::new();

    let _echoes: Vec<Subscription> = args
        .echo
        .iter()
        .map(|key| {
            state.register_slot(key, |key, value| {
                info!(
                    "{} = {}",
                    String::from_utf8_lossy(key),
                    String::from_utf8_lossy(value)
                )
            })
        })
        .collect();

    let server =
        SocketServer::state_sockets(&format!("0.0.0.0:{}", args.port), handle.clone(), state.clone())?;
    event_loop.add_source(server);
    if let Some(port) = args.ws_port {
        let server =
            SocketServer::ws_state_sockets(&format!("0.0.0.0:{}", port), handle.clone(), state.clone())?;
        event_loop.add_source(server);
    }

    for addr in &args.connect {
        match StateSocket::connect(addr, state.clone()) {
            Ok(socket) => {
                event_loop.add_source(socket);
            }
            Err(e) => warn!("{}", e),
        }
    }

    let mut ard_config = ArdConfig::default();
    if !args.bauds.is_empty() {
        ard_config.baud_rates = args.bauds.clone();
    }

    for addr in &args.ard_tcp {
        let device = StreamTransport::connect(addr)
            .and_then(|transport| StateDevice::connect(transport, &ard_config, state.clone()));
        match device {
            Ok(mut device) => {
                if let Some(subscription) = handle.register_interval_slot(device.poller()) {
                    device.hold(subscription);
                }
                event_loop.add_source(device);
            }
            Err(e) => warn!("{}: {}", addr, e),
        }
    }

    let serial_config = SerialConfig {
        baud_rate: ard_config.baud_rates.first().copied().unwrap_or(2400),
        ..SerialConfig::default()
    };
    let mut manager = DeviceManager::with_opener(state.clone(), serial_opener(serial_config));
    manager.set_ard_config(ard_config);
    manager.set_on_found(|device| {
        info!("{} ({}) ready", device.device_name(), device.identity());
        true
    });

    if args.hot {
        let mut hot = HotDeviceManager::new(manager, handle.clone())?;
        hot.add_directory(&args.dev_dir, &args.dev_rule)?;
        hot.execute();
        event_loop.add_source(hot);
    } else {
        manager.add_directory(&args.dev_dir, &args.dev_rule)?;
        let added = manager.execute(&handle);
        info!(
            "{} device(s) added, {} failed handshake, {} could not be opened",
            added,
            manager.failed().len(),
            manager.io_failures().len()
        );
    }

    if !args.watch.is_empty() {
        let trips = Rc::new(Cell::new(0u64));
        let trip_state = state.clone();
        let watched = args.watch.join(", ");
        let timeout = Duration::from_millis(args.watchdog_ms);
        let mut watchdog = Watchdog::new(timeout, state.clone(), move || {
            trips.set(trips.get() + 1);
            error!("no check-in on {} for {:?}", watched, timeout);
            trip_state.set_as(WATCHDOG_TRIPS_KEY, trips.get());
        })?;
        for key in &args.watch {
            watchdog.associate_key(key);
        }
        event_loop.add_source(watchdog);
    }

    info!("urtd running with {} sources", event_loop.len());
    event_loop.run()
}
