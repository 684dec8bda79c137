#![warn(clippy::all)]

use clap::Parser;
use libtraffic_log::Config;
use libtraffic_log_live::Supervisor;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

mod privilege;

/// Loopback traffic logger: captures TCP payloads on the loopback interface
/// and logs whatever clients send to the logging server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// Log file (default: server.log)
    #[arg(short, long, value_name = "FILE")]
    log_file: Option<String>,

    /// Capture interface (default: lo)
    #[arg(short, long, value_name = "IFACE")]
    interface: Option<String>,

    /// Run the logging server only, without packet capture
    #[arg(long)]
    server_only: bool,

    /// Be verbose
    #[arg(short, long)]
    verbose: bool,

    /// TCP port of the logging server (1-65535)
    #[arg(value_name = "PORT_NUMBER")]
    port: String,
}

fn load_config(config: &mut Config, filename: &str) -> Result<(), io::Error> {
    debug!("Loading configuration {filename}");
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config.load_config(file)
}

fn parse_port(s: &str) -> Option<u16> {
    s.trim()
        .parse::<u32>()
        .ok()
        .and_then(|p| u16::try_from(p).ok())
        .filter(|&p| p != 0)
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::try_from_env("TRAFFIC_LOGGER_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(level.into()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_thread_names(true)
        .compact()
        .init();

    let port = match parse_port(&args.port) {
        Some(port) => port,
        None => {
            eprintln!("Invalid port number. Please use a port between 1 and 65535.");
            process::exit(1);
        }
    };

    let mut config = Config::default();
    if let Some(filename) = args.config.as_ref() {
        if let Err(e) = load_config(&mut config, filename) {
            error!("Could not load configuration {filename}: {e}");
            process::exit(1);
        }
    }
    // override config options from command-line arguments
    if let Some(log_file) = args.log_file {
        config.set("log_file", log_file);
    }
    if let Some(interface) = args.interface {
        config.set("live.interface", interface);
    }

    let with_capture = !args.server_only;
    if let Err(msg) = privilege::check(port, with_capture) {
        eprintln!("{msg}");
        process::exit(1);
    }

    let supervisor = match Supervisor::new(port, &config, with_capture) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    let shutdown = supervisor.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || shutdown.trigger()) {
        error!("Could not install interrupt handler: {e}");
        process::exit(1);
    }

    let banner = if with_capture {
        format!("Logging server is running on port {port} and capturing localhost traffic")
    } else {
        format!("Logging server is running on port {port}")
    };
    if let Err(e) = writeln!(io::stdout(), "{banner}") {
        debug!("could not print banner: {e}");
    }

    match supervisor.run() {
        Ok(summary) => {
            if let Some(stats) = summary.capture {
                debug!("capture: {stats:?}");
            }
            if summary.capture_failed {
                error!("packet capture failed, exiting with an error");
                process::exit(1);
            }
            info!("traffic-logger: done, exiting");
        }
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}
