use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imulink_core::config::LinkConfig;
use imulink_core::demo::DemoConnector;
use imulink_core::link::LinkSession;
use imulink_core::protocol::{list_ports, Sample};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Config file looked up in the working directory when `--config` is not given
const DEFAULT_CONFIG: &str = "config.ini";

#[derive(Parser, Debug)]
#[command(name = "imulink", version, about = "Stream samples from a 10-DOF IMU")]
struct Cli {
    /// INI config file (defaults to ./config.ini when present).
    #[arg(long, short, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the config file.
    #[arg(long, value_name = "PORT", global = true, env = "IMULINK_PORT")]
    port: Option<String>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print samples until interrupted.
    Run {
        /// One JSON object per line instead of text.
        #[arg(long)]
        json: bool,

        /// Use the simulated sensor instead of a serial port.
        #[arg(long)]
        demo: bool,

        /// Stop after this many seconds.
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },
    /// List serial ports.
    Ports,
    /// Validate the config and show the link budget.
    CheckConfig,
}

#[derive(Serialize)]
struct SampleLine<'a> {
    host_time: String,
    #[serde(flatten)]
    sample: &'a Sample,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, port: Option<String>) -> Result<LinkConfig> {
    let mut config = match path {
        Some(path) => LinkConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => LinkConfig::from_file(DEFAULT_CONFIG)
            .with_context(|| format!("loading config {DEFAULT_CONFIG}"))?,
        None => {
            info!("no {DEFAULT_CONFIG} found, using defaults");
            LinkConfig::default()
        }
    };
    if let Some(port) = port {
        config.port = port;
    }
    Ok(config)
}

fn print_sample(sample: &Sample, json: bool) {
    if json {
        let line = SampleLine {
            host_time: chrono::Utc::now().to_rfc3339(),
            sample,
        };
        match serde_json::to_string(&line) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!("cannot serialize sample: {e}"),
        }
        return;
    }

    println!(
        "{:>10} ms  euler {:>8.2} {:>8.2} {:>8.2}  gyro {:>8.2} {:>8.2} {:>8.2}  acc {:>7.3} {:>7.3} {:>7.3}",
        sample.timestamp_ms,
        sample.euler[0],
        sample.euler[1],
        sample.euler[2],
        sample.gyro[0],
        sample.gyro[1],
        sample.gyro[2],
        sample.accel_with_gravity[0],
        sample.accel_with_gravity[1],
        sample.accel_with_gravity[2],
    );
}

fn run(config: LinkConfig, json: bool, demo: bool, duration: Option<u64>) -> Result<()> {
    for warning in config.warnings() {
        warn!("{warning}");
    }

    let mut session = if demo {
        LinkSession::new(config, DemoConnector::new())
    } else {
        LinkSession::serial(config)
    };
    session.set_data_callback(move |sample| print_sample(&sample, json));
    session
        .start()
        .with_context(|| format!("starting link on {}", session.config().port))?;

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    while deadline.map_or(true, |d| Instant::now() < d) {
        thread::sleep(Duration::from_secs(1));
        debug!(state = ?session.state(), stats = ?session.stats(), "link status");
    }

    session.stop();
    let stats = session.stats();
    info!(
        "received {} samples, {} frame errors, {} reconnects",
        stats.samples, stats.frame_errors, stats.reconnects
    );
    Ok(())
}

fn ports() -> Result<()> {
    let ports = list_ports();
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {:04x}:{:04x}  {}",
                port.name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

fn check_config(config: &LinkConfig) -> Result<()> {
    println!("port              {} @ {} baud", config.port, config.baud_rate);
    println!("device address    {}", config.device_address);
    println!("subscribe         {:#06x}", config.subscribe);
    println!("report frame      {} bytes", config.report_frame_len());
    println!("report rate       {} Hz", config.report_rate);
    println!("link maximum      {:.1} Hz", config.max_report_rate());

    let warnings = config.warnings();
    if warnings.is_empty() {
        println!("config OK");
    }
    for warning in warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run {
            json,
            demo,
            duration,
        } => run(load_config(cli.config.as_deref(), cli.port)?, json, demo, duration),
        Command::Ports => ports(),
        Command::CheckConfig => check_config(&load_config(cli.config.as_deref(), cli.port)?),
    }
}
