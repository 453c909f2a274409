//! kettler-bridge - Kettler console to home automation bridge
//!
//! Polls a Kettler exercise console over its serial port, publishes status
//! telemetry, resets the console when idle and records completed sessions.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use kettler_core::activity::{DebouncedSampler, SysfsPin};
use kettler_core::config::{BridgeConfig, TelemetrySettings};
use kettler_core::demo::SimulatedConsole;
use kettler_core::protocol::{list_ports, DeviceOptions, KettlerDevice, ProtocolError};
use kettler_core::session::{SessionMachine, SystemClock};
use kettler_core::stats::{report, SqliteStatsStore};
use kettler_core::supervisor::Supervisor;
use kettler_core::telemetry::{
    deliver, deliver_to_broker, TelemetryMessage, TelemetrySink, TopicSink,
};

/// kettler-bridge - Kettler console to home automation bridge
#[derive(Parser, Debug)]
#[command(name = "kettler-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "KETTLER_CONFIG", default_value = "kettler.json")]
    config: PathBuf,

    /// Serial port (or tcp://host:port), overrides the configuration
    #[arg(short, long, global = true)]
    port: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the session loop until interrupted
    Run {
        /// Use the built-in simulated console
        #[arg(long)]
        demo: bool,
    },

    /// Print the console identity and poll its status
    Status {
        /// Poll with ES1 instead of ST
        #[arg(long)]
        alternative: bool,

        /// Number of polls, 0 polls until interrupted
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Seconds between polls
        #[arg(long, default_value = "1")]
        interval: f64,
    },

    /// Send raw lines typed on stdin and print whatever comes back
    Repl,

    /// Reset the console
    Reset,

    /// List serial ports
    #[command(alias = "ls")]
    Ports,

    /// Summarize recorded sessions
    Report {
        /// Stats database, overrides the configuration
        #[arg(long)]
        database: Option<PathBuf>,

        /// Only count days from this date on in the calorie summary
        #[arg(long)]
        since: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { demo } => {
            let mut config = load_config(&cli)?;
            config.device.demo |= *demo;
            config.validate()?;

            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(run_bridge(config))
        }
        Commands::Status {
            alternative,
            count,
            interval,
        } => {
            let config = load_config(&cli)?;
            poll_status(&config, *alternative, *count, *interval)
        }
        Commands::Repl => repl(&load_config(&cli)?),
        Commands::Reset => {
            let mut device = open_device(&load_config(&cli)?)?;
            device.reset()?;
            println!("Console reset");
            Ok(())
        }
        Commands::Ports => {
            print_ports();
            Ok(())
        }
        Commands::Report { database, since } => {
            let config = load_config(&cli)?;
            let path = match (database, &config.stats) {
                (Some(path), _) => path.clone(),
                (None, Some(stats)) => stats.database.clone(),
                (None, None) => bail!("No stats database configured, pass --database"),
            };
            print_report(&path, *since)
        }
    }
}

/// Configuration file if present, defaults otherwise, with `--port` applied
fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = if cli.config.exists() {
        BridgeConfig::load(&cli.config)
            .with_context(|| format!("Failed to load {}", cli.config.display()))?
    } else {
        tracing::debug!(path = %cli.config.display(), "No config file, using defaults");
        let mut config = BridgeConfig::default();
        config.device.port = std::env::var(kettler_core::config::PORT_ENV).ok();
        config
    };
    if let Some(port) = &cli.port {
        config.device.port = Some(port.clone());
    }
    Ok(config)
}

fn open_device(config: &BridgeConfig) -> Result<KettlerDevice, ProtocolError> {
    if config.device.demo {
        tracing::info!("Using simulated console");
        return KettlerDevice::with_channel(
            Box::new(SimulatedConsole::default()),
            DeviceOptions::default(),
        );
    }
    match config.device.port.as_deref() {
        Some(port) => KettlerDevice::open(port),
        None => Err(ProtocolError::TransportOpen {
            port: String::new(),
            reason: format!("no port configured (use --port or {})", kettler_core::config::PORT_ENV),
        }),
    }
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let (sink, rx) = TopicSink::channel(config.telemetry.topics.clone());
    let delivery = spawn_delivery(&config.telemetry, rx).await?;

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping after the current step");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    tracing::info!(
        client_id = %config.telemetry.client_id,
        broker = config.telemetry.broker.is_some(),
        "Bridge started"
    );

    // The sink moves onto the blocking thread and is dropped with it, which
    // ends the delivery task once the queue is drained.
    let failures = tokio::task::spawn_blocking(move || run_supervised(&config, &sink, stop))
        .await
        .context("Session loop panicked")??;

    if let Err(e) = delivery.await {
        tracing::warn!(error = %e, "Telemetry delivery task failed");
    }
    tracing::info!(failures, "Bridge stopped");
    Ok(())
}

/// Broker delivery when one is configured, JSON lines otherwise
async fn spawn_delivery(
    telemetry: &TelemetrySettings,
    rx: tokio::sync::mpsc::UnboundedReceiver<TelemetryMessage>,
) -> Result<tokio::task::JoinHandle<()>> {
    if let Some(broker) = &telemetry.broker {
        let options = broker.options(&telemetry.client_id);
        return Ok(tokio::spawn(deliver_to_broker(rx, options)));
    }

    let output = telemetry.output.as_str();
    if output == "-" {
        return Ok(tokio::spawn(async move {
            deliver(rx, tokio::io::stdout()).await;
        }));
    }

    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .await
        .with_context(|| format!("Failed to open telemetry output {output}"))?;
    Ok(tokio::spawn(async move {
        deliver(rx, file).await;
    }))
}

/// Build the collaborators once and rebuild the device and session loop after
/// every failure. Returns the number of failed runs.
fn run_supervised(config: &BridgeConfig, sink: &TopicSink, stop: Arc<AtomicBool>) -> Result<usize> {
    let mut store = match &config.stats {
        Some(stats) => Some(SqliteStatsStore::open(&stats.database).with_context(|| {
            format!("Failed to open stats database {}", stats.database.display())
        })?),
        None => None,
    };

    let mut sampler = match &config.activity {
        Some(activity) => {
            let pin = SysfsPin::open(activity.pin)
                .with_context(|| format!("Failed to open activity pin {}", activity.pin))?;
            Some(DebouncedSampler::new(pin).with_timing(
                activity.samples,
                Duration::from_millis(activity.sample_interval_ms),
            ))
        }
        None => None,
    };

    let supervisor = Supervisor::new(config.restart_backoff(), stop.clone());
    let failures = supervisor.run(|| -> Result<(), ProtocolError> {
        let device = open_device(config)?;
        sink.publish_discovery(device.identity());

        let mut machine = SessionMachine::new(device, SystemClock, config.session_config())
            .with_sink(sink)
            .with_stop(stop.clone());
        if let Some(store) = store.as_mut() {
            machine = machine.with_store(store);
        }
        if let Some(sampler) = sampler.as_mut() {
            machine = machine.with_sampler(sampler);
        }
        machine.run()
    });
    Ok(failures)
}

fn poll_status(config: &BridgeConfig, alternative: bool, count: u32, interval: f64) -> Result<()> {
    if !(interval.is_finite() && interval >= 0.0) {
        bail!("--interval must not be negative");
    }
    let mut device = open_device(config)?;
    let identity = device.identity().clone();
    println!(
        "{} {} (serial {}, version {})",
        identity.device_id, identity.device_model, identity.serial_number, identity.version
    );
    println!("Console time: {}", device.device_time()?);

    let mut polled = 0;
    while count == 0 || polled < count {
        if polled > 0 {
            std::thread::sleep(Duration::from_secs_f64(interval));
        }
        let status = if alternative {
            device.status_alternative()?
        } else {
            device.status()?
        };
        println!("{status}");
        polled += 1;
    }

    let (tx, rx) = device.counters();
    tracing::debug!(tx_bytes = tx, rx_bytes = rx, "Done");
    Ok(())
}

fn repl(config: &BridgeConfig) -> Result<()> {
    let mut device = open_device(config)?;
    println!(
        "Connected to {}, type commands, 'quit' to leave",
        device.identity().device_model
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    print!("> ");
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let text = line.trim();
        if matches!(text, "quit" | "exit") {
            break;
        }
        if !text.is_empty() {
            match device.send_raw(text, false) {
                Ok(response) => print!("{response}"),
                Err(e) => println!("error: {e}"),
            }
        }
        print!("\n> ");
        stdout.flush()?;
    }
    device.close();
    Ok(())
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
}

fn print_report(path: &Path, since: Option<NaiveDate>) -> Result<()> {
    let store = SqliteStatsStore::open(path)
        .with_context(|| format!("Failed to open stats database {}", path.display()))?;
    let records = store.records()?;

    let rows = report::session_rows(&records);
    println!("{:<12} {:>10} {:>8} {:>10}", "Day", "Distance", "Time", "Energy");
    for row in &rows {
        println!(
            "{:<12} {:>10} {:>8} {:>10}",
            row.start_day, row.distance, row.time, row.energy
        );
    }
    println!("{} sessions", rows.len());

    println!();
    for day in report::daily_calories(&records, since) {
        match day.kcal {
            Some(kcal) => println!("{}  {:>7.0} kcal", day.day, kcal),
            None => println!("{}        -", day.day),
        }
    }
    Ok(())
}
