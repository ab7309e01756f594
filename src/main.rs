//! CLI Entry Point for sonar-recorder
//!
//! Loads configuration, sets up logging and signal handling, then runs the
//! recorder loop until Ctrl-C.
//!
//! # Usage
//!
//! Record from the built-in simulator into `./recordings`:
//! ```bash
//! sonar-recorder --simulate --output recordings
//! ```
//!
//! Override the unit address and transport:
//! ```bash
//! sonar-recorder -H 192.168.1.20 --non-blocking -c recorder.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use sonar_recorder::config::RecorderConfig;
use sonar_recorder::device::sim::SimulatedDevice;
use sonar_recorder::device::{RecordSettings, TransportMode};
use sonar_recorder::shutdown::{self, ShutdownTrigger};
use sonar_recorder::telemetry::{self, TracingConfig};
use sonar_recorder::{PageWriter, Recorder};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "sonar-recorder")]
#[command(about = "Records sonar pages from an acquisition unit into SDF files", long_about = None)]
struct Cli {
    /// Address of the acquisition unit
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Use the blocking transport (default)
    #[arg(short, long, conflicts_with = "non_blocking")]
    blocking: bool,

    /// Use the non-blocking transport
    #[arg(short, long)]
    non_blocking: bool,

    /// Configuration file
    #[arg(short, long, default_value = "sonar-recorder.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Record from the built-in simulator instead of a real unit
    #[arg(long)]
    simulate: bool,

    /// Output directory for simulated recordings
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Ping interval of the simulator in milliseconds
    #[arg(long, default_value_t = 100)]
    ping_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RecorderConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(host) = &cli.host {
        config.device.address = host.clone();
    }
    if cli.non_blocking {
        config.device.transport = TransportMode::NonBlocking;
    } else if cli.blocking {
        config.device.transport = TransportMode::Blocking;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    config.validate()?;

    let tracing_config = TracingConfig::from_logging_config(&config.logging)
        .map_err(anyhow::Error::msg)?
        .with_ansi(std::io::stdout().is_terminal());
    telemetry::init(tracing_config).map_err(anyhow::Error::msg)?;

    if !cli.simulate {
        bail!(
            "no acquisition unit transport is linked into this build; \
             run with --simulate or embed sonar_recorder with a Device implementation"
        );
    }

    let device = SimulatedDevice::free_running(Duration::from_millis(cli.ping_interval_ms), 256, true);
    tokio::fs::create_dir_all(&cli.output)
        .await
        .with_context(|| format!("creating {}", cli.output.display()))?;
    device.set_settings(RecordSettings {
        record_mode: true,
        pings_per_file: 500,
        file_prefix: "sim_".into(),
        file_path: cli.output.to_string_lossy().into_owned(),
        ..Default::default()
    });
    info!(
        output = %cli.output.display(),
        ping_interval_ms = cli.ping_interval_ms,
        "Recording from simulator"
    );

    let (trigger, token) = shutdown::channel();
    tokio::spawn(watch_signals(trigger));

    let writer = PageWriter::new(config.writer.clone());
    let mut recorder = Recorder::new(device, config.device.clone(), writer, token);
    if let Err(e) = recorder.run().await {
        error!(error = %e, "Recorder terminated");
        return Err(e.into());
    }
    info!("Recorder stopped");
    Ok(())
}

/// First Ctrl-C requests a clean shutdown, the second aborts.
async fn watch_signals(trigger: ShutdownTrigger) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C");
        return;
    }
    info!("Ctrl-C received, finishing current iteration");
    trigger.trigger();

    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Second Ctrl-C, exiting immediately");
        std::process::exit(130);
    }
}
