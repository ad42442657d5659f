//! `tracklink` - CLI for the detection listener and flight sequencer
//!
//! `listen` prints detections until interrupted; `fly` runs one
//! takeoff-and-land sequence. Exits 0 on success and 1 on any failure.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};

use tracklink::autopilot::{self, url::URL_HELP};
use tracklink::channel::platform_transport;
use tracklink::cli::{Cli, Command, ConfigCommand, FlyCommand, ListenCommand};
use tracklink::{init_logging, Config, ConsoleHandler, DetectionRecord, ShutdownToken, StreamReader};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Listen(cmd) => {
            let config = Config::load_from(cli.config).context("loading configuration")?;
            handle_listen(config, &cmd).await
        }
        Command::Fly(cmd) => {
            let config = Config::load_from(cli.config).context("loading configuration")?;
            handle_fly(&config, &cmd).await
        }
        Command::Config(cmd) => handle_config(cli.config, cmd),
    }
}

#[cfg(target_os = "linux")]
fn init_platform() {
    debug!(platform = tracklink_linux::platform_name(), "Platform");
    if let Err(e) = tracklink_linux::init() {
        debug!(error = %e, "Platform init failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn init_platform() {}

async fn handle_listen(mut config: Config, cmd: &ListenCommand) -> anyhow::Result<()> {
    cmd.apply(&mut config)?;
    init_platform();

    let transport = platform_transport(config.connect_timeout())?;
    let options = config.reader_options()?;
    let reader = StreamReader::<DetectionRecord>::connect(transport.as_ref(), &options)
        .await
        .with_context(|| format!("connecting to {}", options.channel))?;

    let shutdown = ShutdownToken::new();
    shutdown.cancel_on_ctrl_c();

    let format = cmd.format();
    let reader_shutdown = shutdown.clone();
    let reader_task = tokio::spawn(async move {
        let mut handler = ConsoleHandler::stdout(format);
        reader.run(&mut handler, &reader_shutdown).await
    });

    // The reader may disconnect on its own; keep idling until interrupted.
    shutdown.idle(config.idle_interval()).await;

    let status = reader_task.await.context("reader task failed")??;
    debug!(?status, "Listener stopped");
    Ok(())
}

async fn handle_fly(config: &Config, cmd: &FlyCommand) -> anyhow::Result<()> {
    let url = match cmd.connection_url() {
        Ok(url) => url,
        Err(e) => {
            eprintln!("{URL_HELP}");
            return Err(e.into());
        }
    };

    let shutdown = ShutdownToken::new();
    shutdown.cancel_on_ctrl_c();

    let vehicle = autopilot::connect(&url, config.discovery_timeout()).await?;
    let report = autopilot::takeoff_and_land(vehicle.as_ref(), &config.flight_plan(), &shutdown).await?;

    info!(
        elapsed_secs = report.elapsed.as_secs_f64(),
        hover_completed = report.hover_completed,
        "Flight complete"
    );
    Ok(())
}

fn handle_config(config_path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Pipe]");
                println!("  Channel:            {}", config.channel());
                println!("  Client name:        {}", config.pipe.client_name);
                println!(
                    "  Queue depth:        {} records ({} bytes)",
                    config.pipe.queue_depth,
                    config.max_queued_bytes()?
                );
                println!("  Tail policy:        {}", config.pipe.tail_policy);
                println!("  Connect timeout:    {} ms", config.pipe.connect_timeout_ms);
                println!();
                println!("[Flight]");
                println!("  Position rate:      {} Hz", config.flight.position_rate_hz);
                println!("  Discovery timeout:  {} ms", config.flight.discovery_timeout_ms);
                println!("  Poll interval:      {} ms", config.flight.poll_interval_ms);
                println!("  Hover:              {} s", config.flight.hover_secs);
                println!("  Settle:             {} s", config.flight.settle_secs);
                println!();
                println!("[Runtime]");
                println!("  Idle interval:      {} ms", config.runtime.idle_interval_ms);
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                config_path
                    .unwrap_or_else(Config::default_config_path)
                    .display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            Config::load_from(Some(path))?;
            println!("Configuration is valid.");
        }
    }
    Ok(())
}
