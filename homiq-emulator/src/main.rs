//! Homiq Bridge Emulator
//!
//! Emulates a serial-to-TCP device server with a fleet of simulated Homiq
//! field devices behind it, so a master controller can be exercised without
//! hardware. Also carries a small client for sending single frames.

mod client;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use homiq_bridge::{BridgeServer, EventKind};
use homiq_protocol::{Frame, FrameId};
use homiq_sim::{FaultInjector, MemoryStore, Simulator};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use client::{send_with_retry, SendOptions};
use settings::{Settings, PORT_ENV};

#[derive(Debug, Parser)]
#[command(name = "homiq-emulator", version, about = "Emulated Homiq RS-485/TCP bridge")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the emulated bridge
    Serve(ServeArgs),
    /// Send one frame and wait for its ACK
    Send(SendArgs),
    /// Print the effective settings, optionally saving them
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct SettingsArgs {
    /// Settings file (defaults to the XDG config location)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address
    #[arg(long)]
    host: Option<String>,
    /// Listen port (overrides TCP_PORT)
    #[arg(long)]
    port: Option<u16>,
    /// JSON fixture with devices, faults and scenarios
    #[arg(long)]
    fixture: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(flatten)]
    settings: SettingsArgs,
    /// Write the effective settings back to the settings file
    #[arg(long)]
    save: bool,
}

#[derive(Debug, Args)]
struct SendArgs {
    /// Bridge address, HOST:PORT
    #[arg(long)]
    tcp: String,
    /// Destination module address
    #[arg(long)]
    dst: String,
    /// Command, e.g. O.3, GI, IM.7
    #[arg(long)]
    cmd: String,
    /// Value
    #[arg(long)]
    val: String,
    /// Source address
    #[arg(long, default_value = "0")]
    src: String,
    /// Sequence id (1..=511)
    #[arg(long, default_value_t = 1)]
    pkt: u16,
    /// Attempts before giving up
    #[arg(long, default_value_t = 5)]
    retries: u32,
    /// Pause between attempts
    #[arg(long, default_value_t = 300)]
    retry_delay_ms: u64,
    /// Wait for the ACK per attempt
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
    /// Acknowledge unsolicited frames while waiting
    #[arg(long)]
    auto_ack: bool,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "homiq_emulator=info,homiq_protocol=info,homiq_sim=info,homiq_bridge=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Settings file, then TCP_PORT, then command line flags
fn effective_settings(args: &SettingsArgs) -> Settings {
    let mut settings = Settings::load(args.config.as_deref());
    settings.apply_port_env(std::env::var(PORT_ENV).ok().as_deref());
    if let Some(host) = &args.host {
        settings.server.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(fixture) = &args.fixture {
        settings.fixture = Some(fixture.clone());
    }
    settings
}

fn build_store(settings: &Settings) -> anyhow::Result<MemoryStore> {
    let store = match &settings.fixture {
        Some(path) => {
            info!("Loading fixture {}", path.display());
            MemoryStore::load(path)
                .with_context(|| format!("Failed to load fixture {}", path.display()))?
        }
        None => MemoryStore::seeded(),
    };
    Ok(store.with_event_capacity(settings.event_log_capacity))
}

async fn serve(args: ServeArgs) -> anyhow::Result<ExitCode> {
    let settings = effective_settings(&args.settings);
    let store = build_store(&settings)?;
    let simulator = Simulator::with_injector(Box::new(store), FaultInjector::new());

    info!("Starting Homiq bridge emulator");
    let handle = BridgeServer::start(settings.server.clone(), simulator).await?;

    let mut events = handle.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match &event.kind {
                    EventKind::FrameRx { .. } | EventKind::FrameTx { .. } => {
                        debug!("{}", event.to_json())
                    }
                    _ => info!("{}", event.to_json()),
                },
                Err(RecvError::Lagged(n)) => warn!("Event log lagged, {} events skipped", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");

    handle.shutdown().await?;
    logger.abort();
    Ok(ExitCode::SUCCESS)
}

async fn send(args: SendArgs) -> anyhow::Result<ExitCode> {
    let id = FrameId::new(args.pkt).context("--pkt must be within 1..=511")?;
    let options = SendOptions {
        addr: args.tcp,
        frame: Frame::send(args.cmd, args.val, args.src, args.dst, id),
        retries: args.retries.max(1),
        retry_delay: Duration::from_millis(args.retry_delay_ms),
        timeout: Duration::from_millis(args.timeout_ms),
        auto_ack: args.auto_ack,
    };

    if send_with_retry(&options).await? {
        println!("OK: got ACK");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("ERR: no ACK");
        Ok(ExitCode::from(2))
    }
}

fn config(args: ConfigArgs) -> anyhow::Result<ExitCode> {
    let settings = effective_settings(&args.settings);
    println!("{}", serde_json::to_string_pretty(&settings)?);
    if args.save {
        let path = settings.save(args.settings.config.as_deref())?;
        info!("Saved settings to {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_logging();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Send(args) => send(args).await,
        Command::Config(args) => config(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_send_defaults() {
        let cli = Cli::try_parse_from([
            "homiq-emulator", "send", "--tcp", "127.0.0.1:4001", "--dst", "05", "--cmd", "O.3",
            "--val", "1",
        ])
        .unwrap();
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.src, "0");
        assert_eq!(args.pkt, 1);
        assert_eq!(args.retries, 5);
        assert_eq!(args.retry_delay_ms, 300);
        assert_eq!(args.timeout_ms, 2000);
        assert!(!args.auto_ack);
    }

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::try_parse_from([
            "homiq-emulator",
            "serve",
            "--config",
            "/nonexistent/settings.json",
            "--host",
            "127.0.0.1",
            "--port",
            "4555",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let settings = effective_settings(&args.settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 4555);
    }

    #[test]
    fn test_seeded_store_without_fixture() {
        let store = build_store(&Settings::default()).unwrap();
        let simulator = Simulator::new(Box::new(store));
        assert_eq!(simulator.store().list_devices().unwrap().len(), 5);
    }
}
