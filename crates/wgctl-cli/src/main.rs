//! Command-line host for tunnel control and telemetry
//!
//! Stands where an embedding application would: validates arguments,
//! drives the controller registry, and renders snapshots as text or
//! JSON lines.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wgctl_control::{ConfigProvisioner, ControllerRegistry};
use wgctl_proto::{TunnelName, TunnelSnapshot};

#[derive(Parser)]
#[command(
    name = "wgctl",
    about = "Manage WireGuard tunnels and stream their telemetry",
    version
)]
struct Cli {
    /// Directory tunnel configs are provisioned into
    #[arg(long, global = true, env = "WGCTL_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision a config and bring a tunnel up
    Start {
        name: TunnelName,
        /// Path to the tunnel configuration; reads stdin when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Tear a tunnel down
    Stop { name: TunnelName },
    /// Print one status snapshot
    Status {
        name: TunnelName,
        /// Emit the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stream status snapshots once per second until interrupted
    Watch {
        name: TunnelName,
        /// Emit snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = cli
        .config_dir
        .unwrap_or_else(ConfigProvisioner::default_dir);
    let registry =
        ControllerRegistry::platform(config_dir).context("failed to set up tunnel backend")?;

    match cli.command {
        Command::Start { name, config } => {
            let config_text = read_config(config).await?;
            registry.start(&name, &config_text).await?;
            println!("tunnel {name} is up");
        }
        Command::Stop { name } => {
            registry.stop(&name).await?;
            println!("tunnel {name} stopped");
        }
        Command::Status { name, json } => {
            let snapshot = registry.status(&name).await;
            print_snapshot(&snapshot, json)?;
        }
        Command::Watch { name, json } => {
            watch(&registry, &name, json).await?;
        }
    }

    Ok(())
}

async fn read_config(path: Option<PathBuf>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display())),
        None => {
            let mut text = String::new();
            use tokio::io::AsyncReadExt;
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("failed to read config from stdin")?;
            Ok(text)
        }
    }
}

async fn watch(registry: &ControllerRegistry, name: &TunnelName, json: bool) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(16);
    registry.listen(name, tx);

    loop {
        tokio::select! {
            snapshot = rx.recv() => match snapshot {
                Some(snapshot) => print_snapshot(&snapshot, json)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                debug!(tunnel = %name, "interrupted, detaching subscriber");
                registry.cancel(name);
                break;
            }
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &TunnelSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    let handshake = match snapshot.last_handshake_millis {
        0 => "never".to_string(),
        millis => DateTime::<Utc>::from_timestamp_millis(millis)
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| format!("{millis} ms")),
    };
    println!(
        "{}: {} rx={}B tx={}B last-handshake={}",
        snapshot.name, snapshot.state, snapshot.rx_bytes, snapshot.tx_bytes, handshake
    );
    Ok(())
}
