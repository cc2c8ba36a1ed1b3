//! mode-bridge daemon
//!
//! Follows the i3/sway binding mode and tells the keyboard remapper about
//! every change through its control channel.

mod bridge;
mod channel;
mod shutdown;
mod wm_ipc;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::bridge::ModeBridge;
use crate::channel::ControlChannel;
use crate::shutdown::{listen_for_signals, ShutdownHandle};
use crate::wm_ipc::ModeEventSource;

const DEFAULT_CONFIG_PATH: &str = "~/.config/mode-bridge/config.kdl";

#[derive(Parser, Debug)]
#[command(name = "mode-bridged")]
#[command(about = "Forwards i3/sway binding mode changes to a keyboard remapper")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Window manager IPC socket (overrides the config and $I3SOCK/$SWAYSOCK)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Control channel the remapper reads codes from
    #[arg(long)]
    channel: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // An explicitly given config must exist; the default one is optional
    let mut config = match &args.config {
        Some(path) => {
            let config_path: PathBuf = shellexpand::tilde(path).into_owned().into();
            tracing::info!("Loading configuration from {}", config_path.display());
            mode_bridge_config::parse_config(&config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))?
        }
        None => {
            let config_path: PathBuf = shellexpand::tilde(DEFAULT_CONFIG_PATH).into_owned().into();
            tracing::info!("Loading configuration from {}", config_path.display());
            mode_bridge_config::parse_config_or_default(&config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))?
        }
    };

    if let Some(socket) = args.socket {
        config.window_manager.socket_path = Some(socket);
    }
    if let Some(channel) = args.channel {
        config.channel.path = channel;
    }

    tracing::info!(
        "Loaded configuration with {} mode(s), fallback code '{}'",
        config.modes.len(),
        config.modes.fallback()
    );
    for (mode, code) in config.modes.iter() {
        tracing::debug!(mode = %mode, code = %code, "Mode mapping");
    }

    let shutdown = ShutdownHandle::new();
    listen_for_signals(shutdown.clone()).context("Failed to install signal handlers")?;

    let events = ModeEventSource::new(&config.window_manager).into_stream();
    let bridge = ModeBridge::new(
        config.modes,
        ControlChannel::from_config(&config.channel),
    );

    tracing::info!("mode-bridge daemon starting...");

    let summary = bridge.run(events, shutdown.subscribe()).await;

    tracing::info!(
        delivered = summary.delivered,
        failed = summary.failed,
        "Shutting down..."
    );

    Ok(())
}
