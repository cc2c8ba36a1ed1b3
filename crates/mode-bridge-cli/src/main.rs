//! mode-bridge CLI
//!
//! Configuration and debugging tool for mode-bridge.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use mode_bridge_config::{Config, ControlCode};
use nix::sys::stat::Mode;

const DEFAULT_CONFIG_PATH: &str = "~/.config/mode-bridge/config.kdl";

#[derive(Parser, Debug)]
#[command(name = "mode-bridge")]
#[command(about = "Inspect and debug the i3/sway mode bridge")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file and print the mode table
    Validate,

    /// Print the control code a mode name resolves to
    Resolve {
        /// Binding mode name as reported by the window manager
        mode: String,
    },

    /// Create the control FIFO and print every code written to it
    Listen {
        /// FIFO path (overrides the control-channel path from the config)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate => cmd_validate(cli.config.as_deref()),
        Commands::Resolve { mode } => cmd_resolve(cli.config.as_deref(), &mode),
        Commands::Listen { path } => cmd_listen(cli.config.as_deref(), path),
    }
}

/// Load the config; only an explicitly given file has to exist
fn load_config(config: Option<&str>) -> miette::Result<(PathBuf, Config)> {
    let config_path: PathBuf = shellexpand::tilde(config.unwrap_or(DEFAULT_CONFIG_PATH))
        .into_owned()
        .into();

    let parsed = match config {
        Some(_) => mode_bridge_config::parse_config(&config_path)?,
        None => mode_bridge_config::parse_config_or_default(&config_path)?,
    };

    Ok((config_path, parsed))
}

fn cmd_validate(config: Option<&str>) -> miette::Result<()> {
    let (config_path, config) = load_config(config)?;

    println!("Validating configuration: {}", config_path.display());
    println!("Configuration is valid!");
    println!(
        "  Window manager socket: {}",
        config
            .window_manager
            .socket_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<from $I3SOCK / $SWAYSOCK>".to_string())
    );
    println!(
        "  Reconnect delay: {}ms, up to {}ms",
        config.window_manager.initial_retry_delay.as_millis(),
        config.window_manager.max_retry_delay.as_millis()
    );
    println!(
        "  Control channel: {} (timeout {}ms)",
        config.channel.path.display(),
        config.channel.timeout.as_millis()
    );
    println!("  Modes: {}", config.modes.len());
    for (mode, code) in config.modes.iter() {
        println!("    - {:?} -> {} ({})", mode, code, describe(code));
    }
    println!(
        "    - <any other mode> -> {} ({})",
        config.modes.fallback(),
        describe(config.modes.fallback())
    );

    Ok(())
}

fn cmd_resolve(config: Option<&str>, mode: &str) -> miette::Result<()> {
    let (_, config) = load_config(config)?;
    let code = config.modes.resolve(mode);

    if config.modes.contains(mode) {
        println!("{} ({})", code, describe(code));
    } else {
        println!("{} ({}, fallback)", code, describe(code));
    }

    Ok(())
}

fn cmd_listen(config: Option<&str>, path: Option<PathBuf>) -> miette::Result<()> {
    let path = match path {
        Some(path) => path,
        None => load_config(config)?.1.channel.path,
    };

    let mut fifo = create_fifo(&path).into_diagnostic()?;
    println!("Listening on {} (Ctrl+C to stop)", path.display());

    let mut buf = [0u8; 80];
    loop {
        let n = fifo.read(&mut buf).into_diagnostic()?;
        for &byte in &buf[..n] {
            match ControlCode::new(byte) {
                Some(code) => println!("{} ({})", code, describe(effective_code(code))),
                None => println!("{:#04x} (not a control code, treated as d)", byte),
            }
        }
    }
}

/// Replace whatever is at `path` with a fresh FIFO and open it for reading
///
/// The FIFO is opened read-write so reads block instead of returning EOF
/// between writers.
fn create_fifo(path: &Path) -> io::Result<File> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    // The umask decides the final permissions
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o777)).map_err(io::Error::from)?;

    OpenOptions::new().read(true).write(true).open(path)
}

/// The code the remapper acts on; it treats unknown codes as `d`
fn effective_code(code: ControlCode) -> ControlCode {
    match code {
        ControlCode::DEFAULT | ControlCode::MOUSE | ControlCode::NOOP => code,
        _ => ControlCode::DEFAULT,
    }
}

fn describe(code: ControlCode) -> &'static str {
    match effective_code(code) {
        ControlCode::MOUSE => "mouse",
        ControlCode::NOOP => "no-op",
        _ if code != ControlCode::DEFAULT => "unknown, treated as default",
        _ => "default",
    }
}
