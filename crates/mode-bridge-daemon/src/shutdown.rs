//! Shutdown signalling
//!
//! A `ShutdownHandle` broadcasts a single "stop" request to every holder of a
//! receiver. `listen_for_signals` wires SIGTERM, SIGINT and SIGHUP to it.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

/// Exit status when a second signal cuts the graceful shutdown short
const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Ask everything holding a receiver to stop. Idempotent.
    pub fn request(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Request shutdown on the first SIGTERM, SIGINT or SIGHUP
///
/// The handlers are installed before this returns, so a signal arriving
/// right after startup is not lost. They stay installed, so a second
/// signal exits the process at once instead of waiting for a graceful stop.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be installed.
pub fn listen_for_signals(handle: ShutdownHandle) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        let mut requested = false;

        loop {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
                _ = sighup.recv() => "SIGHUP",
            };

            if requested {
                warn!("Received {} during shutdown, exiting immediately", name);
                std::process::exit(FORCED_EXIT_CODE);
            }

            info!("Received {}, shutting down", name);
            handle.request();
            requested = true;
        }
    });

    Ok(())
}
