//! Control channel to the keyboard remapper
//!
//! The remapper owns a named pipe (by default `/run/keyboard-remapper.sock`)
//! and reads single ASCII control codes from it. Every delivery opens the
//! path fresh, writes one byte and closes it again:
//!
//! - `O_WRONLY | O_NONBLOCK`: opening a FIFO nobody reads fails with `ENXIO`
//!   instead of hanging, and a full pipe fails with `EAGAIN`
//! - `O_TRUNC`: no effect on a FIFO; a regular file only ever holds the most
//!   recent code
//! - no `O_CREAT`: a missing path means the remapper is not running
//!
//! The whole open/write/close sequence is bounded by a timeout. No delivery
//! failure is fatal.
//!
//! `tokio::fs` runs the open and write on the blocking pool, and a timeout
//! does not cancel them. With a FIFO and `O_NONBLOCK` neither call can
//! stall, so codes stay in order. A regular file on a slow filesystem may
//! still receive a timed-out write after a later one.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mode_bridge_config::{ChannelConfig, ControlCode};
use nix::libc;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Why a control code could not be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The path does not exist, or the FIFO has no reader
    NotFound,
    PermissionDenied,
    /// The pipe is full or the delivery timed out
    Busy,
    Other,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeliveryFailure::NotFound => "no remapper is listening",
            DeliveryFailure::PermissionDenied => "permission denied",
            DeliveryFailure::Busy => "channel busy",
            DeliveryFailure::Other => "I/O error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
#[error("Failed to deliver control code to {}: {reason}", path.display())]
pub struct DeliveryError {
    pub reason: DeliveryFailure,
    pub path: PathBuf,
    #[source]
    pub source: Option<io::Error>,
}

impl DeliveryError {
    fn from_io(path: &Path, error: io::Error) -> Self {
        Self {
            reason: classify(&error),
            path: path.to_path_buf(),
            source: Some(error),
        }
    }

    fn timed_out(path: &Path) -> Self {
        Self {
            reason: DeliveryFailure::Busy,
            path: path.to_path_buf(),
            source: None,
        }
    }
}

fn classify(error: &io::Error) -> DeliveryFailure {
    match error.raw_os_error() {
        // Opening a FIFO write-only without a reader / writing after the reader left
        Some(libc::ENXIO) | Some(libc::EPIPE) => return DeliveryFailure::NotFound,
        Some(libc::EAGAIN) => return DeliveryFailure::Busy,
        _ => {}
    }

    match error.kind() {
        io::ErrorKind::NotFound => DeliveryFailure::NotFound,
        io::ErrorKind::PermissionDenied => DeliveryFailure::PermissionDenied,
        io::ErrorKind::WouldBlock => DeliveryFailure::Busy,
        _ => DeliveryFailure::Other,
    }
}

/// Write-only handle on the remapper's control path
///
/// Holds no open file; see `deliver`.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    path: PathBuf,
    timeout: Duration,
}

impl ControlChannel {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.path.clone(), config.timeout)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `code` to the control path as a single byte
    ///
    /// The file is closed again before this returns, whether or not the
    /// write succeeded.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` whose `reason` classifies the failure. A
    /// delivery that exceeds the timeout is reported as `Busy`.
    pub async fn deliver(&self, code: ControlCode) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.timeout, self.write_code(code)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::from_io(&self.path, e)),
            Err(_) => Err(DeliveryError::timed_out(&self.path)),
        }
    }

    async fn write_code(&self, code: ControlCode) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .await?;

        file.write_all(&[code.as_byte()]).await?;
        // tokio reports the result of the underlying write on flush
        file.flush().await
    }
}
