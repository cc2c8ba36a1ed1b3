//! Window manager IPC client implementation
//!
//! This module provides the `WmClient` for talking to i3 or sway. The client
//! handles socket discovery, connection management and the request/reply half
//! of the protocol. Subscribing consumes the client and turns the connection
//! into a `ModeEventStream`.

use std::path::{Path, PathBuf};

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::process::Command;
use tracing::debug;

use super::events::ModeEventStream;
use super::protocol::{self, EventKind, MessageType};
use super::types::{SubscribeReply, VersionReply};
use super::error::WmError;

/// Environment variable i3 exports with its socket path
const I3_SOCKET_ENV: &str = "I3SOCK";

/// Environment variable sway exports with its socket path
const SWAY_SOCKET_ENV: &str = "SWAYSOCK";

/// Window manager binaries that can print their socket path
const SOCKET_PATH_COMMANDS: [&str; 2] = ["i3", "sway"];

/// Read the socket path from `$I3SOCK`, then `$SWAYSOCK`
///
/// Empty values are treated as unset.
pub fn socket_path_from_env() -> Option<PathBuf> {
    [I3_SOCKET_ENV, SWAY_SOCKET_ENV]
        .into_iter()
        .filter_map(|name| std::env::var_os(name))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Ask a running window manager for its socket path
///
/// Runs `i3 --get-socketpath`, then `sway --get-socketpath`, and returns the
/// first non-empty answer.
async fn socket_path_from_command() -> Option<PathBuf> {
    for program in SOCKET_PATH_COMMANDS {
        let output = match Command::new(program).arg("--get-socketpath").output().await {
            Ok(output) if output.status.success() => output,
            Ok(_) => continue,
            Err(e) => {
                debug!("Could not run {} --get-socketpath: {}", program, e);
                continue;
            }
        };

        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    None
}

/// Discover the window manager's IPC socket path
///
/// Checks `$I3SOCK` and `$SWAYSOCK` first and falls back to asking the
/// window manager binaries, which is what i3's own tools do.
///
/// # Errors
///
/// Returns `WmError::SocketNotSet` if no source yields a path.
/// Returns `WmError::SocketNotFound` if the path doesn't exist.
pub async fn get_socket_path() -> Result<PathBuf, WmError> {
    let socket_path = match socket_path_from_env() {
        Some(path) => path,
        None => socket_path_from_command()
            .await
            .ok_or(WmError::SocketNotSet)?,
    };

    if !socket_path.exists() {
        return Err(WmError::SocketNotFound { path: socket_path });
    }

    Ok(socket_path)
}

/// Client for communicating with i3 or sway via IPC
///
/// # Example
///
/// ```ignore
/// let mut client = WmClient::connect().await?;
/// let version = client.get_version().await?;
/// let mut events = client.subscribe(&[EventKind::Mode]).await?;
/// ```
#[derive(Debug)]
pub struct WmClient {
    /// The Unix socket connection to the window manager
    socket: UnixStream,
    /// The socket path (stored for log messages)
    socket_path: PathBuf,
}

impl WmClient {
    /// Connect to the socket discovered from the environment
    ///
    /// # Errors
    ///
    /// Returns any error from `get_socket_path()` or `connect_to()`.
    pub async fn connect() -> Result<Self, WmError> {
        let socket_path = get_socket_path().await?;
        Self::connect_to(&socket_path).await
    }

    /// Connect to the socket at `socket_path`
    ///
    /// # Errors
    ///
    /// Returns `WmError::SocketNotFound` if the path doesn't exist.
    /// Returns `WmError::ConnectionFailed` if the connection is refused or
    /// the path is not a socket.
    pub async fn connect_to(socket_path: &Path) -> Result<Self, WmError> {
        if !socket_path.exists() {
            return Err(WmError::SocketNotFound {
                path: socket_path.to_path_buf(),
            });
        }

        let socket = UnixStream::connect(socket_path)
            .await
            .map_err(|e| WmError::ConnectionFailed {
                path: socket_path.to_path_buf(),
                source: e,
            })?;

        Ok(Self {
            socket,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and wait for its reply
    ///
    /// No events can arrive before a subscription, so the next frame on the
    /// socket is always the reply.
    ///
    /// # Errors
    ///
    /// Returns `WmError::SendFailed` if writing to the socket fails.
    /// Returns `WmError::ConnectionClosed` if the socket closes before the reply.
    /// Returns `WmError::Protocol` if the reply has the wrong type.
    async fn send_request(
        &mut self,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<Vec<u8>, WmError> {
        protocol::write_frame(&mut self.socket, message_type.code(), payload)
            .await
            .map_err(WmError::SendFailed)?;

        let reply = protocol::read_frame(&mut self.socket).await?;

        if reply.message_type != message_type.code() {
            return Err(WmError::Protocol {
                message: format!(
                    "expected reply of type {}, got {}",
                    message_type.code(),
                    reply.message_type
                ),
            });
        }

        Ok(reply.payload)
    }

    /// Query the window manager version, e.g. `4.23 (2023-10-29)` or `1.9`
    pub async fn get_version(&mut self) -> Result<String, WmError> {
        let payload = self.send_request(MessageType::GetVersion, b"").await?;
        let reply: VersionReply =
            serde_json::from_slice(&payload).map_err(WmError::DeserializeFailed)?;
        Ok(reply.human_readable)
    }

    /// Subscribe to `kinds` and turn the connection into an event stream
    ///
    /// # Errors
    ///
    /// Returns `WmError::SubscriptionFailed` if the connection drops before the
    /// subscription is confirmed.
    /// Returns `WmError::SubscriptionRejected` if the window manager answers
    /// with `success: false`.
    pub async fn subscribe(mut self, kinds: &[EventKind]) -> Result<ModeEventStream, WmError> {
        let events: Vec<&'static str> = kinds.iter().map(|kind| kind.name()).collect();
        let payload = serde_json::to_vec(&events).map_err(WmError::SerializeFailed)?;

        let reply = match self.send_request(MessageType::Subscribe, &payload).await {
            Ok(reply) => reply,
            Err(WmError::SendFailed(e)) | Err(WmError::ReceiveFailed(e)) => {
                return Err(WmError::SubscriptionFailed(e));
            }
            Err(WmError::ConnectionClosed) => {
                return Err(WmError::SubscriptionFailed(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before subscription was confirmed",
                )));
            }
            Err(e) => return Err(e),
        };

        let reply: SubscribeReply =
            serde_json::from_slice(&reply).map_err(WmError::DeserializeFailed)?;

        if !reply.success {
            return Err(WmError::SubscriptionRejected { events });
        }

        debug!(events = ?events, "Subscribed to window manager events");

        Ok(ModeEventStream::new(
            BufReader::new(self.socket),
            self.socket_path,
        ))
    }
}
