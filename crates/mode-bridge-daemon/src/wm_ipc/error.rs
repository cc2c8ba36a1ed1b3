//! Error types for window manager IPC operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when communicating with i3 or sway
///
/// None of these are fatal to the daemon: the event source reconnects on
/// every one of them.
#[derive(Debug, Error)]
pub enum WmError {
    /// No socket path in the environment and the window manager could not report one
    #[error("I3SOCK/SWAYSOCK not set and no window manager reported a socket path - is i3 or sway running?")]
    SocketNotSet,

    /// The socket path does not exist
    #[error("Window manager socket not found at {path}")]
    SocketNotFound { path: PathBuf },

    /// Failed to connect to the socket
    #[error("Failed to connect to window manager socket at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The connection dropped while registering for events
    #[error("Connection dropped while subscribing to events: {0}")]
    SubscriptionFailed(#[source] std::io::Error),

    /// The window manager refused the subscription
    #[error("Window manager rejected subscription to {events:?}")]
    SubscriptionRejected { events: Vec<&'static str> },

    /// Failed to send a message
    #[error("Failed to send message to window manager: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Failed to receive a message
    #[error("Failed to receive message from window manager: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Failed to serialize a payload to JSON
    #[error("Failed to serialize payload: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Failed to deserialize a payload from JSON
    #[error("Failed to deserialize payload: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// The peer sent something that is not a valid i3 IPC frame
    #[error("Window manager protocol error: {message}")]
    Protocol { message: String },

    /// The window manager announced it is exiting or restarting
    #[error("Window manager is shutting down ({change})")]
    WindowManagerShutdown { change: String },

    /// Connection was closed by the peer
    #[error("Connection to window manager closed")]
    ConnectionClosed,
}

impl WmError {
    /// Whether the connection is gone, as opposed to the connection never being established
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            WmError::ConnectionClosed
                | WmError::WindowManagerShutdown { .. }
                | WmError::ReceiveFailed(_)
                | WmError::Protocol { .. }
        )
    }
}
