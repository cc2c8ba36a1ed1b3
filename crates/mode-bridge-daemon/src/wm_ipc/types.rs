//! Payload types for i3 / sway IPC messages
//!
//! Only the fields the bridge needs are modelled; everything else in the
//! JSON payloads is ignored during deserialization.

use serde::Deserialize;

/// A change of the window manager's binding mode
///
/// Sent by i3 and sway whenever a `mode` command switches the active
/// binding mode, e.g. from `default` to `resize`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModeChangeEvent {
    /// Name of the mode that is now active
    pub change: String,
}

impl ModeChangeEvent {
    pub fn new(change: impl Into<String>) -> Self {
        Self {
            change: change.into(),
        }
    }
}

/// The window manager is about to exit or restart in place
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShutdownEvent {
    /// `"restart"` or `"exit"`
    pub change: String,
}

/// An event decoded from the subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WmEvent {
    Mode(ModeChangeEvent),
    Shutdown(ShutdownEvent),
    /// An event type the bridge does not subscribe to, identified by its raw type
    Other(u32),
}

/// Reply to a `SUBSCRIBE` message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscribeReply {
    pub success: bool,
}

/// Reply to a `GET_VERSION` message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionReply {
    pub human_readable: String,
}
