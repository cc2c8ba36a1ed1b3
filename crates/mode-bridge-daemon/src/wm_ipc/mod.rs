//! i3 / sway IPC client for binding mode tracking
//!
//! This module provides communication with the window manager via its IPC
//! socket. It enables mode-bridge to:
//! - Discover and connect to the running i3 or sway instance
//! - Subscribe to binding mode changes
//! - Keep the subscription alive across window manager restarts
//!
//! ## Architecture
//!
//! - `protocol`: the binary `i3-ipc` framing
//! - `WmClient`: request/reply client, consumed by `subscribe`
//! - `ModeEventStream`: one subscribed connection
//! - `ModeEventSource`: reconnecting, infinite stream of `ModeChangeEvent`s
//! - `WmError`: error types for IPC operations
//!
//! ## Protocol
//!
//! i3 exposes a Unix socket at `$I3SOCK` (sway at `$SWAYSOCK`). Clients send
//! framed requests and receive framed replies. After a `SUBSCRIBE` request
//! the window manager pushes event frames on the same connection until it
//! closes.

mod client;
mod error;
mod events;
mod protocol;
mod types;

pub use events::ModeEventSource;
pub use types::ModeChangeEvent;

#[cfg(test)]
pub(crate) use events::tests::{handshake, send_mode, spawn_fake_wm, wait_for_hangup};
