//! Mode bridge event loop
//!
//! Consumes mode changes, resolves each one to a control code through the
//! mode table and delivers the code to the control channel:
//!
//! ```text
//! +-----------------+  ModeChangeEvent  +------------+  ControlCode  +----------------+
//! | ModeEventSource | ----------------> | ModeBridge | ------------> | ControlChannel |
//! +-----------------+                   +------------+               +----------------+
//! ```
//!
//! Events are handled strictly one at a time and in order. A failed
//! delivery is logged and the event dropped; the loop keeps running.
//! Shutdown is only observed while waiting for the next event, so a
//! delivery that has started always runs to completion.

use futures::{Stream, StreamExt};
use mode_bridge_config::{ControlCode, ModeTable};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channel::{ControlChannel, DeliveryError};
use crate::wm_ipc::ModeChangeEvent;

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug)]
pub struct ModeBridge {
    table: ModeTable,
    channel: ControlChannel,
}

impl ModeBridge {
    pub fn new(table: ModeTable, channel: ControlChannel) -> Self {
        Self { table, channel }
    }

    /// Control code for the mode named in `event`; never fails
    pub fn resolve_code(&self, event: &ModeChangeEvent) -> ControlCode {
        self.table.resolve(&event.change)
    }

    /// Resolve and deliver a single event
    ///
    /// # Errors
    ///
    /// Returns the `DeliveryError` from the control channel.
    pub async fn forward(&self, event: &ModeChangeEvent) -> Result<ControlCode, DeliveryError> {
        let code = self.resolve_code(event);
        self.channel.deliver(code).await?;
        debug!(mode = %event.change, code = %code, "Delivered control code");
        Ok(code)
    }

    /// Forward every event from `events` until shutdown is requested
    ///
    /// Also returns if `events` ends or the shutdown sender is dropped.
    /// `events` is dropped before this returns, which closes the window
    /// manager connection.
    pub async fn run<S>(&self, events: S, mut shutdown: watch::Receiver<bool>) -> RunSummary
    where
        S: Stream<Item = ModeChangeEvent>,
    {
        futures::pin_mut!(events);
        let mut summary = RunSummary::default();

        info!(
            channel = %self.channel.path().display(),
            "Forwarding mode changes"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let event = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown handle dropped");
                    }
                    break;
                }
                event = events.next() => match event {
                    Some(event) => event,
                    None => {
                        info!("Mode event stream ended");
                        break;
                    }
                },
            };

            match self.forward(&event).await {
                Ok(_) => summary.delivered += 1,
                Err(e) => {
                    warn!(
                        mode = %event.change,
                        reason = ?e.reason,
                        "{}",
                        e
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
