//! Mode event stream with automatic reconnection
//!
//! This module turns the window manager's event subscription into an
//! infinite stream of `ModeChangeEvent`s.
//!
//! ## Protocol
//!
//! 1. Connect to the i3/sway socket
//! 2. Send `GET_VERSION` (logged, also proves the peer speaks i3 IPC)
//! 3. Send `SUBSCRIBE ["mode","shutdown"]` and wait for `{"success":true}`
//! 4. Continuously receive event frames on the same connection
//!
//! ## Reconnection
//!
//! Any loss of the connection (EOF, reset, a `shutdown` event, a malformed
//! frame) drops the connection and establishes a new subscription:
//!
//! - Backoff starts at `initial-retry-delay-ms` (500ms), doubles each retry,
//!   caps at `max-retry-delay-ms` (10 seconds)
//! - There is no retry limit; the bridge is useless without a window manager
//! - A lost connection waits out the next delay before reconnecting
//! - The backoff resets once a connection has delivered an event
//!
//! Events the window manager emitted while no connection existed are lost.
//! Nothing is replayed after a reconnect, so no mode change is ever delivered
//! twice.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------+      +-----------------+      +------------+
//! | ModeEventSource | ---> | ModeEventStream | ---> | ModeBridge |
//! | (reconnects)    |      | (one connection)|      |            |
//! +-----------------+      +-----------------+      +------------+
//! ```
//!
//! The stream is lazy: nothing connects until the consumer polls it, and
//! dropping it closes the current connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, Stream};
use mode_bridge_config::WindowManagerConfig;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::client::WmClient;
use super::error::WmError;
use super::protocol::{self, EventKind};
use super::types::{ModeChangeEvent, ShutdownEvent, WmEvent};

/// Events every subscription asks for
const SUBSCRIBED_EVENTS: [EventKind; 2] = [EventKind::Mode, EventKind::Shutdown];

/// A single subscribed connection to the window manager
///
/// Created by `WmClient::subscribe`. After subscribing, the socket only
/// carries events; no more request/reply interactions are possible.
#[derive(Debug)]
pub struct ModeEventStream {
    reader: BufReader<UnixStream>,
    socket_path: PathBuf,
}

impl ModeEventStream {
    pub(crate) fn new(reader: BufReader<UnixStream>, socket_path: PathBuf) -> Self {
        Self {
            reader,
            socket_path,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Read and decode the next event
    ///
    /// Frames without the event bit and event types the bridge never
    /// subscribed to come back as `WmEvent::Other`.
    ///
    /// # Errors
    ///
    /// Returns `WmError::ConnectionClosed` if the connection is closed (EOF).
    /// Returns `WmError::ReceiveFailed` if reading from the socket fails.
    /// Returns `WmError::Protocol` if the frame header is invalid.
    /// Returns `WmError::DeserializeFailed` if a known event has a bad payload.
    /// The frame has been consumed in that case, so reading can continue.
    pub async fn next_event(&mut self) -> Result<WmEvent, WmError> {
        let frame = protocol::read_frame(&mut self.reader).await?;

        if !frame.is_event() {
            return Ok(WmEvent::Other(frame.message_type));
        }

        match EventKind::from_code(frame.message_type) {
            Some(EventKind::Mode) => serde_json::from_slice::<ModeChangeEvent>(&frame.payload)
                .map(WmEvent::Mode)
                .map_err(WmError::DeserializeFailed),
            Some(EventKind::Shutdown) => serde_json::from_slice::<ShutdownEvent>(&frame.payload)
                .map(WmEvent::Shutdown)
                .map_err(WmError::DeserializeFailed),
            None => Ok(WmEvent::Other(frame.message_type)),
        }
    }

    /// Read the next mode change, skipping everything else
    ///
    /// Mode events with an unparseable payload are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `WmError::WindowManagerShutdown` when the window manager
    /// announces an exit or restart; its socket is about to go away.
    /// Returns any connection error from `next_event()`.
    pub async fn next_mode_event(&mut self) -> Result<ModeChangeEvent, WmError> {
        loop {
            match self.next_event().await {
                Ok(WmEvent::Mode(event)) => return Ok(event),
                Ok(WmEvent::Shutdown(event)) => {
                    return Err(WmError::WindowManagerShutdown {
                        change: event.change,
                    });
                }
                Ok(WmEvent::Other(message_type)) => {
                    debug!(message_type, "Ignoring unsubscribed window manager message");
                }
                Err(WmError::DeserializeFailed(e)) => {
                    warn!("Skipping malformed window manager event: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            current: initial,
            max: max.max(initial),
        }
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Produces subscribed connections, reconnecting whenever one is lost
///
/// # Example
///
/// ```ignore
/// let source = ModeEventSource::new(&config.window_manager);
/// let events = source.into_stream();
/// futures::pin_mut!(events);
/// while let Some(event) = events.next().await {
///     println!("mode is now {}", event.change);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ModeEventSource {
    /// Explicit socket path, bypassing `$I3SOCK`/`$SWAYSOCK` discovery
    socket_override: Option<PathBuf>,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
}

impl ModeEventSource {
    pub fn new(config: &WindowManagerConfig) -> Self {
        Self {
            socket_override: config.socket_path.clone(),
            initial_retry_delay: config.initial_retry_delay,
            max_retry_delay: config.max_retry_delay,
        }
    }

    /// Open a fresh connection to the window manager
    ///
    /// The socket path is discovered again on every call, so a window
    /// manager restarted under a new socket path is picked up.
    pub async fn connect(&self) -> Result<WmClient, WmError> {
        match &self.socket_override {
            Some(path) => WmClient::connect_to(path).await,
            None => WmClient::connect().await,
        }
    }

    /// Connect once and subscribe to mode and shutdown events
    ///
    /// # Errors
    ///
    /// Returns any error from connecting, the version query or subscribing.
    pub async fn establish(&self) -> Result<ModeEventStream, WmError> {
        let mut client = self.connect().await?;
        let version = client.get_version().await?;
        info!(
            socket = %client.socket_path().display(),
            version = %version,
            "Connected to window manager"
        );
        client.subscribe(&SUBSCRIBED_EVENTS).await
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_retry_delay, self.max_retry_delay)
    }

    /// Establish a subscription, retrying until one succeeds
    pub async fn establish_with_retry(&self) -> ModeEventStream {
        self.establish_with_backoff(&mut self.backoff()).await
    }

    /// Like `establish_with_retry`, continuing from the delays in `backoff`
    async fn establish_with_backoff(&self, backoff: &mut Backoff) -> ModeEventStream {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.establish().await {
                Ok(stream) => {
                    if attempt > 1 {
                        info!("Window manager subscription established after {} attempt(s)", attempt);
                    }
                    return stream;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Window manager connection failed, retrying..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Turn the source into an infinite stream of mode changes
    ///
    /// The stream never ends on its own. Connection loss is logged and
    /// followed by a reconnect after the next backoff delay; the consumer
    /// never sees an error. The backoff only resets once a connection has
    /// delivered an event, so a peer that accepts and immediately drops
    /// every connection is retried at the capped rate.
    pub fn into_stream(self) -> impl Stream<Item = ModeChangeEvent> {
        let backoff = self.backoff();

        stream::unfold(
            (self, None::<ModeEventStream>, backoff),
            |(source, current, mut backoff)| async move {
                let mut events = match current {
                    Some(events) => events,
                    None => source.establish_with_backoff(&mut backoff).await,
                };

                loop {
                    match events.next_mode_event().await {
                        Ok(event) => {
                            debug!(mode = %event.change, "Window manager mode changed");
                            backoff.reset();
                            return Some((event, (source, Some(events), backoff)));
                        }
                        Err(e) => {
                            let delay = backoff.next_delay();
                            warn!(
                                socket = %events.socket_path().display(),
                                delay_ms = delay.as_millis() as u64,
                                "Lost window manager connection ({}). Reconnecting...",
                                e
                            );
                            drop(events);
                            sleep(delay).await;
                            events = source.establish_with_backoff(&mut backoff).await;
                        }
                    }
                }
            },
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::StreamExt;
    use tokio::net::UnixListener;

    use crate::wm_ipc::protocol::{read_frame, write_frame, MessageType};

    const WORKSPACE_EVENT: u32 = 0x8000_0000;

    fn mode_payload(mode: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({ "change": mode, "pango_markup": false }))
            .unwrap()
    }

    /// Answer requests like i3 until the client subscribes
    pub(crate) async fn handshake(conn: &mut UnixStream) {
        loop {
            let request = read_frame(conn).await.unwrap();
            if request.message_type == MessageType::GetVersion.code() {
                write_frame(conn, request.message_type, br#"{"human_readable":"4.23"}"#)
                    .await
                    .unwrap();
            } else {
                assert_eq!(request.message_type, MessageType::Subscribe.code());
                write_frame(conn, request.message_type, br#"{"success":true}"#)
                    .await
                    .unwrap();
                return;
            }
        }
    }

    pub(crate) async fn send_mode(conn: &mut UnixStream, mode: &str) {
        write_frame(conn, EventKind::Mode.code(), &mode_payload(mode))
            .await
            .unwrap();
    }

    /// Wait until the client closes its end; false if it sent anything instead
    pub(crate) async fn wait_for_hangup(conn: &mut UnixStream) -> bool {
        matches!(read_frame(conn).await, Err(WmError::ConnectionClosed))
    }

    /// A fake i3 that serves one session per accepted connection
    ///
    /// Each session sends its mode changes and hangs up. Returns the number
    /// of completed handshakes.
    pub(crate) fn spawn_fake_wm(
        listener: UnixListener,
        sessions: Vec<Vec<&'static str>>,
    ) -> Arc<AtomicUsize> {
        let subscriptions = Arc::new(AtomicUsize::new(0));
        let counter = subscriptions.clone();

        tokio::spawn(async move {
            for modes in sessions {
                let (mut conn, _) = listener.accept().await.unwrap();
                handshake(&mut conn).await;
                counter.fetch_add(1, Ordering::SeqCst);
                for mode in modes {
                    send_mode(&mut conn, mode).await;
                }
            }
            // Keep the socket bound so reconnect attempts stall instead of spinning
            std::future::pending::<()>().await;
        });

        subscriptions
    }

    fn test_config(socket_path: PathBuf) -> WindowManagerConfig {
        WindowManagerConfig {
            socket_path: Some(socket_path),
            initial_retry_delay: Duration::from_millis(10),
            max_retry_delay: Duration::from_millis(40),
        }
    }

    fn event_stream_pair() -> (ModeEventStream, UnixStream) {
        let (client, server) = UnixStream::pair().unwrap();
        let stream = ModeEventStream::new(BufReader::new(client), PathBuf::from("/tmp/test.sock"));
        (stream, server)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(10));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_stream_backs_off_when_connections_drop_immediately() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let socket_path = temp_dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        // Every session completes the handshake and hangs up without an event
        let subscriptions = spawn_fake_wm(listener, vec![Vec::new(); 1000]);

        let config = WindowManagerConfig {
            socket_path: Some(socket_path),
            initial_retry_delay: Duration::from_millis(200),
            max_retry_delay: Duration::from_secs(1),
        };
        let events = ModeEventSource::new(&config).into_stream();
        futures::pin_mut!(events);

        let next = tokio::time::timeout(Duration::from_millis(500), events.next()).await;
        assert!(next.is_err(), "no event should have been produced");

        // Immediate first attempt, then 200ms and 400ms delays
        let count = subscriptions.load(Ordering::SeqCst);
        assert!(
            (1..=3).contains(&count),
            "expected at most 3 subscriptions in 500ms, got {}",
            count
        );
    }

    #[test]
    fn test_backoff_max_below_initial() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_next_mode_event_skips_other_events() {
        let (mut stream, mut server) = event_stream_pair();

        write_frame(&mut server, WORKSPACE_EVENT, br#"{"change":"focus"}"#)
            .await
            .unwrap();
        write_frame(&mut server, EventKind::Mode.code(), b"not json")
            .await
            .unwrap();
        write_frame(&mut server, EventKind::Mode.code(), &mode_payload("mouse"))
            .await
            .unwrap();

        let event = stream.next_mode_event().await.unwrap();
        assert_eq!(event, ModeChangeEvent::new("mouse"));
    }

    #[tokio::test]
    async fn test_next_event_reports_unsubscribed_types() {
        let (mut stream, mut server) = event_stream_pair();
        write_frame(&mut server, WORKSPACE_EVENT, b"{}").await.unwrap();

        assert_eq!(stream.next_event().await.unwrap(), WmEvent::Other(WORKSPACE_EVENT));
    }

    #[tokio::test]
    async fn test_shutdown_event_ends_connection() {
        let (mut stream, mut server) = event_stream_pair();
        write_frame(&mut server, EventKind::Shutdown.code(), br#"{"change":"restart"}"#)
            .await
            .unwrap();

        match stream.next_mode_event().await {
            Err(WmError::WindowManagerShutdown { change }) => assert_eq!(change, "restart"),
            other => panic!("Expected WindowManagerShutdown, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (mut stream, server) = event_stream_pair();
        drop(server);

        let err = stream.next_mode_event().await.unwrap_err();
        assert!(matches!(err, WmError::ConnectionClosed));
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_stream_yields_events_in_order() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let socket_path = temp_dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        spawn_fake_wm(listener, vec![vec!["default", "resize", "default"]]);

        let events = ModeEventSource::new(&test_config(socket_path)).into_stream();
        let received: Vec<String> = events.take(3).map(|event| event.change).collect().await;

        assert_eq!(received, vec!["default", "resize", "default"]);
    }

    #[tokio::test]
    async fn test_stream_reconnects_without_redelivery() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let socket_path = temp_dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let subscriptions = spawn_fake_wm(listener, vec![vec!["default", "mouse"], vec!["default"]]);

        let events = ModeEventSource::new(&test_config(socket_path)).into_stream();
        let received: Vec<String> = events.take(3).map(|event| event.change).collect().await;

        assert_eq!(received, vec!["default", "mouse", "default"]);
        assert_eq!(subscriptions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stream_reconnects_after_wm_shutdown_event() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let socket_path = temp_dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            handshake(&mut conn).await;
            write_frame(&mut conn, EventKind::Mode.code(), &mode_payload("mouse"))
                .await
                .unwrap();
            // i3 keeps the socket open briefly after announcing a restart
            write_frame(&mut conn, EventKind::Shutdown.code(), br#"{"change":"restart"}"#)
                .await
                .unwrap();

            let (mut conn, _) = listener.accept().await.unwrap();
            handshake(&mut conn).await;
            write_frame(&mut conn, EventKind::Mode.code(), &mode_payload("default"))
                .await
                .unwrap();
            std::future::pending::<()>().await;
        });

        let events = ModeEventSource::new(&test_config(socket_path)).into_stream();
        let received: Vec<String> = events.take(2).map(|event| event.change).collect().await;

        assert_eq!(received, vec!["mouse", "default"]);
    }

    #[tokio::test]
    async fn test_establish_retries_until_socket_appears() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let socket_path = temp_dir.path().join("ipc.sock");

        let bind_path = socket_path.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            let listener = UnixListener::bind(&bind_path).unwrap();
            spawn_fake_wm(listener, vec![vec!["mouse"]]);
        });

        let source = ModeEventSource::new(&test_config(socket_path.clone()));
        let mut stream = tokio::time::timeout(Duration::from_secs(5), source.establish_with_retry())
            .await
            .expect("subscription was never established");

        assert_eq!(stream.socket_path(), socket_path.as_path());
        assert_eq!(stream.next_mode_event().await.unwrap(), ModeChangeEvent::new("mouse"));
    }

    #[tokio::test]
    async fn test_establish_missing_socket_fails() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let socket_path = temp_dir.path().join("ipc.sock");

        let source = ModeEventSource::new(&test_config(socket_path));
        assert!(matches!(
            source.establish().await,
            Err(WmError::SocketNotFound { .. })
        ));
    }
}
