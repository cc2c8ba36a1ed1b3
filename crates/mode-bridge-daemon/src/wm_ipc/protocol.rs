//! i3 IPC wire format
//!
//! Every message, in both directions, is a 14 byte header followed by a JSON
//! payload:
//!
//! ```text
//! +----------+----------------+--------------+-----------------+
//! | "i3-ipc" | payload length | message type | payload (JSON)  |
//! | 6 bytes  | u32            | u32          | length bytes    |
//! +----------+----------------+--------------+-----------------+
//! ```
//!
//! Integers use the host's native byte order. Events pushed by the window
//! manager have the highest bit of the type set. sway speaks the same
//! protocol.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::WmError;

pub const MAGIC: &[u8; 6] = b"i3-ipc";

pub const HEADER_LEN: usize = MAGIC.len() + 8;

/// Largest payload accepted from the peer (16 MiB)
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

const EVENT_BIT: u32 = 1 << 31;

/// Client requests used by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Subscribe = 2,
    GetVersion = 7,
}

impl MessageType {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Event kinds that can be subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Mode,
    Shutdown,
}

impl EventKind {
    /// Name used in the `SUBSCRIBE` payload
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Mode => "mode",
            EventKind::Shutdown => "shutdown",
        }
    }

    /// Message type of the pushed event, high bit included
    pub fn code(self) -> u32 {
        EVENT_BIT
            | match self {
                EventKind::Mode => 2,
                EventKind::Shutdown => 6,
            }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        [EventKind::Mode, EventKind::Shutdown]
            .into_iter()
            .find(|kind| kind.code() == code)
    }
}

/// A single message read off the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is_event(&self) -> bool {
        self.message_type & EVENT_BIT != 0
    }
}

/// Serialize a message into its on-the-wire form
pub fn encode(message_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    buf.extend_from_slice(&message_type.to_ne_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Write one message and flush it
pub async fn write_frame<W>(
    writer: &mut W,
    message_type: u32,
    payload: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(message_type, payload)).await?;
    writer.flush().await
}

/// Read one complete message
///
/// # Errors
///
/// Returns `WmError::ConnectionClosed` if the peer closes the socket, even
/// part-way through a frame.
/// Returns `WmError::Protocol` for a bad magic string or an oversized payload.
/// Returns `WmError::ReceiveFailed` for any other I/O error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, WmError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact(reader, &mut header).await?;

    if &header[..MAGIC.len()] != MAGIC {
        return Err(WmError::Protocol {
            message: format!("bad magic {:?}", &header[..MAGIC.len()]),
        });
    }

    let len = u32::from_ne_bytes([header[6], header[7], header[8], header[9]]);
    let message_type = u32::from_ne_bytes([header[10], header[11], header[12], header[13]]);

    if len > MAX_PAYLOAD_LEN {
        return Err(WmError::Protocol {
            message: format!("payload of {} bytes exceeds {} byte limit", len, MAX_PAYLOAD_LEN),
        });
    }

    let mut payload = vec![0u8; len as usize];
    read_exact(reader, &mut payload).await?;

    Ok(Frame {
        message_type,
        payload,
    })
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), WmError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WmError::ConnectionClosed),
        Err(e) => Err(WmError::ReceiveFailed(e)),
    }
}
