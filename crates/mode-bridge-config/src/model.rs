//! Configuration data model

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Path the keyboard remapper creates its mode FIFO at
pub const DEFAULT_CHANNEL_PATH: &str = "/run/keyboard-remapper.sock";

/// Upper bound on a single delivery to the control channel
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 250;

/// First delay before reconnecting to the window manager
pub const DEFAULT_INITIAL_RETRY_DELAY_MS: u64 = 500;

/// Cap for the reconnect backoff
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 10_000;

/// Root configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub window_manager: WindowManagerConfig,
    pub channel: ChannelConfig,
    pub modes: ModeTable,
}

/// Connection settings for the window manager's IPC socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowManagerConfig {
    /// Explicit socket path; discovered from the environment when unset
    pub socket_path: Option<PathBuf>,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for WindowManagerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            initial_retry_delay: Duration::from_millis(DEFAULT_INITIAL_RETRY_DELAY_MS),
            max_retry_delay: Duration::from_millis(DEFAULT_MAX_RETRY_DELAY_MS),
        }
    }
}

/// Where and how control codes are delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub path: PathBuf,
    pub timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CHANNEL_PATH),
            timeout: Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS),
        }
    }
}

/// A single printable ASCII byte written to the control channel
///
/// The remapper understands `d` (default), `m` (mouse) and `n` (no-op) and
/// treats anything else as `d`, so the alphabet can grow without changing
/// this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlCode(u8);

impl ControlCode {
    pub const DEFAULT: Self = Self(b'd');
    pub const MOUSE: Self = Self(b'm');
    pub const NOOP: Self = Self(b'n');

    /// Returns `None` unless `byte` is printable ASCII (no spaces or controls)
    pub fn new(byte: u8) -> Option<Self> {
        byte.is_ascii_graphic().then_some(Self(byte))
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn as_char(self) -> char {
        self.0 as char
    }
}

impl Default for ControlCode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for ControlCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            [byte] => Self::new(*byte)
                .ok_or_else(|| format!("Control code must be printable ASCII, got {:?}", s)),
            _ => Err(format!(
                "Control code must be exactly one character, got {:?}",
                s
            )),
        }
    }
}

/// Mapping from window manager mode names to control codes
///
/// Lookups never fail: a name missing from the table resolves to the
/// fallback code. Mode names are matched exactly (case-sensitive), the way
/// i3 and sway report them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeTable {
    codes: BTreeMap<String, ControlCode>,
    fallback: ControlCode,
}

impl Default for ModeTable {
    /// `default` → `d`, `mouse` → `m`, anything else → `d`
    fn default() -> Self {
        let mut table = Self::new(ControlCode::DEFAULT);
        table.insert("default", ControlCode::DEFAULT);
        table.insert("mouse", ControlCode::MOUSE);
        table
    }
}

impl ModeTable {
    /// Create an empty table that resolves everything to `fallback`
    pub fn new(fallback: ControlCode) -> Self {
        Self {
            codes: BTreeMap::new(),
            fallback,
        }
    }

    /// Add or replace a mapping, returning the previous code for `mode`
    pub fn insert(&mut self, mode: impl Into<String>, code: ControlCode) -> Option<ControlCode> {
        self.codes.insert(mode.into(), code)
    }

    /// Look up the code for `mode`, falling back for unknown names
    pub fn resolve(&self, mode: &str) -> ControlCode {
        self.codes.get(mode).copied().unwrap_or(self.fallback)
    }

    pub fn fallback(&self) -> ControlCode {
        self.fallback
    }

    pub fn set_fallback(&mut self, fallback: ControlCode) {
        self.fallback = fallback;
    }

    pub fn contains(&self, mode: &str) -> bool {
        self.codes.contains_key(mode)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Explicit entries in mode-name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, ControlCode)> {
        self.codes.iter().map(|(mode, code)| (mode.as_str(), *code))
    }
}
