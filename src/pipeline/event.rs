//! Event types flowing through the capture pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Monotonic instant in nanoseconds since the session epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub const fn as_micros(&self) -> u64 {
        self.0 / 1_000
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is later than `self`
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Advance by `delta`, saturating at the end of the representable range
    pub fn saturating_add(&self, delta: Duration) -> Timestamp {
        let nanos = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(nanos))
    }
}

/// Direction of a signal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    /// Line went active / key went down
    Assert,
    /// Line went inactive / key went up
    Release,
}

impl Edge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Edge::Assert => "assert",
            Edge::Release => "release",
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scan code plus the E0/E1 extended-key prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId {
    pub scan_code: u16,
    pub e0: bool,
    pub e1: bool,
}

impl KeyId {
    pub const fn new(scan_code: u16) -> Self {
        Self {
            scan_code,
            e0: false,
            e1: false,
        }
    }

    pub const fn extended(scan_code: u16) -> Self {
        Self {
            scan_code,
            e0: true,
            e1: false,
        }
    }

    /// Packs into `scan | e0 << 16 | e1 << 17`
    pub const fn packed(&self) -> u32 {
        self.scan_code as u32 | (self.e0 as u32) << 16 | (self.e1 as u32) << 17
    }

    pub const fn from_packed(packed: u32) -> Self {
        Self {
            scan_code: (packed & 0xFFFF) as u16,
            e0: packed & (1 << 16) != 0,
            e1: packed & (1 << 17) != 0,
        }
    }
}

/// Physical source of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// A GPIO line
    Pin(u8),
    /// A keyboard key on a single-device stream
    Key(KeyId),
    /// A key on one of several devices sharing a stream
    DeviceKey { device: u32, code: u16 },
}

impl Identity {
    /// Scan code for key identities, `None` for pins
    pub fn scan_code(&self) -> Option<u16> {
        match self {
            Identity::Pin(_) => None,
            Identity::Key(key) => Some(key.scan_code),
            Identity::DeviceKey { code, .. } => Some(*code),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Pin(pin) => write!(f, "GPIO{}", pin),
            Identity::Key(key) => write!(f, "key:{:#x}", key.packed()),
            Identity::DeviceKey { device, code } => write!(f, "dev{}:{}", device, code),
        }
    }
}

/// A timestamped edge from one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub identity: Identity,
    pub edge: Edge,
    pub timestamp: Timestamp,
}

impl Event {
    pub fn new(identity: Identity, edge: Edge, timestamp: Timestamp) -> Self {
        Self {
            identity,
            edge,
            timestamp,
        }
    }

    pub fn assert(identity: Identity, timestamp: Timestamp) -> Self {
        Self::new(identity, Edge::Assert, timestamp)
    }

    pub fn release(identity: Identity, timestamp: Timestamp) -> Self {
        Self::new(identity, Edge::Release, timestamp)
    }
}
