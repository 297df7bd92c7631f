//! Timestamp sources
//!
//! Every timestamp in a session comes from one [`Clock`]. Host capture uses
//! [`MonotonicClock`]; [`CounterClock`] converts a raw free-running tick
//! counter using a frequency captured once at startup.

use crate::pipeline::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Clock construction errors; fatal at startup
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("timestamp source unavailable: {0}")]
    Unavailable(String),
}

/// Monotonic time source shared by producers and the consumer loop
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Host clock backed by `Instant`, epoch fixed at construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let nanos = self.epoch.elapsed().as_nanos();
        Timestamp::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Convert `ticks` of a counter running at `frequency_hz` into nanoseconds.
///
/// The product is formed in 128 bits so no `u64` tick count can overflow it.
pub fn ticks_to_nanos(ticks: u64, frequency_hz: u64) -> u64 {
    debug_assert!(frequency_hz > 0);
    let nanos = ticks as u128 * NANOS_PER_SEC / frequency_hz as u128;
    u64::try_from(nanos).unwrap_or(u64::MAX)
}

/// Clock over a raw tick counter (performance counter, hardware timer)
pub struct CounterClock<F> {
    read: F,
    frequency_hz: u64,
    origin: u64,
}

impl<F> CounterClock<F>
where
    F: Fn() -> u64 + Send + Sync,
{
    /// Capture the frequency once; a zero frequency means the counter is unusable.
    ///
    /// The first reading becomes the session epoch.
    pub fn new(read: F, frequency_hz: u64) -> Result<Self, ClockError> {
        if frequency_hz == 0 {
            return Err(ClockError::Unavailable(
                "counter frequency reported as 0 Hz".to_string(),
            ));
        }
        let origin = read();
        Ok(Self {
            read,
            frequency_hz,
            origin,
        })
    }

    pub fn frequency_hz(&self) -> u64 {
        self.frequency_hz
    }
}

impl<F> Clock for CounterClock<F>
where
    F: Fn() -> u64 + Send + Sync,
{
    fn now(&self) -> Timestamp {
        let ticks = (self.read)().wrapping_sub(self.origin);
        Timestamp::from_nanos(ticks_to_nanos(ticks, self.frequency_hz))
    }
}

/// Manually driven clock for simulations and tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, at: Timestamp) {
        self.nanos.store(at.as_nanos(), Ordering::Release);
    }

    pub fn advance(&self, delta: Duration) {
        let nanos = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}
