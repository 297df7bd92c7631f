//! Periodic diagnostic heartbeat
//!
//! Scheduled from the consumer loop by comparing the clock against a
//! deadline. The deadline always moves forward by exactly one period from
//! its previous value, so loop jitter never accumulates into drift.

use super::{Identity, PipelineError, Timestamp};
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1000);

/// Fixed-period deadline tracker
#[derive(Debug, Clone)]
pub struct Heartbeat {
    period: Duration,
    next_due: Timestamp,
    fired: u64,
}

impl Heartbeat {
    /// First beat is due one period after `start`
    pub fn new(start: Timestamp, period: Duration) -> Result<Self, PipelineError> {
        if period.is_zero() {
            return Err(PipelineError::ZeroHeartbeatPeriod);
        }
        Ok(Self {
            period,
            next_due: start.saturating_add(period),
            fired: 0,
        })
    }

    /// Returns `true` if a beat is due at `now`, advancing the deadline by one period
    pub fn poll(&mut self, now: Timestamp) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due = self.next_due.saturating_add(self.period);
        self.fired += 1;
        true
    }

    pub fn next_due(&self) -> Timestamp {
        self.next_due
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of beats fired so far
    pub fn fired(&self) -> u64 {
        self.fired
    }
}

/// Diagnostic snapshot emitted on each beat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatSnapshot {
    pub at: Timestamp,
    pub sequence: u64,
    /// Drop counter at snapshot time
    pub dropped: u64,
    /// Events waiting in the queue
    pub queued: usize,
    /// Identities currently held active by the filter
    pub active: Vec<Identity>,
}
