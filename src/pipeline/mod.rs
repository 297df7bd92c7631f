//! Event capture pipeline: bounded queue, debounce filter, heartbeat
//!
//! ```text
//! producer (callback / thread / tick) ──push──▶ queue ──pop──▶ CaptureLoop
//!                                                              ├─ DebounceFilter ─▶ sinks
//!                                                              └─ Heartbeat ──────▶ sinks
//! ```

mod capture;
mod debounce;
mod event;
mod heartbeat;
mod queue;

pub use capture::{CaptureLoop, CaptureSummary, Labeler, DEFAULT_IDLE_SLEEP};
pub use debounce::{
    DebounceConfig, DebounceFilter, DebounceState, Decision, FilterCounts, ReleaseMode,
    SuppressReason,
};
pub use event::{Edge, Event, Identity, KeyId, Timestamp};
pub use heartbeat::{Heartbeat, HeartbeatSnapshot, DEFAULT_PERIOD};
pub use queue::{event_queue, Consumer, Producer, QueueProbe, DEFAULT_CAPACITY};

use thiserror::Error;

/// Pipeline misconfiguration, reported before anything is armed
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("queue capacity {0} is not a power of two >= 2")]
    CapacityNotPowerOfTwo(usize),
    #[error("heartbeat period must be greater than zero")]
    ZeroHeartbeatPeriod,
}
