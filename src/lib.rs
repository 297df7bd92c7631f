//! Edge Latency - timestamped input capture for latency measurement
//!
//! A bounded single-producer/single-consumer queue decouples a producer that
//! must never block (interrupt, input callback, scheduled pulse) from a
//! polling consumer that debounces, logs and emits periodic heartbeats.

pub mod actuator;
pub mod clock;
pub mod config;
pub mod keyboard;
pub mod pipeline;
pub mod report;
pub mod serial;
pub mod sink;

pub use config::Config;
