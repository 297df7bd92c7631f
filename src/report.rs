//! Session report and export functionality

use crate::config::Config;
use crate::pipeline::{CaptureSummary, FilterCounts, ReleaseMode};
use crate::serial::SerialStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// Complete session report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    /// Report metadata
    pub metadata: ReportMetadata,
    /// Settings the session ran with
    pub settings: SessionSettings,
    /// Summary statistics
    pub summary: SessionSummary,
    /// Present only for serial sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<SerialSummary>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub generated_at: String,
    /// Application version
    pub version: String,
    /// Session duration in seconds
    pub duration_secs: f64,
    /// `keys`, `serial` or `pulse`
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    pub queue_capacity: usize,
    pub settle_window_ms: u64,
    pub release_mode: ReleaseMode,
    pub heartbeat_period_ms: u64,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            queue_capacity: config.queue.capacity,
            settle_window_ms: config.debounce.settle_window_ms,
            release_mode: config.debounce.release_mode,
            heartbeat_period_ms: config.heartbeat.period_ms,
        }
    }
}

/// Session summary statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Events taken off the queue
    pub raw_events: u64,
    /// Events that reached the sinks
    pub accepted: u64,
    pub suppressed: u64,
    /// Suppressions by reason
    pub filter: FilterCounts,
    /// Events lost to a full queue
    pub dropped: u64,
    pub heartbeats: u64,
    /// Distinct identities seen
    pub identities: usize,
    /// Accepted fraction of raw events, if any arrived
    pub acceptance_ratio: Option<f64>,
}

impl From<&CaptureSummary> for SessionSummary {
    fn from(summary: &CaptureSummary) -> Self {
        let acceptance_ratio = match summary.raw_events {
            0 => None,
            raw => Some(summary.filter.accepted as f64 / raw as f64),
        };
        Self {
            raw_events: summary.raw_events,
            accepted: summary.filter.accepted,
            suppressed: summary.filter.suppressed(),
            filter: summary.filter,
            dropped: summary.dropped,
            heartbeats: summary.heartbeats,
            identities: summary.identities,
            acceptance_ratio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSummary {
    pub lines: u64,
    pub pulses: u64,
    /// Drop count the device last reported about itself
    pub device_dropped: Option<u64>,
}

impl From<&SerialStats> for SerialSummary {
    fn from(stats: &SerialStats) -> Self {
        Self {
            lines: stats.lines,
            pulses: stats.pulses,
            device_dropped: stats.device_dropped,
        }
    }
}

impl SessionReport {
    /// Create a new session report
    pub fn new(
        start_time: Instant,
        mode: &str,
        config: &Config,
        capture: &CaptureSummary,
        serial: Option<&SerialStats>,
    ) -> Self {
        let duration_secs = start_time.elapsed().as_secs_f64();
        let now: DateTime<Utc> = Utc::now();

        Self {
            metadata: ReportMetadata {
                generated_at: now.to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                duration_secs,
                mode: mode.to_string(),
            },
            settings: SessionSettings::from(config),
            summary: SessionSummary::from(capture),
            serial: serial.map(SerialSummary::from),
        }
    }

    /// Export report to JSON file
    pub fn export_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Export report to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
