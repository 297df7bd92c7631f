//! Output sinks for accepted records and heartbeats
//!
//! Sinks sit at the end of the pipeline. They give no acknowledgement or
//! backpressure; a slow sink just slows the consumer loop, and the queue
//! absorbs (or drops) what the producer pushes meanwhile.

use crate::pipeline::{Edge, Event, HeartbeatSnapshot, Identity, Timestamp};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Sink failures, propagated out of the capture loop
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink IO error: {0}")]
    Io(#[from] io::Error),
    #[error("sink state poisoned")]
    Poisoned,
}

/// One accepted transition as handed to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub identity: Identity,
    pub edge: Edge,
    pub timestamp: Timestamp,
    pub label: Option<&'static str>,
}

impl Record {
    pub fn from_event(event: &Event, label: Option<&'static str>) -> Self {
        Self {
            identity: event.identity,
            edge: event.edge,
            timestamp: event.timestamp,
            label,
        }
    }
}

/// Consumer of the pipeline's output stream
pub trait EventSink {
    fn record(&mut self, record: &Record) -> Result<(), SinkError>;

    fn heartbeat(&mut self, _snapshot: &HeartbeatSnapshot) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn record(&mut self, record: &Record) -> Result<(), SinkError> {
        (**self).record(record)
    }

    fn heartbeat(&mut self, snapshot: &HeartbeatSnapshot) -> Result<(), SinkError> {
        (**self).heartbeat(snapshot)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Unit used for the timestamp column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Micros,
    #[default]
    Nanos,
}

impl TimeUnit {
    pub fn convert(&self, ts: Timestamp) -> u64 {
        match self {
            TimeUnit::Micros => ts.as_micros(),
            TimeUnit::Nanos => ts.as_nanos(),
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Micros => "us",
            TimeUnit::Nanos => "ns",
        }
    }
}

/// CSV writer, one row per record, flushed per row
pub struct CsvSink<W: Write> {
    writer: W,
    unit: TimeUnit,
}

impl CsvSink<BufWriter<File>> {
    pub fn create(path: &Path, unit: TimeUnit) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), unit)
    }
}

impl<W: Write> CsvSink<W> {
    /// Wrap `writer` and emit the header line
    pub fn new(mut writer: W, unit: TimeUnit) -> Result<Self, SinkError> {
        writeln!(writer, "identity,edge,timestamp_{},label", unit.suffix())?;
        Ok(Self { writer, unit })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for CsvSink<W> {
    fn record(&mut self, record: &Record) -> Result<(), SinkError> {
        writeln!(
            self.writer,
            "{},{},{},{}",
            record.identity,
            record.edge,
            self.unit.convert(record.timestamp),
            record.label.unwrap_or("")
        )?;
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes records and heartbeats through the `log` facade
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&mut self, record: &Record) -> Result<(), SinkError> {
        match record.label {
            Some(label) => info!(
                "{} us {} {} ({})",
                record.timestamp.as_micros(),
                record.identity,
                record.edge,
                label
            ),
            None => info!(
                "{} us {} {}",
                record.timestamp.as_micros(),
                record.identity,
                record.edge
            ),
        }
        Ok(())
    }

    fn heartbeat(&mut self, snapshot: &HeartbeatSnapshot) -> Result<(), SinkError> {
        info!(
            "Heartbeat. Dropped={} queued={} active={}",
            snapshot.dropped,
            snapshot.queued,
            snapshot.active.len()
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryLog {
    records: Vec<Record>,
    heartbeats: Vec<HeartbeatSnapshot>,
    flushes: usize,
}

/// In-memory sink; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryLog>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clone()
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .heartbeats
            .clone()
    }

    pub fn flushes(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flushes
    }
}

impl EventSink for MemorySink {
    fn record(&mut self, record: &Record) -> Result<(), SinkError> {
        let mut log = self.inner.lock().map_err(|_| SinkError::Poisoned)?;
        log.records.push(*record);
        Ok(())
    }

    fn heartbeat(&mut self, snapshot: &HeartbeatSnapshot) -> Result<(), SinkError> {
        let mut log = self.inner.lock().map_err(|_| SinkError::Poisoned)?;
        log.heartbeats.push(snapshot.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let mut log = self.inner.lock().map_err(|_| SinkError::Poisoned)?;
        log.flushes += 1;
        Ok(())
    }
}
