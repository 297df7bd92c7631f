//! Serial line capture from the pulse firmware
//!
//! A background thread reads the device's text output, stamps every
//! completed line with host time and keeps a `line,host_ns` transcript.
//! Pulse lines (`<us> us GPIO<n>`) are also pushed into the event queue so
//! they flow through the same debounce and heartbeat path as local input.
//! The firmware only reports pulse starts, so each pulse becomes an ASSERT
//! at the host stamp and a RELEASE one pulse width later.

use crate::clock::Clock;
use crate::pipeline::{Event, Identity, Producer, Timestamp};
use log::{debug, info, warn};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Longest line kept before it is cut and emitted
const MAX_LINE_LEN: usize = 1024;

/// Pulse width of the stock firmware schedule
pub const DEFAULT_PULSE_WIDTH: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial IO error: {0}")]
    Io(#[from] io::Error),
}

/// Open `port` at `baud_rate` with a read timeout so the reader can notice a stop request
pub fn open_port(
    port: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn serialport::SerialPort>, SerialError> {
    serialport::new(port, baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|source| SerialError::Open {
            port: port.to_string(),
            source,
        })
}

/// Splits a byte stream into lines, dropping trailing `\r` and spaces
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a line when `byte` completes one
    pub fn push_byte(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' || self.buf.len() >= MAX_LINE_LEN {
            while matches!(self.buf.last(), Some(b'\r') | Some(b' ')) {
                self.buf.pop();
            }
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            if byte != b'\n' {
                self.buf.push(byte);
            }
            return Some(line);
        }
        self.buf.push(byte);
        None
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// A parsed firmware output line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLine {
    /// `<device_us> us GPIO<pin>`
    Pulse { device_us: u64, pin: u8 },
    /// `Heartbeat. Dropped=<n>`
    Heartbeat { dropped: u64 },
    Other,
}

pub fn parse_device_line(line: &str) -> DeviceLine {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("Heartbeat.") {
        if let Some(count) = rest.trim().strip_prefix("Dropped=") {
            if let Ok(dropped) = count.trim().parse() {
                return DeviceLine::Heartbeat { dropped };
            }
        }
        return DeviceLine::Other;
    }

    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(ts), Some("us"), Some(gpio), None) => {
            let device_us = ts.parse().ok();
            let pin = gpio.strip_prefix("GPIO").and_then(|n| n.parse().ok());
            match (device_us, pin) {
                (Some(device_us), Some(pin)) => DeviceLine::Pulse { device_us, pin },
                _ => DeviceLine::Other,
            }
        }
        _ => DeviceLine::Other,
    }
}

/// Counters kept by the reader thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SerialStats {
    pub lines: u64,
    pub pulses: u64,
    /// Last drop count reported by the device's own heartbeat
    pub device_dropped: Option<u64>,
}

/// Line-stamping producer over any byte source
pub struct SerialReader<C: Clock> {
    clock: C,
    producer: Producer,
    transcript: Option<Box<dyn Write + Send>>,
    assembler: LineAssembler,
    stats: SerialStats,
    pulse_width: Duration,
}

impl<C: Clock> SerialReader<C> {
    pub fn new(clock: C, producer: Producer) -> Self {
        Self {
            clock,
            producer,
            transcript: None,
            assembler: LineAssembler::new(),
            stats: SerialStats::default(),
            pulse_width: DEFAULT_PULSE_WIDTH,
        }
    }

    /// How long the device holds a pin active after reporting it
    pub fn with_pulse_width(mut self, width: Duration) -> Self {
        self.pulse_width = width;
        self
    }

    /// Write a `device_line,host_ns` row for every line received
    pub fn with_transcript(
        mut self,
        mut writer: Box<dyn Write + Send>,
    ) -> Result<Self, SerialError> {
        writeln!(writer, "device_line,host_ns")?;
        self.transcript = Some(writer);
        Ok(self)
    }

    pub fn stats(&self) -> SerialStats {
        self.stats
    }

    /// Handle one complete line received at `host`
    pub fn handle_line(&mut self, line: &str, host: Timestamp) -> Result<(), SerialError> {
        self.stats.lines += 1;

        if let Some(transcript) = self.transcript.as_mut() {
            writeln!(transcript, "{},{}", line, host.as_nanos())?;
            transcript.flush()?;
        }
        debug!("[device] {} @ {} ns", line, host.as_nanos());

        match parse_device_line(line) {
            DeviceLine::Pulse { pin, .. } => {
                self.stats.pulses += 1;
                let identity = Identity::Pin(pin);
                self.producer.push(Event::assert(identity, host));
                self.producer
                    .push(Event::release(identity, host.saturating_add(self.pulse_width)));
            }
            DeviceLine::Heartbeat { dropped } => {
                if dropped > 0 && self.stats.device_dropped != Some(dropped) {
                    warn!("Device reports {} dropped events", dropped);
                }
                self.stats.device_dropped = Some(dropped);
            }
            DeviceLine::Other => {}
        }
        Ok(())
    }

    /// Read until `stop` is set or the source reaches end of file
    pub fn run<R: Read + ?Sized>(
        &mut self,
        source: &mut R,
        stop: &AtomicBool,
    ) -> Result<SerialStats, SerialError> {
        let mut buffer = [0u8; 256];

        while !stop.load(Ordering::Acquire) {
            let read = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            };

            for &byte in &buffer[..read] {
                if let Some(line) = self.assembler.push_byte(byte) {
                    let host = self.clock.now();
                    self.handle_line(&line, host)?;
                }
            }
        }

        if let Some(transcript) = self.transcript.as_mut() {
            transcript.flush()?;
        }
        info!(
            "Serial reader stopped after {} lines ({} pulses)",
            self.stats.lines, self.stats.pulses
        );
        Ok(self.stats)
    }
}

impl<C: Clock + 'static> SerialReader<C> {
    /// Move the reader onto its own thread, isolating blocking reads from the consumer loop
    pub fn spawn<R>(
        mut self,
        mut source: R,
        stop: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<Result<SerialStats, SerialError>>>
    where
        R: Read + Send + 'static,
    {
        thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || self.run(&mut source, &stop))
    }
}
