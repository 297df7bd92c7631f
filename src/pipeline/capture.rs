//! Consumer side of the pipeline
//!
//! [`CaptureLoop`] drains the queue, runs every raw event through the
//! debounce filter, forwards accepted records to the sinks and emits a
//! heartbeat whenever one is due. It never blocks on the queue.

use super::{
    Consumer, DebounceConfig, DebounceFilter, Event, FilterCounts, Heartbeat, HeartbeatSnapshot,
    Identity, PipelineError,
};
use crate::clock::Clock;
use crate::sink::{EventSink, Record, SinkError};
use log::{debug, info};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Resolves a human-readable label for an identity
pub type Labeler = fn(&Identity) -> Option<&'static str>;

pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_micros(200);

/// Totals for a capture session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    pub raw_events: u64,
    pub filter: FilterCounts,
    pub dropped: u64,
    pub heartbeats: u64,
    pub identities: usize,
}

type BoxedSink = Box<dyn EventSink + Send>;

/// Polling consumer: queue → debounce filter → sinks, plus heartbeat
pub struct CaptureLoop<C: Clock> {
    consumer: Consumer,
    filter: DebounceFilter,
    heartbeat: Heartbeat,
    clock: C,
    sinks: Vec<BoxedSink>,
    raw_sink: Option<BoxedSink>,
    labeler: Option<Labeler>,
    idle_sleep: Duration,
    raw_events: u64,
}

impl<C: Clock> CaptureLoop<C> {
    /// The first heartbeat is due one period after construction
    pub fn new(
        consumer: Consumer,
        debounce: DebounceConfig,
        clock: C,
        heartbeat_period: Duration,
    ) -> Result<Self, PipelineError> {
        let heartbeat = Heartbeat::new(clock.now(), heartbeat_period)?;
        Ok(Self {
            consumer,
            filter: DebounceFilter::new(debounce),
            heartbeat,
            clock,
            sinks: Vec::new(),
            raw_sink: None,
            labeler: None,
            idle_sleep: DEFAULT_IDLE_SLEEP,
            raw_events: 0,
        })
    }

    pub fn with_sink(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Receive every raw event, accepted or not
    pub fn with_raw_sink(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.raw_sink = Some(Box::new(sink));
        self
    }

    pub fn with_labeler(mut self, labeler: Labeler) -> Self {
        self.labeler = Some(labeler);
        self
    }

    /// Pause between empty polls; zero spins
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn filter(&self) -> &DebounceFilter {
        &self.filter
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Drain everything queued, then run the heartbeat check once.
    ///
    /// Returns the number of raw events drained.
    pub fn poll_once(&mut self) -> Result<usize, SinkError> {
        let drained = self.drain()?;

        let now = self.clock.now();
        if self.heartbeat.poll(now) {
            let mut active: Vec<Identity> = self.filter.active().collect();
            active.sort_unstable();
            let snapshot = HeartbeatSnapshot {
                at: now,
                sequence: self.heartbeat.fired(),
                dropped: self.consumer.dropped(),
                queued: self.consumer.len(),
                active,
            };
            for sink in &mut self.sinks {
                sink.heartbeat(&snapshot)?;
            }
        }

        Ok(drained)
    }

    /// Poll until `stop` is set, then drain once more and flush the sinks
    pub fn run(&mut self, stop: &AtomicBool) -> Result<CaptureSummary, SinkError> {
        info!(
            "Capture loop started (window={:?}, mode={:?}, capacity={})",
            self.filter.config().window,
            self.filter.config().release_mode,
            self.consumer.capacity()
        );

        while !stop.load(Ordering::Acquire) {
            if self.poll_once()? == 0 {
                if self.idle_sleep.is_zero() {
                    std::hint::spin_loop();
                } else {
                    thread::sleep(self.idle_sleep);
                }
            }
        }

        self.finish()
    }

    /// Final drain and flush; safe to call more than once
    pub fn finish(&mut self) -> Result<CaptureSummary, SinkError> {
        let drained = self.drain()?;
        debug!("Final drain handled {} events", drained);

        for sink in &mut self.sinks {
            sink.flush()?;
        }
        if let Some(raw) = self.raw_sink.as_mut() {
            raw.flush()?;
        }

        let summary = self.summary();
        info!(
            "Capture finished: raw={} accepted={} suppressed={} dropped={}",
            summary.raw_events,
            summary.filter.accepted,
            summary.filter.suppressed(),
            summary.dropped
        );
        Ok(summary)
    }

    pub fn summary(&self) -> CaptureSummary {
        CaptureSummary {
            raw_events: self.raw_events,
            filter: self.filter.counts(),
            dropped: self.consumer.dropped(),
            heartbeats: self.heartbeat.fired(),
            identities: self.filter.tracked(),
        }
    }

    fn drain(&mut self) -> Result<usize, SinkError> {
        let mut drained = 0;
        while let Some(event) = self.consumer.pop() {
            drained += 1;
            self.handle(&event)?;
        }
        Ok(drained)
    }

    fn handle(&mut self, event: &Event) -> Result<(), SinkError> {
        self.raw_events += 1;
        let label = self.labeler.and_then(|resolve| resolve(&event.identity));

        if let Some(raw) = self.raw_sink.as_mut() {
            raw.record(&Record::from_event(event, label))?;
        }

        let decision = self.filter.process(event);
        if !decision.is_accepted() {
            debug!("{} {} suppressed: {:?}", event.identity, event.edge, decision);
            return Ok(());
        }

        let record = Record::from_event(event, label);
        for sink in &mut self.sinks {
            sink.record(&record)?;
        }
        Ok(())
    }
}
