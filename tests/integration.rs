//! Integration tests for Edge Latency
//!
//! These tests drive the full pipeline: producers pushing into the queue,
//! the capture loop draining it through the debounce filter, and the sinks
//! and heartbeat on the other side.

use edge_latency::actuator::{Actuator, LogDriver, PulseSchedule};
use edge_latency::clock::{Clock, ManualClock, MonotonicClock};
use edge_latency::config::Config;
use edge_latency::keyboard;
use edge_latency::pipeline::{
    event_queue, CaptureLoop, DebounceConfig, Edge, Event, Identity, KeyId, Producer, ReleaseMode,
    Timestamp,
};
use edge_latency::report::SessionReport;
use edge_latency::serial::SerialReader;
use edge_latency::sink::{CsvSink, MemorySink, TimeUnit};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const A: Identity = Identity::Pin(0);
const B: Identity = Identity::Pin(1);

fn ms(n: u64) -> Timestamp {
    Timestamp::from_millis(n)
}

fn pipeline(
    capacity: usize,
    window_ms: u64,
    mode: ReleaseMode,
) -> (Producer, CaptureLoop<ManualClock>, ManualClock, MemorySink) {
    let (producer, consumer) = event_queue(capacity).expect("valid capacity");
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let capture = CaptureLoop::new(
        consumer,
        DebounceConfig::from_millis(window_ms, mode),
        clock.clone(),
        Duration::from_millis(1000),
    )
    .expect("valid heartbeat")
    .with_sink(sink.clone());
    (producer, capture, clock, sink)
}

fn accepted(sink: &MemorySink) -> Vec<(Identity, Edge, Timestamp)> {
    sink.records()
        .iter()
        .map(|r| (r.identity, r.edge, r.timestamp))
        .collect()
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue + debounce
// ---------------------------------------------------------------------------

#[test]
fn bounce_inside_window_keeps_raw_events_but_accepts_first() {
    let (mut tx, capture, _clock, sink) = pipeline(4, 50, ReleaseMode::Symmetric);
    let raw = MemorySink::new();
    let mut capture = capture.with_raw_sink(raw.clone());

    assert!(tx.push(Event::assert(A, ms(100))));
    assert!(tx.push(Event::assert(A, ms(140))));

    assert_eq!(capture.poll_once().unwrap(), 2);
    assert_eq!(raw.records().len(), 2);
    assert_eq!(accepted(&sink), vec![(A, Edge::Assert, ms(100))]);

    let counts = capture.filter().counts();
    assert_eq!(counts.accepted, 1);
    assert_eq!(counts.repeat, 1);
}

#[test]
fn contact_bounce_collapses_to_one_press_and_one_release() {
    let (mut tx, mut capture, _clock, sink) = pipeline(16, 5, ReleaseMode::Symmetric);

    // Press with bounce, held, release with bounce
    for (edge, t) in [
        (Edge::Assert, 0),
        (Edge::Release, 1),
        (Edge::Assert, 2),
        (Edge::Release, 40),
        (Edge::Assert, 41),
        (Edge::Release, 43),
    ] {
        tx.push(Event::new(A, edge, ms(t)));
    }
    capture.poll_once().unwrap();

    assert_eq!(
        accepted(&sink),
        vec![(A, Edge::Assert, ms(0)), (A, Edge::Release, ms(40))]
    );
    assert!(!capture.filter().is_active(&A));
}

#[test]
fn identities_are_debounced_independently() {
    let (mut tx, mut capture, _clock, sink) = pipeline(16, 50, ReleaseMode::Symmetric);

    tx.push(Event::assert(A, ms(100)));
    tx.push(Event::assert(B, ms(101)));
    tx.push(Event::release(A, ms(120)));
    tx.push(Event::release(B, ms(160)));
    capture.poll_once().unwrap();

    assert_eq!(
        accepted(&sink),
        vec![
            (A, Edge::Assert, ms(100)),
            (B, Edge::Assert, ms(101)),
            (B, Edge::Release, ms(160)),
        ]
    );
    assert!(capture.filter().is_active(&A));
    assert!(!capture.filter().is_active(&B));
    assert_eq!(capture.summary().identities, 2);
}

#[test]
fn assert_only_mode_accepts_presses_after_the_window() {
    let (mut tx, mut capture, _clock, sink) = pipeline(16, 50, ReleaseMode::AssertOnly);

    tx.push(Event::assert(A, ms(100)));
    tx.push(Event::release(A, ms(110)));
    tx.push(Event::assert(A, ms(120)));
    tx.push(Event::release(A, ms(130)));
    tx.push(Event::assert(A, ms(160)));
    capture.poll_once().unwrap();

    assert_eq!(
        accepted(&sink),
        vec![(A, Edge::Assert, ms(100)), (A, Edge::Assert, ms(160))]
    );
    let counts = capture.filter().counts();
    assert_eq!(counts.absorbed, 2);
    assert_eq!(counts.chatter, 1);
}

#[test]
fn zero_window_accepts_every_valid_transition() {
    let (mut tx, mut capture, _clock, sink) = pipeline(16, 0, ReleaseMode::Symmetric);

    tx.push(Event::assert(A, ms(0)));
    tx.push(Event::release(A, ms(0)));
    tx.push(Event::assert(A, ms(0)));
    tx.push(Event::release(A, ms(0)));
    tx.push(Event::release(A, ms(0)));
    capture.poll_once().unwrap();

    assert_eq!(sink.records().len(), 4);
    assert_eq!(capture.filter().counts().not_active, 1);
}

#[test]
fn unseen_key_identity_starts_released() {
    let (mut tx, mut capture, _clock, sink) = pipeline(8, 5, ReleaseMode::Symmetric);
    let key = Identity::Key(KeyId::extended(0x1d));

    tx.push(Event::release(key, ms(500)));
    tx.push(Event::assert(key, ms(501)));
    capture.poll_once().unwrap();

    assert_eq!(accepted(&sink), vec![(key, Edge::Assert, ms(501))]);
}

// ---------------------------------------------------------------------------
// Drops + heartbeat
// ---------------------------------------------------------------------------

#[test]
fn overflow_is_counted_and_reported_on_heartbeat() {
    let (mut tx, mut capture, clock, sink) = pipeline(4, 0, ReleaseMode::AssertOnly);

    let pushed: Vec<bool> = (0..6)
        .map(|i| tx.push(Event::assert(Identity::Pin(i), ms(i as u64))))
        .collect();
    assert_eq!(pushed, vec![true, true, true, false, false, false]);

    clock.set(ms(999));
    capture.poll_once().unwrap();
    assert!(sink.heartbeats().is_empty());
    assert_eq!(sink.records().len(), 3);

    clock.set(ms(1000));
    capture.poll_once().unwrap();
    let beats = sink.heartbeats();
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].dropped, 3);
    assert_eq!(beats[0].active, vec![Identity::Pin(0), Identity::Pin(1), Identity::Pin(2)]);
}

#[test]
fn heartbeat_schedule_does_not_drift_with_loop_jitter() {
    let (_tx, mut capture, clock, sink) = pipeline(4, 0, ReleaseMode::Symmetric);

    for t in [1003, 1500, 2001, 2999, 3000, 3997] {
        clock.set(ms(t));
        capture.poll_once().unwrap();
    }

    let at: Vec<Timestamp> = sink.heartbeats().iter().map(|b| b.at).collect();
    assert_eq!(at, vec![ms(1003), ms(2001), ms(3000)]);
    assert_eq!(capture.heartbeat().next_due(), ms(4000));
}

#[test]
fn heartbeat_fires_without_any_traffic() {
    let (_tx, mut capture, clock, sink) = pipeline(4, 5, ReleaseMode::Symmetric);

    for second in 1..=5 {
        clock.set(ms(second * 1000));
        assert_eq!(capture.poll_once().unwrap(), 0);
    }

    let beats = sink.heartbeats();
    assert_eq!(beats.len(), 5);
    assert_eq!(beats.last().map(|b| b.sequence), Some(5));
    assert!(beats.iter().all(|b| b.dropped == 0 && b.queued == 0));
}

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

#[test]
fn producer_thread_and_capture_loop_account_for_every_event() {
    const TOTAL: u64 = 50_000;
    let (mut tx, consumer) = event_queue(64).unwrap();
    let clock = MonotonicClock::new();
    let sink = MemorySink::new();
    let mut capture = CaptureLoop::new(
        consumer,
        DebounceConfig::from_millis(0, ReleaseMode::Symmetric),
        clock,
        Duration::from_secs(60),
    )
    .unwrap()
    .with_sink(sink.clone())
    .with_idle_sleep(Duration::ZERO);

    let stop = Arc::new(AtomicBool::new(false));
    let producer = {
        let stop = stop.clone();
        thread::spawn(move || {
            for i in 0..TOTAL {
                let edge = if i % 2 == 0 { Edge::Assert } else { Edge::Release };
                tx.push(Event::new(Identity::Pin((i / 2 % 8) as u8), edge, clock.now()));
            }
            stop.store(true, Ordering::Release);
            tx.dropped()
        })
    };

    let summary = capture.run(&stop).unwrap();
    let dropped = producer.join().unwrap();

    assert_eq!(summary.dropped, dropped);
    assert_eq!(summary.raw_events + summary.dropped, TOTAL);
    assert_eq!(
        summary.filter.accepted + summary.filter.suppressed(),
        summary.raw_events
    );
    assert_eq!(sink.records().len() as u64, summary.filter.accepted);
    assert_eq!(sink.flushes(), 1);
}

#[test]
fn actuator_pulses_flow_through_capture() {
    let (mut tx, mut capture, clock, sink) = pipeline(16, 5, ReleaseMode::Symmetric);
    let schedule = PulseSchedule::new(
        vec![0, 1, 2],
        Duration::from_millis(150),
        Duration::from_millis(50),
        true,
    )
    .unwrap();
    let mut actuator = Actuator::new(LogDriver, schedule, clock.now()).unwrap();

    for t in 0..=1000 {
        clock.set(ms(t));
        actuator.tick(clock.now(), &mut tx).unwrap();
        capture.poll_once().unwrap();
    }

    assert_eq!(actuator.pulses(), 6);
    let records = accepted(&sink);
    assert_eq!(records.len(), 12);
    assert_eq!(records[0], (Identity::Pin(0), Edge::Assert, ms(150)));
    assert_eq!(records[1], (Identity::Pin(0), Edge::Release, ms(200)));
    assert_eq!(records[2], (Identity::Pin(1), Edge::Assert, ms(300)));
    assert_eq!(records[6], (Identity::Pin(0), Edge::Assert, ms(600)));
    assert_eq!(sink.heartbeats().len(), 1);
    assert_eq!(capture.summary().dropped, 0);
}

#[test]
fn serial_pulse_lines_flow_through_capture() {
    let (tx, mut capture, clock, sink) = pipeline(16, 5, ReleaseMode::Symmetric);
    let transcript = SharedBuf::default();
    let mut reader = SerialReader::new(clock, tx)
        .with_transcript(Box::new(transcript.clone()))
        .unwrap();

    let lines = [
        ("Pico multi-GPIO actuator started.", 0),
        ("150000 us GPIO0", 150),
        ("300000 us GPIO1", 300),
        ("450000 us GPIO0", 450),
        ("Heartbeat. Dropped=0", 1000),
    ];
    for (line, at) in lines {
        reader.handle_line(line, ms(at)).unwrap();
    }
    capture.poll_once().unwrap();

    assert_eq!(
        accepted(&sink),
        vec![
            (Identity::Pin(0), Edge::Assert, ms(150)),
            (Identity::Pin(0), Edge::Release, ms(200)),
            (Identity::Pin(1), Edge::Assert, ms(300)),
            (Identity::Pin(1), Edge::Release, ms(350)),
            (Identity::Pin(0), Edge::Assert, ms(450)),
            (Identity::Pin(0), Edge::Release, ms(500)),
        ]
    );
    assert_eq!(reader.stats().pulses, 3);
    assert_eq!(reader.stats().device_dropped, Some(0));
    assert!(transcript.text().contains("300000 us GPIO1,300000000"));
}

#[test]
fn serial_pulses_on_a_single_pin_are_all_accepted() {
    let (tx, mut capture, clock, sink) = pipeline(16, 5, ReleaseMode::Symmetric);
    let mut reader = SerialReader::new(clock, tx).with_pulse_width(Duration::from_millis(50));

    for at in [150, 300, 450] {
        reader.handle_line(&format!("{} us GPIO0", at * 1000), ms(at)).unwrap();
    }
    capture.poll_once().unwrap();

    let presses: Vec<Timestamp> = sink
        .records()
        .iter()
        .filter(|r| r.edge == Edge::Assert)
        .map(|r| r.timestamp)
        .collect();
    assert_eq!(presses, vec![ms(150), ms(300), ms(450)]);
    assert_eq!(sink.records().len(), 6);

    let counts = capture.filter().counts();
    assert_eq!(counts.accepted, 6);
    assert_eq!(counts.suppressed(), 0);
}

// ---------------------------------------------------------------------------
// Config, sinks and report
// ---------------------------------------------------------------------------

#[test]
fn config_drives_the_pipeline_and_csv_output() {
    let config: Config = toml::from_str(
        r#"
[queue]
capacity = 8

[debounce]
settle_window_ms = 20
release_mode = "assert_only"

[capture]
idle_sleep_us = 0
timestamp_unit = "micros"
output = "unused.csv"
"#,
    )
    .unwrap();
    config.validate().unwrap();

    let (mut tx, consumer) = event_queue(config.queue.capacity).unwrap();
    let clock = ManualClock::new();
    let csv = SharedBuf::default();
    let mut capture = CaptureLoop::new(
        consumer,
        config.debounce_config(),
        clock,
        config.heartbeat_period(),
    )
    .unwrap()
    .with_sink(CsvSink::new(csv.clone(), config.capture.timestamp_unit).unwrap())
    .with_labeler(keyboard::label_for);

    let a_key = Identity::Key(KeyId::new(30));
    tx.push(Event::assert(a_key, ms(1)));
    tx.push(Event::release(a_key, ms(5)));
    tx.push(Event::assert(a_key, ms(10)));
    tx.push(Event::assert(Identity::Pin(7), ms(12)));
    let summary = capture.finish().unwrap();

    assert_eq!(config.capture.timestamp_unit, TimeUnit::Micros);
    assert_eq!(
        csv.text(),
        "identity,edge,timestamp_us,label\nkey:0x1e,assert,1000,A\nGPIO7,assert,12000,\n"
    );

    let report = SessionReport::new(Instant::now(), "keys", &config, &summary, None);
    assert_eq!(report.summary.accepted, 2);
    assert_eq!(report.summary.filter.chatter, 1);
    assert_eq!(report.settings.release_mode, ReleaseMode::AssertOnly);
}

#[test]
fn invalid_config_is_rejected_before_capture() {
    let mut config = Config::default();
    config.queue.capacity = 12;
    assert!(config.validate().is_err());
    assert!(event_queue(config.queue.capacity).is_err());

    let mut config = Config::default();
    config.pulse.pins.clear();
    assert!(config.validate().is_err());
}
