//! Edge Latency - timestamped input edge capture
//!
//! Captures keyboard or GPIO edges, debounces them and writes accepted
//! events to CSV while a heartbeat reports drops and held inputs.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use edge_latency::{
    actuator::{Actuator, LogDriver},
    clock::{Clock, MonotonicClock},
    config::{Config, KeyboardBackend},
    keyboard::{self, PollingListener, DEFAULT_POLL_INTERVAL},
    pipeline::{event_queue, CaptureLoop, CaptureSummary, Consumer, Producer, ReleaseMode},
    report::SessionReport,
    serial::{self, SerialReader, SerialStats},
    sink::{CsvSink, LogSink},
};

#[cfg(target_os = "linux")]
use edge_latency::keyboard::{evdev_status, EvdevListener};

#[derive(Parser, Debug)]
#[command(name = "edge-latency", version, about = "Timestamped input edge capture")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the debounce settle window in milliseconds
    #[arg(long, global = true)]
    window_ms: Option<u64>,

    /// Override the release handling mode
    #[arg(long, global = true, value_enum)]
    release_mode: Option<ReleaseModeArg>,

    /// Also write every raw event before filtering
    #[arg(long, global = true)]
    raw: bool,

    /// Write a JSON session report here on exit
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture local keyboard edges
    Keys {
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
        /// Only capture devices whose path or name contains this
        #[arg(long)]
        device: Option<String>,
        /// CSV output for accepted events
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Capture pulse lines from the actuator firmware over serial
    Serial {
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short, long)]
        baud: Option<u32>,
        /// Transcript of every received line
        #[arg(short, long)]
        transcript: Option<PathBuf>,
        /// CSV output for accepted pin edges
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the pulse schedule against a simulated driver
    Pulse {
        /// Stop after this many pulses
        #[arg(long)]
        count: Option<u64>,
        /// CSV output for accepted pin edges
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReleaseModeArg {
    Symmetric,
    AssertOnly,
}

impl From<ReleaseModeArg> for ReleaseMode {
    fn from(arg: ReleaseModeArg) -> Self {
        match arg {
            ReleaseModeArg::Symmetric => ReleaseMode::Symmetric,
            ReleaseModeArg::AssertOnly => ReleaseMode::AssertOnly,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Auto,
    Evdev,
    Poll,
}

impl From<BackendArg> for KeyboardBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => KeyboardBackend::Auto,
            BackendArg::Evdev => KeyboardBackend::Evdev,
            BackendArg::Poll => KeyboardBackend::Poll,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    config.validate().context("invalid configuration")?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Release))
            .context("failed to install Ctrl-C handler")?;
    }

    let started = Instant::now();
    let clock = MonotonicClock::new();
    let (producer, consumer) = event_queue(config.queue.capacity)?;
    let capture = build_capture(consumer, &config, clock)?;

    let (mode, summary, serial_stats) = match cli.command {
        Command::Keys { .. } => ("keys", run_keys(&config, clock, producer, capture, &stop)?, None),
        Command::Serial { .. } => {
            let (summary, stats) = run_serial(&config, clock, producer, capture, &stop)?;
            ("serial", summary, Some(stats))
        }
        Command::Pulse { count, .. } => (
            "pulse",
            run_pulse(&config, clock, producer, capture, &stop, count)?,
            None,
        ),
    };

    println!("\nEdge Latency session complete.");
    println!(
        "Raw events: {}  accepted: {}  suppressed: {}  dropped: {}",
        summary.raw_events,
        summary.filter.accepted,
        summary.filter.suppressed(),
        summary.dropped
    );
    println!("Session duration: {:.1}s", started.elapsed().as_secs_f64());

    if let Some(path) = cli.report.as_deref() {
        let report = SessionReport::new(started, mode, &config, &summary, serial_stats.as_ref());
        report
            .export_json(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    Ok(config)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(window) = cli.window_ms {
        config.debounce.settle_window_ms = window;
    }
    if let Some(mode) = cli.release_mode {
        config.debounce.release_mode = mode.into();
    }
    if cli.raw {
        config.debounce.raw_tap = true;
    }

    match &cli.command {
        Command::Keys {
            backend,
            device,
            output,
        } => {
            if let Some(backend) = backend {
                config.keyboard.backend = (*backend).into();
            }
            if device.is_some() {
                config.keyboard.device_filter = device.clone();
            }
            if let Some(output) = output {
                config.capture.output = output.clone();
            }
        }
        Command::Serial {
            port,
            baud,
            transcript,
            output,
        } => {
            if let Some(port) = port {
                config.serial.port = port.clone();
            }
            if let Some(baud) = baud {
                config.serial.baud_rate = *baud;
            }
            if let Some(transcript) = transcript {
                config.serial.output = transcript.clone();
            }
            if let Some(output) = output {
                config.capture.output = output.clone();
            }
        }
        Command::Pulse { output, .. } => {
            if let Some(output) = output {
                config.capture.output = output.clone();
            }
        }
    }
}

/// `keyboard_log.csv` -> `keyboard_log.raw.csv`
fn raw_output_path(output: &Path) -> PathBuf {
    output.with_extension("raw.csv")
}

fn build_capture(
    consumer: Consumer,
    config: &Config,
    clock: MonotonicClock,
) -> Result<CaptureLoop<MonotonicClock>> {
    let output = &config.capture.output;
    let csv = CsvSink::create(output, config.capture.timestamp_unit)
        .with_context(|| format!("failed to create {}", output.display()))?;
    info!("Writing accepted events to {}", output.display());

    let mut capture = CaptureLoop::new(
        consumer,
        config.debounce_config(),
        clock,
        config.heartbeat_period(),
    )?
    .with_sink(csv)
    .with_sink(LogSink)
    .with_labeler(keyboard::label_for)
    .with_idle_sleep(config.idle_sleep());

    if config.debounce.raw_tap {
        let raw_path = raw_output_path(output);
        let raw = CsvSink::create(&raw_path, config.capture.timestamp_unit)
            .with_context(|| format!("failed to create {}", raw_path.display()))?;
        info!("Writing raw events to {}", raw_path.display());
        capture = capture.with_raw_sink(raw);
    }

    Ok(capture)
}

fn run_keys(
    config: &Config,
    clock: MonotonicClock,
    producer: Producer,
    mut capture: CaptureLoop<MonotonicClock>,
    stop: &Arc<AtomicBool>,
) -> Result<CaptureSummary> {
    let handle = spawn_keyboard(config, clock, producer, stop.clone())?;
    info!("Capturing keys, press Ctrl-C to stop");

    let summary = capture.run(stop)?;
    stop.store(true, Ordering::Release);
    handle
        .join()
        .map_err(|_| anyhow!("keyboard thread panicked"))?;
    Ok(summary)
}

#[cfg(target_os = "linux")]
fn spawn_keyboard(
    config: &Config,
    clock: MonotonicClock,
    producer: Producer,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let filter = config.keyboard.device_filter.as_deref();
    match config.keyboard.backend {
        KeyboardBackend::Poll => {}
        KeyboardBackend::Evdev => {
            let listener = EvdevListener::open(clock, producer, filter)?;
            return Ok(listener.spawn(config.idle_sleep(), stop)?);
        }
        KeyboardBackend::Auto => {
            info!("Evdev: {}", evdev_status());
            // `open` consumes the producer; probe with a throwaway queue first
            if evdev_available(filter) {
                let listener = EvdevListener::open(clock, producer, filter)?;
                return Ok(listener.spawn(config.idle_sleep(), stop)?);
            }
            warn!("Evdev unavailable, falling back to polling");
        }
    }
    Ok(PollingListener::spawn(clock, producer, DEFAULT_POLL_INTERVAL, stop)?)
}

#[cfg(target_os = "linux")]
fn evdev_available(filter: Option<&str>) -> bool {
    let (probe, _consumer) = match event_queue(2) {
        Ok(pair) => pair,
        Err(_) => return false,
    };
    EvdevListener::open(MonotonicClock::new(), probe, filter).is_ok()
}

#[cfg(not(target_os = "linux"))]
fn spawn_keyboard(
    config: &Config,
    clock: MonotonicClock,
    producer: Producer,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    if config.keyboard.backend == KeyboardBackend::Evdev {
        warn!("Evdev is only available on Linux, using polling");
    }
    Ok(PollingListener::spawn(clock, producer, DEFAULT_POLL_INTERVAL, stop)?)
}

fn run_serial(
    config: &Config,
    clock: MonotonicClock,
    producer: Producer,
    mut capture: CaptureLoop<MonotonicClock>,
    stop: &Arc<AtomicBool>,
) -> Result<(CaptureSummary, SerialStats)> {
    let settings = &config.serial;
    let port = serial::open_port(
        &settings.port,
        settings.baud_rate,
        Duration::from_millis(settings.read_timeout_ms),
    )?;
    info!("Opened {} at {} baud", settings.port, settings.baud_rate);

    let transcript = File::create(&settings.output)
        .with_context(|| format!("failed to create {}", settings.output.display()))?;
    let reader = SerialReader::new(clock, producer)
        .with_pulse_width(Duration::from_millis(config.pulse.duration_ms))
        .with_transcript(Box::new(BufWriter::new(transcript)))?;
    let handle = reader.spawn(port, stop.clone())?;
    info!("Logging serial lines to {}, press Ctrl-C to stop", settings.output.display());

    while !stop.load(Ordering::Acquire) && !handle.is_finished() {
        if capture.poll_once()? == 0 {
            thread::sleep(config.idle_sleep());
        }
    }
    stop.store(true, Ordering::Release);

    let stats = handle
        .join()
        .map_err(|_| anyhow!("serial reader thread panicked"))??;
    let summary = capture.finish()?;
    Ok((summary, stats))
}

fn run_pulse(
    config: &Config,
    clock: MonotonicClock,
    mut producer: Producer,
    mut capture: CaptureLoop<MonotonicClock>,
    stop: &AtomicBool,
    count: Option<u64>,
) -> Result<CaptureSummary> {
    let schedule = config.pulse.schedule()?;
    info!(
        "Pulsing {} pins every {:?} for {:?}",
        schedule.pins().len(),
        schedule.interval(),
        schedule.duration()
    );
    let mut actuator = Actuator::new(LogDriver, schedule, clock.now())?;

    while !stop.load(Ordering::Acquire) {
        let edges = actuator.tick(clock.now(), &mut producer)?;
        let drained = capture.poll_once()?;

        if count.is_some_and(|n| actuator.pulses() >= n) && actuator.active_pin().is_none() {
            break;
        }
        if edges == 0 && drained == 0 {
            thread::sleep(config.idle_sleep());
        }
    }

    Ok(capture.finish()?)
}
