//! Raw evdev keyboard producer for Linux
//!
//! Reads key events straight from `/dev/input/event*`, so timestamps are
//! taken as close to the kernel as user space gets. Each opened device gets
//! its own index and events are pushed as `Identity::DeviceKey`, keeping
//! identical keys on different keyboards apart. Kernel auto-repeat (value 2)
//! is pushed as an ASSERT and left for the debounce filter to suppress.

use crate::clock::Clock;
use crate::pipeline::{Edge, Event, Identity, Producer};
use evdev::{Device, InputEventKind, Key};
use log::{debug, info, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Error type for evdev operations
#[derive(Debug, Error)]
pub enum EvdevError {
    #[error("no accessible keyboard devices (run with sudo or add the user to the 'input' group)")]
    NoDevices,
    #[error("no keyboard device matches filter '{0}'")]
    NoMatch(String),
    #[error("failed to configure {path}: {source}")]
    Configure {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Map an `EV_KEY` value to an edge: 0 release, 1 press, 2 auto-repeat
pub fn edge_for_value(value: i32) -> Option<Edge> {
    match value {
        0 => Some(Edge::Release),
        1 | 2 => Some(Edge::Assert),
        _ => None,
    }
}

/// A keyboard exposes the letter block and Enter
fn is_keyboard(device: &Device) -> bool {
    device.supported_keys().is_some_and(|keys| {
        keys.contains(Key::KEY_A) && keys.contains(Key::KEY_Z) && keys.contains(Key::KEY_ENTER)
    })
}

/// Filter on a substring of the device path or its reported name
fn matches_filter(path: &Path, name: Option<&str>, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(wanted) => {
            path.to_string_lossy().contains(wanted) || name.is_some_and(|n| n.contains(wanted))
        }
    }
}

fn set_nonblocking(path: &Path, device: &Device) -> Result<(), EvdevError> {
    let fd = device.as_raw_fd();
    let configure = |source| EvdevError::Configure {
        path: path.to_path_buf(),
        source,
    };
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(configure)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(configure)?;
    Ok(())
}

struct OpenDevice {
    index: u32,
    path: PathBuf,
    device: Device,
}

/// Evdev-based keyboard producer
pub struct EvdevListener<C: Clock> {
    devices: Vec<OpenDevice>,
    clock: C,
    producer: Producer,
}

impl<C: Clock> EvdevListener<C> {
    /// Open every accessible keyboard, optionally restricted by `filter`
    pub fn open(clock: C, producer: Producer, filter: Option<&str>) -> Result<Self, EvdevError> {
        let mut devices = Vec::new();
        let mut keyboards_seen = 0;

        for (path, device) in evdev::enumerate() {
            if !is_keyboard(&device) {
                continue;
            }
            keyboards_seen += 1;
            if !matches_filter(&path, device.name(), filter) {
                debug!("Skipping {} ({:?})", path.display(), device.name());
                continue;
            }
            set_nonblocking(&path, &device)?;
            info!(
                "Capturing dev{}: {} ({})",
                devices.len(),
                path.display(),
                device.name().unwrap_or("unnamed")
            );
            devices.push(OpenDevice {
                index: devices.len() as u32,
                path,
                device,
            });
        }

        if devices.is_empty() {
            return Err(match filter {
                Some(f) if keyboards_seen > 0 => EvdevError::NoMatch(f.to_string()),
                _ => EvdevError::NoDevices,
            });
        }

        Ok(Self {
            devices,
            clock,
            producer,
        })
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device_paths(&self) -> Vec<&Path> {
        self.devices.iter().map(|d| d.path.as_path()).collect()
    }

    /// Read whatever is pending on every device; returns edges pushed
    pub fn poll(&mut self) -> usize {
        let mut pushed = 0;

        for open in &mut self.devices {
            let events = match open.device.fetch_events() {
                Ok(events) => events,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    warn!("Read from {} failed: {}", open.path.display(), e);
                    continue;
                }
            };

            for event in events {
                let InputEventKind::Key(key) = event.kind() else {
                    continue;
                };
                let Some(edge) = edge_for_value(event.value()) else {
                    continue;
                };
                let identity = Identity::DeviceKey {
                    device: open.index,
                    code: key.code(),
                };
                if self.producer.push(Event::new(identity, edge, self.clock.now())) {
                    pushed += 1;
                }
            }
        }

        pushed
    }
}

impl<C: Clock + 'static> EvdevListener<C> {
    /// Poll on a background thread until `stop` is set, sleeping `idle` between empty reads
    pub fn spawn(mut self, idle: Duration, stop: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("evdev-reader".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    if self.poll() == 0 {
                        thread::sleep(idle);
                    }
                }
                debug!("Evdev reader stopped");
            })
    }
}

/// Get a status message about evdev availability
pub fn evdev_status() -> String {
    let count = evdev::enumerate().filter(|(_, d)| is_keyboard(d)).count();
    match count {
        0 => EvdevError::NoDevices.to_string(),
        n => format!("{} keyboard device(s) found", n),
    }
}
