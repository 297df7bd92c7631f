//! Portable keyboard producer built on `device_query`
//!
//! Polls the global key state and pushes the difference between two polls
//! as ASSERT/RELEASE edges. Resolution is bounded by the poll interval, so
//! this is the fallback when raw device access is unavailable.

use super::keymap;
use crate::clock::Clock;
use crate::pipeline::{Edge, Event, Identity, KeyId, Producer};
use device_query::{DeviceQuery, DeviceState, Keycode};
use log::{debug, info};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Keyboard listener that polls for key state changes
pub struct PollingListener<C: Clock> {
    device_state: DeviceState,
    last_keys: Vec<Keycode>,
    clock: C,
    producer: Producer,
}

impl<C: Clock> PollingListener<C> {
    pub fn new(clock: C, producer: Producer) -> Self {
        Self {
            device_state: DeviceState::new(),
            last_keys: Vec::new(),
            clock,
            producer,
        }
    }

    /// Poll once and push any changes; returns the number of edges pushed
    pub fn poll(&mut self) -> usize {
        let current = self.device_state.get_keys();
        let now = self.clock.now();
        let mut pushed = 0;

        for key in diff(&self.last_keys, &current) {
            let Some(code) = keymap::scan_code_for(key.0) else {
                debug!("Ignoring unmapped key {:?}", key.0);
                continue;
            };
            let event = Event::new(Identity::Key(KeyId::new(code)), key.1, now);
            if self.producer.push(event) {
                pushed += 1;
            }
        }

        self.last_keys = current;
        pushed
    }

    pub fn dropped(&self) -> u64 {
        self.producer.dropped()
    }
}

impl<C: Clock + 'static> PollingListener<C> {
    /// Poll on a background thread until `stop` is set.
    ///
    /// The device handle is opened on that thread since it is not `Send` on
    /// every platform.
    pub fn spawn(
        clock: C,
        producer: Producer,
        interval: Duration,
        stop: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("key-poller".to_string())
            .spawn(move || {
                let mut listener = Self::new(clock, producer);
                info!("Polling keyboard every {:?}", interval);
                while !stop.load(Ordering::Acquire) {
                    listener.poll();
                    thread::sleep(interval);
                }
            })
    }
}

/// Keys that went down (in `current` only) then keys that went up (in `previous` only)
fn diff(previous: &[Keycode], current: &[Keycode]) -> Vec<(Keycode, Edge)> {
    let pressed = current
        .iter()
        .filter(|k| !previous.contains(k))
        .map(|k| (*k, Edge::Assert));
    let released = previous
        .iter()
        .filter(|k| !current.contains(k))
        .map(|k| (*k, Edge::Release));
    pressed.chain(released).collect()
}
