//! Scheduled GPIO pulse actuator
//!
//! Drives a list of pins active one at a time, round-robin, on a fixed
//! interval. Each pulse is pushed into the event queue as an ASSERT when the
//! pin goes active and a RELEASE when it returns to idle. Like the heartbeat,
//! the next pulse deadline advances from the previous deadline, not from the
//! time the tick happened to run.

use crate::pipeline::{Event, Identity, Producer, Timestamp};
use log::{debug, trace};
use std::time::Duration;
use thiserror::Error;

/// Electrical level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Errors from schedule validation or the pin driver
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("pulse schedule has no pins")]
    NoPins,
    #[error("pulse interval must be greater than zero")]
    ZeroInterval,
    #[error("pulse duration {duration:?} must be shorter than the interval {interval:?}")]
    PulseTooLong {
        duration: Duration,
        interval: Duration,
    },
    #[error("failed to drive GPIO{pin}: {reason}")]
    Driver { pin: u8, reason: String },
}

/// Hardware (or simulated) output stage
pub trait PinDriver {
    fn set_level(&mut self, pin: u8, level: Level) -> Result<(), ActuatorError>;
}

/// Driver that only logs level changes, for host-side simulation
#[derive(Debug, Default)]
pub struct LogDriver;

impl PinDriver for LogDriver {
    fn set_level(&mut self, pin: u8, level: Level) -> Result<(), ActuatorError> {
        trace!("GPIO{} -> {:?}", pin, level);
        Ok(())
    }
}

/// Which pins to pulse and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseSchedule {
    pins: Vec<u8>,
    interval: Duration,
    duration: Duration,
    active_low: bool,
}

impl PulseSchedule {
    pub fn new(
        pins: Vec<u8>,
        interval: Duration,
        duration: Duration,
        active_low: bool,
    ) -> Result<Self, ActuatorError> {
        if pins.is_empty() {
            return Err(ActuatorError::NoPins);
        }
        if interval.is_zero() {
            return Err(ActuatorError::ZeroInterval);
        }
        if duration >= interval {
            return Err(ActuatorError::PulseTooLong { duration, interval });
        }
        Ok(Self {
            pins,
            interval,
            duration,
            active_low,
        })
    }

    pub fn pins(&self) -> &[u8] {
        &self.pins
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn active_level(&self) -> Level {
        if self.active_low {
            Level::Low
        } else {
            Level::High
        }
    }

    fn idle_level(&self) -> Level {
        if self.active_low {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Round-robin pulse generator feeding the event queue
pub struct Actuator<D: PinDriver> {
    driver: D,
    schedule: PulseSchedule,
    index: usize,
    next_press: Timestamp,
    pending_release: Option<(u8, Timestamp)>,
    pulses: u64,
}

impl<D: PinDriver> Actuator<D> {
    /// Drives every pin idle; the first pulse is due one interval after `start`
    pub fn new(
        mut driver: D,
        schedule: PulseSchedule,
        start: Timestamp,
    ) -> Result<Self, ActuatorError> {
        for &pin in schedule.pins() {
            driver.set_level(pin, schedule.idle_level())?;
        }
        debug!(
            "Actuator armed: {} pins, interval={:?}, duration={:?}",
            schedule.pins.len(),
            schedule.interval,
            schedule.duration
        );
        Ok(Self {
            driver,
            next_press: start.saturating_add(schedule.interval),
            schedule,
            index: 0,
            pending_release: None,
            pulses: 0,
        })
    }

    /// Run due actions at `now`; returns the number of edges driven
    pub fn tick(
        &mut self,
        now: Timestamp,
        producer: &mut Producer,
    ) -> Result<usize, ActuatorError> {
        let mut edges = 0;

        if let Some((pin, release_at)) = self.pending_release {
            if now >= release_at {
                self.driver.set_level(pin, self.schedule.idle_level())?;
                producer.push(Event::release(Identity::Pin(pin), now));
                self.pending_release = None;
                edges += 1;
            }
        }

        if self.pending_release.is_none() && now >= self.next_press {
            let pin = self.schedule.pins[self.index];
            self.driver.set_level(pin, self.schedule.active_level())?;
            producer.push(Event::assert(Identity::Pin(pin), now));
            self.pending_release = Some((pin, now.saturating_add(self.schedule.duration)));

            self.index = (self.index + 1) % self.schedule.pins.len();
            self.next_press = self.next_press.saturating_add(self.schedule.interval);
            self.pulses += 1;
            edges += 1;
        }

        Ok(edges)
    }

    pub fn next_press(&self) -> Timestamp {
        self.next_press
    }

    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    /// Pin currently held active, if any
    pub fn active_pin(&self) -> Option<u8> {
        self.pending_release.map(|(pin, _)| pin)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}
