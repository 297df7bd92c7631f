//! Keyboard producers and key labels

pub mod keymap;
mod listener;
#[cfg(target_os = "linux")]
mod evdev_listener;

pub use keymap::{key_name, label_for, scan_code_for};
pub use listener::{PollingListener, DEFAULT_POLL_INTERVAL};

#[cfg(target_os = "linux")]
pub use evdev_listener::{edge_for_value, evdev_status, EvdevError, EvdevListener};
