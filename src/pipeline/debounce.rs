//! Per-identity debounce state machine
//!
//! Turns raw ASSERT/RELEASE edges into accepted transitions. Each identity
//! is either `Released` (initial) or `Asserted`, and a transition is only
//! accepted once the settle window has passed since the last accepted one.

use super::{Edge, Event, Identity, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How RELEASE edges are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseMode {
    /// Releases are debounced like presses and emitted
    #[default]
    Symmetric,
    /// Releases only re-arm the identity and are never emitted
    AssertOnly,
}

/// Filter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Minimum time between accepted transitions; zero disables debouncing
    pub window: Duration,
    pub release_mode: ReleaseMode,
}

impl DebounceConfig {
    pub fn new(window: Duration, release_mode: ReleaseMode) -> Self {
        Self {
            window,
            release_mode,
        }
    }

    pub fn from_millis(window_ms: u64, release_mode: ReleaseMode) -> Self {
        Self::new(Duration::from_millis(window_ms), release_mode)
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::from_millis(5, ReleaseMode::Symmetric)
    }
}

/// Debounce state of one identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceState {
    pub is_active: bool,
    pub last_accepted_at: Option<Timestamp>,
}

impl DebounceState {
    fn settled(&self, now: Timestamp, window: Duration) -> bool {
        match self.last_accepted_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= window,
        }
    }
}

/// Why a raw event was not emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// Opposite-or-same edge inside the settle window
    Chatter,
    /// ASSERT while already asserted (held key, auto-repeat)
    Repeat,
    /// RELEASE while already released
    NotActive,
    /// RELEASE consumed silently in assert-only mode
    Absorbed,
}

/// Outcome of feeding one raw event through the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Suppressed(SuppressReason),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted)
    }
}

/// Running totals kept by the filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCounts {
    pub accepted: u64,
    pub chatter: u64,
    pub repeat: u64,
    pub not_active: u64,
    pub absorbed: u64,
}

impl FilterCounts {
    pub fn suppressed(&self) -> u64 {
        self.chatter + self.repeat + self.not_active + self.absorbed
    }

    fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Accepted => self.accepted += 1,
            Decision::Suppressed(SuppressReason::Chatter) => self.chatter += 1,
            Decision::Suppressed(SuppressReason::Repeat) => self.repeat += 1,
            Decision::Suppressed(SuppressReason::NotActive) => self.not_active += 1,
            Decision::Suppressed(SuppressReason::Absorbed) => self.absorbed += 1,
        }
    }
}

/// Debounce filter over every identity seen in a session
#[derive(Debug, Default)]
pub struct DebounceFilter {
    config: DebounceConfig,
    states: HashMap<Identity, DebounceState>,
    counts: FilterCounts,
}

impl DebounceFilter {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
            counts: FilterCounts::default(),
        }
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    /// Feed one raw event and decide whether it is a genuine transition
    pub fn process(&mut self, event: &Event) -> Decision {
        let window = self.config.window;
        let mode = self.config.release_mode;
        let state = self.states.entry(event.identity).or_default();

        let decision = match event.edge {
            Edge::Assert => {
                if state.is_active {
                    Decision::Suppressed(SuppressReason::Repeat)
                } else if state.settled(event.timestamp, window) {
                    state.is_active = true;
                    state.last_accepted_at = Some(event.timestamp);
                    Decision::Accepted
                } else {
                    Decision::Suppressed(SuppressReason::Chatter)
                }
            }
            Edge::Release => match mode {
                ReleaseMode::AssertOnly => {
                    state.is_active = false;
                    Decision::Suppressed(SuppressReason::Absorbed)
                }
                ReleaseMode::Symmetric => {
                    if !state.is_active {
                        Decision::Suppressed(SuppressReason::NotActive)
                    } else if state.settled(event.timestamp, window) {
                        state.is_active = false;
                        state.last_accepted_at = Some(event.timestamp);
                        Decision::Accepted
                    } else {
                        Decision::Suppressed(SuppressReason::Chatter)
                    }
                }
            },
        };

        self.counts.record(decision);
        decision
    }

    pub fn state(&self, identity: &Identity) -> Option<&DebounceState> {
        self.states.get(identity)
    }

    pub fn is_active(&self, identity: &Identity) -> bool {
        self.states.get(identity).is_some_and(|s| s.is_active)
    }

    /// Identities currently in the asserted state
    pub fn active(&self) -> impl Iterator<Item = Identity> + '_ {
        self.states
            .iter()
            .filter(|(_, state)| state.is_active)
            .map(|(identity, _)| *identity)
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn counts(&self) -> FilterCounts {
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Identity = Identity::Pin(1);
    const B: Identity = Identity::Pin(2);

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn symmetric(window_ms: u64) -> DebounceFilter {
        DebounceFilter::new(DebounceConfig::from_millis(window_ms, ReleaseMode::Symmetric))
    }

    fn assert_only(window_ms: u64) -> DebounceFilter {
        DebounceFilter::new(DebounceConfig::from_millis(window_ms, ReleaseMode::AssertOnly))
    }

    #[test]
    fn first_assert_is_accepted() {
        let mut f = symmetric(5);
        assert_eq!(f.process(&Event::assert(A, at(100))), Decision::Accepted);
        assert!(f.is_active(&A));
        assert_eq!(f.state(&A).unwrap().last_accepted_at, Some(at(100)));
    }

    #[test]
    fn second_assert_inside_window_is_suppressed() {
        let mut f = symmetric(50);
        assert!(f.process(&Event::assert(A, at(100))).is_accepted());
        assert_eq!(
            f.process(&Event::assert(A, at(140))),
            Decision::Suppressed(SuppressReason::Repeat)
        );
        assert_eq!(f.counts().accepted, 1);
    }

    #[test]
    fn chatter_release_inside_window_is_suppressed() {
        let mut f = symmetric(5);
        f.process(&Event::assert(A, at(0)));
        assert_eq!(
            f.process(&Event::release(A, at(2))),
            Decision::Suppressed(SuppressReason::Chatter)
        );
        assert!(f.is_active(&A));
    }

    #[test]
    fn bounce_after_release_is_suppressed() {
        let mut f = symmetric(5);
        f.process(&Event::assert(A, at(0)));
        assert!(f.process(&Event::release(A, at(40))).is_accepted());
        assert_eq!(
            f.process(&Event::assert(A, at(42))),
            Decision::Suppressed(SuppressReason::Chatter)
        );
        assert!(!f.is_active(&A));
    }

    #[test]
    fn assert_after_settled_release_is_accepted() {
        let mut f = symmetric(5);
        assert!(f.process(&Event::assert(A, at(0))).is_accepted());
        assert!(f.process(&Event::release(A, at(30))).is_accepted());
        assert!(f.process(&Event::assert(A, at(35))).is_accepted());
    }

    #[test]
    fn leading_release_is_a_no_op() {
        let mut f = symmetric(5);
        assert_eq!(
            f.process(&Event::release(B, at(10))),
            Decision::Suppressed(SuppressReason::NotActive)
        );
        let state = f.state(&B).unwrap();
        assert!(!state.is_active);
        assert_eq!(state.last_accepted_at, None);
        assert!(f.process(&Event::assert(B, at(11))).is_accepted());
    }

    #[test]
    fn zero_window_accepts_every_valid_transition() {
        let mut f = symmetric(0);
        assert!(f.process(&Event::assert(A, at(1))).is_accepted());
        assert!(f.process(&Event::release(A, at(1))).is_accepted());
        assert!(f.process(&Event::assert(A, at(1))).is_accepted());
        assert_eq!(
            f.process(&Event::assert(A, at(1))),
            Decision::Suppressed(SuppressReason::Repeat)
        );
    }

    #[test]
    fn identities_are_independent() {
        let mut f = symmetric(50);
        assert!(f.process(&Event::assert(A, at(0))).is_accepted());
        assert!(f.process(&Event::assert(B, at(1))).is_accepted());
        let mut active: Vec<Identity> = f.active().collect();
        active.sort_by_key(|i| i.to_string());
        assert_eq!(active, vec![A, B]);
        assert_eq!(f.tracked(), 2);
    }

    #[test]
    fn assert_only_release_rearms_without_emitting() {
        let mut f = assert_only(5);
        assert!(f.process(&Event::assert(A, at(0))).is_accepted());
        // Release inside the window still re-arms
        assert_eq!(
            f.process(&Event::release(A, at(1))),
            Decision::Suppressed(SuppressReason::Absorbed)
        );
        assert!(!f.is_active(&A));
        // Window is measured from the last accepted press
        assert_eq!(
            f.process(&Event::assert(A, at(3))),
            Decision::Suppressed(SuppressReason::Chatter)
        );
        f.process(&Event::release(A, at(4)));
        assert!(f.process(&Event::assert(A, at(5))).is_accepted());
        assert_eq!(f.state(&A).unwrap().last_accepted_at, Some(at(5)));
    }

    #[test]
    fn assert_only_suppresses_auto_repeat() {
        let mut f = assert_only(0);
        assert!(f.process(&Event::assert(A, at(0))).is_accepted());
        for t in [500, 533, 566, 600] {
            assert_eq!(
                f.process(&Event::assert(A, at(t))),
                Decision::Suppressed(SuppressReason::Repeat)
            );
        }
        f.process(&Event::release(A, at(610)));
        assert!(f.process(&Event::assert(A, at(700))).is_accepted());
    }

    #[test]
    fn out_of_order_timestamp_counts_as_no_elapsed_time() {
        let mut f = symmetric(5);
        f.process(&Event::assert(A, at(100)));
        assert_eq!(
            f.process(&Event::release(A, at(90))),
            Decision::Suppressed(SuppressReason::Chatter)
        );
    }

    #[test]
    fn counts_track_every_reason() {
        let mut f = symmetric(5);
        f.process(&Event::release(A, at(0))); // not active
        f.process(&Event::assert(A, at(1))); // accepted
        f.process(&Event::assert(A, at(2))); // repeat
        f.process(&Event::release(A, at(3))); // chatter
        f.process(&Event::release(A, at(10))); // accepted

        let counts = f.counts();
        assert_eq!(counts.accepted, 2);
        assert_eq!(counts.not_active, 1);
        assert_eq!(counts.repeat, 1);
        assert_eq!(counts.chatter, 1);
        assert_eq!(counts.suppressed(), 3);
    }
}
