//! Idle detection from the user-input heartbeat.
//!
//! The monitor only tracks the time of the last observed input. Polling
//! reports the active→idle flip once the threshold passes; the next input
//! reports the idle→active flip. Neither side reports a state it is already in.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct IdleMonitor {
    threshold: Duration,
    last_input: Option<DateTime<Utc>>,
    idle: bool,
}

impl IdleMonitor {
    pub const fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_input: None,
            idle: false,
        }
    }

    pub const fn is_idle(&self) -> bool {
        self.idle
    }

    /// Records user input at `at`. Returns true if this ended an idle period.
    pub fn record_input(&mut self, at: DateTime<Utc>) -> bool {
        self.last_input = Some(self.last_input.map_or(at, |last| last.max(at)));
        std::mem::replace(&mut self.idle, false)
    }

    /// Marks the user idle without waiting for the threshold.
    /// Only input ends a forced idle period.
    pub const fn force_idle(&mut self) {
        self.idle = true;
    }

    /// Re-evaluates the idle state at `now`. Returns true if the user just
    /// became idle.
    pub fn observe(&mut self, now: DateTime<Utc>) -> bool {
        if self.idle {
            return false;
        }
        // no input seen yet: nothing to be idle from
        let Some(last_input) = self.last_input else {
            return false;
        };
        self.idle = now - last_input >= self.threshold;
        self.idle
    }
}
