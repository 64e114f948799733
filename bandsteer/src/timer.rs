// Deadline timers driven by the host loop

//! Deadline timers
//!
//! Every timer in the engine is a plain deadline on the engine's monotonic
//! clock. Nothing runs on its own: the host loop asks for the earliest
//! deadline, sleeps until then and calls `advance(now)`, which fires every
//! timer whose deadline has passed.

use std::time::Duration;

/// A one-shot timer armed at an absolute monotonic time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    at: Option<Duration>,
}

impl Timer {
    pub const fn new() -> Self {
        Self { at: None }
    }

    /// Arm (or re-arm) the timer at an absolute time
    pub fn arm_at(&mut self, at: Duration) {
        self.at = Some(at);
    }

    pub fn disarm(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.at
    }

    /// Time left before expiry, zero once due
    pub fn remaining(&self, now: Duration) -> Option<Duration> {
        self.at.map(|at| at.saturating_sub(now))
    }

    /// Disarm and return true if the deadline has passed
    pub fn fire(&mut self, now: Duration) -> bool {
        match self.at {
            Some(at) if at <= now => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}

/// Earlier of two optional deadlines
pub fn earliest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
