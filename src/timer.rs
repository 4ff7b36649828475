//! One-shot deadlines for the single-threaded event loop.
//!
//! Nothing runs in the background: the owner asks `fire(now)` whether the
//! deadline has passed. Cancelling clears the deadline, so a superseded
//! timer can never fire later.

use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `at`, replacing any pending deadline.
    pub fn schedule(&mut self, at: Instant) {
        self.deadline = Some(at);
    }

    pub fn schedule_after(&mut self, from: Instant, delay: Duration) {
        self.schedule(from + delay);
    }

    /// Idempotent.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// If the deadline has passed, disarm and return the instant it was due.
    pub fn fire(&mut self, now: Instant) -> Option<Instant> {
        match self.deadline {
            Some(due) if due <= now => {
                self.deadline = None;
                Some(due)
            }
            _ => None,
        }
    }
}
