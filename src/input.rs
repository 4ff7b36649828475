//! Groups the player's key presses into steps.
//!
//! There is no key-up edge that says "this chord is finished", so a step is
//! sealed by silence: every accepted press restarts a quiet-period timer, and
//! when it runs out the open step is confirmed. Key releases are visual only
//! and never reach the aggregator.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::keyspace::KeyRange;
use crate::pattern::Step;
use crate::timer::Timer;

#[derive(Debug, Default)]
pub struct InputAggregator {
    /// `None` while disarmed: every press is ignored.
    visible: Option<KeyRange>,
    quiet: Duration,
    open: Option<BTreeSet<usize>>,
    timer: Timer,
}

impl InputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting presses inside `visible`, sealing after `quiet`.
    pub fn arm(&mut self, visible: KeyRange, quiet: Duration) {
        self.reset();
        self.visible = Some(visible);
        self.quiet = quiet;
    }

    pub fn disarm(&mut self) {
        self.reset();
        self.visible = None;
    }

    /// Drop the open step and cancel the quiet timer.
    pub fn reset(&mut self) {
        self.open = None;
        self.timer.cancel();
    }

    /// Record a press. Returns `false`, with no state change and no timer
    /// restart, when the key is not currently playable.
    pub fn activate(&mut self, index: usize, now: Instant) -> bool {
        match self.visible {
            Some(range) if range.contains(index) => {}
            _ => return false,
        }
        self.open.get_or_insert_with(BTreeSet::new).insert(index);
        self.timer.schedule_after(now, self.quiet);
        true
    }

    /// Seal the open step once the quiet period has passed.
    pub fn poll(&mut self, now: Instant) -> Option<Step> {
        self.timer.fire(now)?;
        self.open.take().map(Step::from_set)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Keys of the step still being composed.
    pub fn open_step(&self) -> Option<&BTreeSet<usize>> {
        self.open.as_ref()
    }
}
