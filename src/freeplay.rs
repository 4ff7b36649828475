//! Practice mode: keys sound as soon as they are pressed, nothing is scored.

use std::collections::{BTreeSet, VecDeque};

use crate::keyspace::KeyRange;

pub const HISTORY_LEN: usize = 20;

#[derive(Debug)]
pub struct FreePlay {
    range: KeyRange,
    history: VecDeque<usize>,
    total: usize,
    /// Keys down right now; terminal auto-repeat must not retrigger them.
    held: BTreeSet<usize>,
}

impl FreePlay {
    pub fn new(range: KeyRange) -> Self {
        Self {
            range,
            history: VecDeque::with_capacity(HISTORY_LEN),
            total: 0,
            held: BTreeSet::new(),
        }
    }

    pub fn range(&self) -> KeyRange {
        self.range
    }

    /// Record a press. Returns `true` when the key should sound.
    pub fn activate(&mut self, index: usize) -> bool {
        if !self.range.contains(index) || !self.held.insert(index) {
            return false;
        }
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(index);
        self.total += 1;
        true
    }

    pub fn release(&mut self, index: usize) {
        self.held.remove(&index);
    }

    /// Forget every held key, e.g. when switching modes.
    pub fn release_all(&mut self) {
        self.held.clear();
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.total = 0;
    }

    /// Most recent notes, oldest first.
    pub fn history(&self) -> impl Iterator<Item = usize> + '_ {
        self.history.iter().copied()
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
