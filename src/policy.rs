//! The parameters that distinguish one game variant from another.
//!
//! Built from configuration (see `config`); the engine only ever reads it.

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::keyspace::{KeyRange, KeySpace};
use crate::pattern::Tier;

/// Rules for one level. Levels past the end of the table reuse the last rule.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelRule {
    pub visible: KeyRange,
    /// Silence after the last key press before a step is sealed
    pub quiet: Duration,
    /// Number of steps (ignored by the songbook tier)
    pub length: RangeInclusive<usize>,
    pub tier: Tier,
}

/// Pauses used while showing patterns and between rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    pub lead_in: Duration,
    pub highlight: Duration,
    pub step_gap: Duration,
    pub level_pause: Duration,
    pub failure_pause: Duration,
    pub feedback: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoundSettings {
    /// Peak gain of a single voice (0.0..=1.0)
    pub volume: f32,
    pub note: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GamePolicy {
    pub name: String,
    pub octaves: u8,
    pub first_octave: u8,
    pub lives: u32,
    pub points_per_level: u32,
    pub timing: Timing,
    pub sound: SoundSettings,
    pub free_range: KeyRange,
    pub levels: Vec<LevelRule>,
}

impl GamePolicy {
    pub fn level(&self, level: u32) -> &LevelRule {
        &self.levels[level_slot(level, self.levels.len())]
    }

    /// The keyspace this policy plays on, with its visibility table installed.
    pub fn keyspace(&self) -> KeySpace {
        KeySpace::new(self.octaves, self.first_octave).with_visibility(
            self.levels.iter().map(|rule| rule.visible).collect(),
            self.free_range,
        )
    }
}

/// Table index for a 1-based level, clamped to the last entry.
pub fn level_slot(level: u32, table_len: usize) -> usize {
    (level.max(1) as usize - 1).min(table_len.saturating_sub(1))
}
