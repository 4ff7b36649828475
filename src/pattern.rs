//! Steps, patterns and the tiered pattern generator.
//!
//! A [`Step`] is always canonical: sorted ascending, no duplicates, never
//! empty. That makes step equality plain `==` and order-independent for the
//! player, who may press a chord's keys in any order.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;

use rand::Rng;

use crate::keyspace::KeyRange;
use crate::policy::{LevelRule, level_slot};

/// One beat of a pattern: the keys meant to sound together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Step(Vec<usize>);

impl Step {
    /// Canonicalize a set of keys. Returns `None` for an empty input.
    pub fn new<I: IntoIterator<Item = usize>>(keys: I) -> Option<Step> {
        let set: BTreeSet<usize> = keys.into_iter().collect();
        if set.is_empty() {
            None
        } else {
            Some(Step(set.into_iter().collect()))
        }
    }

    pub fn single(index: usize) -> Step {
        Step(vec![index])
    }

    /// Seal a set that is known to be non-empty.
    pub(crate) fn from_set(set: BTreeSet<usize>) -> Step {
        assert!(!set.is_empty(), "empty step");
        Step(set.into_iter().collect())
    }

    pub fn keys(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn within(&self, range: KeyRange) -> bool {
        self.0.iter().all(|&k| range.contains(k))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.0.iter().map(|k| k.to_string()).collect();
        write!(f, "[{}]", keys.join(" "))
    }
}

/// The ordered steps the player must reproduce for one round.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pattern {
    steps: Vec<Step>,
    title: Option<String>,
}

impl Pattern {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, title: None }
    }

    pub fn titled(title: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            steps,
            title: Some(title.into()),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}

/// A fixed melody for the songbook tier.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub title: String,
    pub steps: Vec<Step>,
}

/// How a level builds its steps.
#[derive(Debug, Clone, PartialEq)]
pub enum Tier {
    /// Every step a single key.
    SingleNote,
    /// Every step a chord; equal bounds give a fixed chord size.
    Chord { size: RangeInclusive<usize> },
    /// Each step independently a chord (with `chord_chance`) or a single key.
    Mixed {
        chord_chance: f64,
        size: RangeInclusive<usize>,
    },
    /// Weighted mix of singles, small chords and large chords.
    Advanced,
    /// Fixed melodies, taken in turn.
    Songbook { songs: Vec<Song> },
}

/// (weight, smallest size, largest size)
const ADVANCED_SHAPES: [(f64, usize, usize); 3] = [(0.3, 1, 1), (0.4, 2, 3), (0.3, 3, 5)];

pub struct PatternGenerator<R> {
    levels: Vec<LevelRule>,
    rng: R,
    /// Next song per level slot, for songbook tiers.
    cursors: Vec<usize>,
}

impl<R: Rng> PatternGenerator<R> {
    pub fn new(levels: Vec<LevelRule>, rng: R) -> Self {
        assert!(!levels.is_empty(), "generator needs at least one level rule");
        let cursors = vec![0; levels.len()];
        Self {
            levels,
            rng,
            cursors,
        }
    }

    /// Build a fresh pattern for `level`. Every step lies inside the level's
    /// visible range.
    pub fn generate(&mut self, level: u32) -> Pattern {
        let slot = level_slot(level, self.levels.len());
        let rule = &self.levels[slot];
        let range = rule.visible;
        let rng = &mut self.rng;

        let pattern = match &rule.tier {
            Tier::Songbook { songs } => {
                let song = &songs[self.cursors[slot] % songs.len()];
                self.cursors[slot] += 1;
                Pattern::titled(song.title.clone(), song.steps.clone())
            }
            tier => {
                let length = rng.gen_range(rule.length.clone());
                let steps = (0..length).map(|_| step_for(tier, rng, range)).collect();
                Pattern::new(steps)
            }
        };

        assert!(!pattern.is_empty(), "generated an empty pattern");
        for step in pattern.steps() {
            assert!(step.within(range), "generated {} outside {}", step, range);
        }
        pattern
    }
}

fn step_for<R: Rng>(tier: &Tier, rng: &mut R, range: KeyRange) -> Step {
    match tier {
        Tier::SingleNote => Step::single(rng.gen_range(range.iter())),
        Tier::Chord { size } => {
            let n = rng.gen_range(size.clone());
            chord(rng, range, n)
        }
        Tier::Mixed { chord_chance, size } => {
            if rng.gen_bool(*chord_chance) {
                let n = rng.gen_range(size.clone());
                chord(rng, range, n)
            } else {
                Step::single(rng.gen_range(range.iter()))
            }
        }
        Tier::Advanced => {
            let roll: f64 = rng.r#gen();
            let mut acc = 0.0;
            let mut shape = ADVANCED_SHAPES[ADVANCED_SHAPES.len() - 1];
            for candidate in ADVANCED_SHAPES {
                acc += candidate.0;
                if roll < acc {
                    shape = candidate;
                    break;
                }
            }
            let n = rng.gen_range(shape.1..=shape.2);
            chord(rng, range, n)
        }
        Tier::Songbook { .. } => unreachable!("songbook patterns are not sampled"),
    }
}

/// `size` distinct keys from `range` by rejection sampling.
fn chord<R: Rng>(rng: &mut R, range: KeyRange, size: usize) -> Step {
    let size = size.clamp(1, range.len());
    let mut keys = BTreeSet::new();
    while keys.len() < size {
        keys.insert(rng.gen_range(range.iter()));
    }
    Step::from_set(keys)
}
