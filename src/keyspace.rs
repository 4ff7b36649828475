//! The addressable keyboard.
//!
//! Keys are indexed `0..N-1` in octave-major order: with three octaves, keys
//! 0–11 are octave 1, 12–23 octave 2 and 24–35 octave 3. The `KeySpace` is
//! built once at startup and shared by reference; nothing mutates it after the
//! visibility table is installed.

use std::fmt;
use std::ops::Range;

use crate::note::NoteName;
use crate::policy::level_slot;

pub const KEYS_PER_OCTAVE: usize = 12;

/// Which rules decide the playable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Memory game: the range follows the level table.
    Game,
    /// Free play: the range set for practice.
    Free,
}

/// Half-open range of key indices, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    start: usize,
    end: usize,
}

impl KeyRange {
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start < end, "empty key range {}..{}", start, end);
        Self { start, end }
    }

    /// Inclusive span of 1-based octaves, e.g. `octaves(2, 2)` is keys 12..24.
    pub fn octaves(first: u8, last: u8) -> Self {
        assert!(first >= 1 && first <= last, "bad octave span {}..={}", first, last);
        Self::new(
            (first as usize - 1) * KEYS_PER_OCTAVE,
            last as usize * KEYS_PER_OCTAVE,
        )
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..self.end).contains(&index)
    }

    pub fn iter(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keys {}-{}", self.start, self.end - 1)
    }
}

/// One pitched key. Immutable once the keyspace is built.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub index: usize,
    pub name: NoteName,
    /// 1-based octave within the keyspace (not scientific pitch octave)
    pub octave: u8,
    pub frequency: f64,
}

impl Key {
    pub fn is_white(&self) -> bool {
        !self.name.is_accidental()
    }

    /// Display label such as "C#2"
    pub fn label(&self) -> String {
        format!("{}{}", self.name.label(), self.octave)
    }
}

#[derive(Debug, Clone)]
pub struct KeySpace {
    keys: Vec<Key>,
    /// Visible range per level, level 1 first. Levels past the end reuse the last entry.
    levels: Vec<KeyRange>,
    free: KeyRange,
}

impl KeySpace {
    /// Build `octaves` octaves of keys. `first_octave` is the scientific octave
    /// of keyspace octave 1 (3 puts key 12 on middle C).
    pub fn new(octaves: u8, first_octave: u8) -> Self {
        assert!(octaves >= 1, "keyspace needs at least one octave");
        let keys: Vec<Key> = (0..octaves as usize * KEYS_PER_OCTAVE)
            .map(|index| {
                let name = NoteName::from_semitone(index);
                let octave = (index / KEYS_PER_OCTAVE) as u8 + 1;
                Key {
                    index,
                    name,
                    octave,
                    frequency: name.to_freq(first_octave + octave - 1),
                }
            })
            .collect();
        let full = KeyRange::new(0, keys.len());
        Self {
            keys,
            levels: vec![full],
            free: full,
        }
    }

    /// Install the per-level visibility table and the free-play range.
    pub fn with_visibility(mut self, levels: Vec<KeyRange>, free: KeyRange) -> Self {
        assert!(!levels.is_empty(), "visibility table needs at least one level");
        for range in levels.iter().chain(std::iter::once(&free)) {
            assert!(range.end() <= self.keys.len(), "{} outside keyspace", range);
        }
        self.levels = levels;
        self.free = free;
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn octaves(&self) -> u8 {
        (self.keys.len() / KEYS_PER_OCTAVE) as u8
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn full_range(&self) -> KeyRange {
        KeyRange::new(0, self.keys.len())
    }

    pub fn octave_range(&self, octave: u8) -> KeyRange {
        assert!(
            octave >= 1 && octave <= self.octaves(),
            "octave {} outside keyspace",
            octave
        );
        KeyRange::octaves(octave, octave)
    }

    /// Look up a key. Panics on an index outside `0..len()`: callers validate first.
    pub fn key(&self, index: usize) -> &Key {
        assert!(
            index < self.keys.len(),
            "key index {} outside 0..{}",
            index,
            self.keys.len()
        );
        &self.keys[index]
    }

    pub fn frequency_of(&self, index: usize) -> f64 {
        self.key(index).frequency
    }

    pub fn is_white(&self, index: usize) -> bool {
        self.key(index).is_white()
    }

    pub fn visible_range(&self, level: u32, mode: Mode) -> KeyRange {
        match mode {
            Mode::Free => self.free,
            Mode::Game => self.levels[level_slot(level, self.levels.len())],
        }
    }

    pub fn is_visible(&self, index: usize, level: u32, mode: Mode) -> bool {
        self.key(index);
        self.visible_range(level, mode).contains(index)
    }
}
