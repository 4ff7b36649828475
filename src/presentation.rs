//! What the game engine asks of whoever draws the keyboard and makes sound.
//!
//! The engine keeps no rendering state of its own; every visible or audible
//! effect goes through this trait. Implementations must not fail: a missing
//! audio device means silence, never an error back into the engine.

use std::time::Duration;

use crate::keyspace::KeyRange;
use crate::pattern::Step;

pub trait Presentation {
    /// Re-render the playable keys. Called when a round starts at a new level.
    fn rebuild_keyboard(&mut self, visible: KeyRange);

    /// Highlight and sound every key of `step` at once for `duration`.
    /// The engine waits `duration` before moving on.
    fn show_step(&mut self, step: &Step, duration: Duration);

    /// Transient right/wrong marking.
    fn flash_feedback(&mut self, step: &Step, correct: bool);

    /// The player pressed a playable key.
    fn key_pressed(&mut self, index: usize);

    fn key_released(&mut self, index: usize);

    fn update_scoreboard(&mut self, score: u32, level: u32, lives: u32);

    /// `done` of `total` steps confirmed.
    fn update_progress(&mut self, done: usize, total: usize);

    fn show_prompt(&mut self, text: &str);

    fn hide_prompt(&mut self);

    fn show_game_over(&mut self, final_score: u32, final_level: u32);

    fn hide_game_over(&mut self);
}
