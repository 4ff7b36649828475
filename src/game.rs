//! The memory game state machine.
//!
//! ```text
//! Idle --Start--> ShowingPattern --> AwaitingInput --step--> Evaluating
//!                      ^   ^                ^                  |  |  |
//!                      |   |                +-- more steps ----+  |  |
//!                      |   +-- PatternFailed <-- wrong, lives > 0 |  |
//!                      +------ LevelComplete <-- pattern done ----+  |
//!                              GameOver <-- wrong, no lives left ----+
//! ```
//!
//! Everything enters through [`Game::dispatch`]. Delays are deadlines checked
//! on `GameEvent::Tick`; there are no callbacks that could outlive the state
//! they were scheduled for.

use std::collections::BTreeSet;
use std::time::Instant;

use log::{debug, info};
use rand::Rng;

use crate::input::InputAggregator;
use crate::keyspace::{KeyRange, KeySpace, Mode};
use crate::pattern::{Pattern, PatternGenerator, Step};
use crate::policy::GamePolicy;
use crate::presentation::Presentation;
use crate::timer::Timer;

/// Where the pattern replay is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    /// Pause before the first step
    LeadIn,
    /// Step `n` is lit
    Lit(usize),
    /// Pause after step `n`
    Gap(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ShowingPattern(Playback),
    AwaitingInput,
    Evaluating,
    LevelComplete,
    PatternFailed,
    GameOver,
}

/// Everything that can happen to a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    Start,
    Replay,
    Restart,
    Activate(usize),
    Deactivate(usize),
    /// Time has passed; fire whatever is due.
    Tick,
}

#[derive(Debug, Clone)]
pub struct GameState {
    score: u32,
    level: u32,
    lives: u32,
    pattern: Pattern,
    response: Vec<Step>,
    visible: KeyRange,
    phase: Phase,
}

impl GameState {
    fn new(lives: u32, visible: KeyRange) -> Self {
        Self {
            score: 0,
            level: 1,
            lives,
            pattern: Pattern::default(),
            response: Vec::new(),
            visible,
            phase: Phase::Idle,
        }
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn lives(&self) -> u32 {
        self.lives
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Confirmed steps of the current attempt.
    pub fn response(&self) -> &[Step] {
        &self.response
    }

    /// Keys playable in the current round.
    pub fn visible(&self) -> KeyRange {
        self.visible
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

pub struct Game<'k, P, R> {
    keys: &'k KeySpace,
    policy: GamePolicy,
    generator: PatternGenerator<R>,
    presenter: P,
    state: GameState,
    input: InputAggregator,
    /// Playback steps and between-round pauses
    timer: Timer,
}

impl<'k, P: Presentation, R: Rng> Game<'k, P, R> {
    pub fn new(keys: &'k KeySpace, policy: GamePolicy, rng: R, presenter: P) -> Self {
        let generator = PatternGenerator::new(policy.levels.clone(), rng);
        let state = GameState::new(policy.lives, keys.visible_range(1, Mode::Game));
        let mut game = Self {
            keys,
            policy,
            generator,
            presenter,
            state,
            input: InputAggregator::new(),
            timer: Timer::new(),
        };
        game.show_idle();
        game
    }

    pub fn dispatch(&mut self, event: GameEvent, now: Instant) {
        match event {
            GameEvent::Start => self.start(now),
            GameEvent::Replay => self.replay(now),
            GameEvent::Restart => self.restart(),
            GameEvent::Activate(index) => self.activate(index, now),
            GameEvent::Deactivate(index) => self.deactivate(index),
            GameEvent::Tick => self.tick(now),
        }
    }

    /// The input gate: key events are recorded only while this holds.
    pub fn accepts_input(&self) -> bool {
        self.state.phase == Phase::AwaitingInput
    }

    /// Earliest instant at which a `Tick` would change something.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.timer.deadline(), self.input.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Keys of the chord the player is still composing.
    pub fn open_step(&self) -> Option<&BTreeSet<usize>> {
        self.input.open_step()
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    fn start(&mut self, now: Instant) {
        if self.state.phase != Phase::Idle {
            debug!("start ignored in {:?}", self.state.phase);
            return;
        }
        info!("game started with the {} policy", self.policy.name);
        self.state = GameState::new(self.policy.lives, self.keys.visible_range(1, Mode::Game));
        self.presenter.hide_game_over();
        self.presenter.hide_prompt();
        self.begin_round(now);
    }

    fn restart(&mut self) {
        info!("restart from {:?}", self.state.phase);
        self.timer.cancel();
        self.input.disarm();
        self.state = GameState::new(self.policy.lives, self.keys.visible_range(1, Mode::Game));
        self.presenter.hide_game_over();
        self.show_idle();
    }

    fn replay(&mut self, now: Instant) {
        if !self.accepts_input() {
            debug!("replay ignored in {:?}", self.state.phase);
            return;
        }
        debug!("replaying level {} pattern", self.state.level);
        self.show_pattern(now);
    }

    fn activate(&mut self, index: usize, now: Instant) {
        // a step whose quiet period ran out before this press is sealed first
        self.tick(now);
        let visible = self.keys.is_visible(index, self.state.level, Mode::Game);
        if !self.accepts_input() {
            debug!("key {} ignored in {:?}", index, self.state.phase);
            return;
        }
        if !visible || !self.input.activate(index, now) {
            debug!("key {} outside {}", index, self.state.visible);
            return;
        }
        self.presenter.key_pressed(index);
    }

    fn deactivate(&mut self, index: usize) {
        let visible = self.keys.is_visible(index, self.state.level, Mode::Game);
        if visible && self.accepts_input() {
            self.presenter.key_released(index);
        }
    }

    fn tick(&mut self, now: Instant) {
        while let Some(due) = self.timer.fire(now) {
            self.on_timer(due, now);
        }
        if self.accepts_input() {
            if let Some(step) = self.input.poll(now) {
                self.evaluate(step, now);
            }
        }
    }

    fn on_timer(&mut self, due: Instant, now: Instant) {
        match self.state.phase {
            Phase::ShowingPattern(playback) => self.advance_playback(playback, due, now),
            Phase::LevelComplete => self.begin_round(due),
            Phase::PatternFailed => self.show_pattern(due),
            phase => debug!("timer fired in {:?}", phase),
        }
    }

    fn show_idle(&mut self) {
        self.presenter.rebuild_keyboard(self.state.visible);
        self.update_scoreboard();
        self.presenter.update_progress(0, 0);
        self.presenter.show_prompt("Press start to play");
    }

    /// New level or new game: the visible range changes here and only here.
    fn begin_round(&mut self, now: Instant) {
        let level = self.state.level;
        self.state.visible = self.keys.visible_range(level, Mode::Game);
        self.presenter.rebuild_keyboard(self.state.visible);
        self.update_scoreboard();
        self.state.pattern = self.generator.generate(level);
        info!(
            "level {}: {} steps on {}",
            level,
            self.state.pattern.len(),
            self.state.visible
        );
        self.show_pattern(now);
    }

    /// Replay the current pattern from the top, dropping any partial answer.
    fn show_pattern(&mut self, now: Instant) {
        self.input.disarm();
        self.state.response.clear();
        self.presenter.update_progress(0, self.state.pattern.len());
        match self.state.pattern.title() {
            Some(title) => self.presenter.show_prompt(&format!("Now playing: {}", title)),
            None => self.presenter.show_prompt("Watch the pattern..."),
        }
        self.state.phase = Phase::ShowingPattern(Playback::LeadIn);
        self.timer.schedule_after(now, self.policy.timing.lead_in);
    }

    fn advance_playback(&mut self, playback: Playback, due: Instant, now: Instant) {
        match playback {
            Playback::LeadIn => self.light(0, due, now),
            Playback::Lit(n) => {
                self.state.phase = Phase::ShowingPattern(Playback::Gap(n));
                self.timer.schedule_after(due, self.policy.timing.step_gap);
            }
            Playback::Gap(n) if n + 1 < self.state.pattern.len() => self.light(n + 1, due, now),
            Playback::Gap(_) => self.await_input(),
        }
    }

    /// Light step `n` from `due`. A late tick shows only what is left of the
    /// highlight, and nothing if it is already over.
    fn light(&mut self, n: usize, due: Instant, now: Instant) {
        let highlight = self.policy.timing.highlight;
        let remaining = (due + highlight).saturating_duration_since(now);
        if remaining.is_zero() {
            debug!("step {} skipped by a late tick", n + 1);
        } else {
            self.presenter
                .show_step(&self.state.pattern.steps()[n], remaining);
        }
        self.state.phase = Phase::ShowingPattern(Playback::Lit(n));
        self.timer.schedule_after(due, highlight);
    }

    fn await_input(&mut self) {
        let quiet = self.policy.level(self.state.level).quiet;
        self.input.arm(self.state.visible, quiet);
        self.state.phase = Phase::AwaitingInput;
        self.presenter.show_prompt("Your turn!");
    }

    /// Check one confirmed step against the pattern position it answers.
    fn evaluate(&mut self, step: Step, now: Instant) {
        self.state.phase = Phase::Evaluating;
        let position = self.state.response.len();
        let expected = self.state.pattern.steps()[position].clone();
        self.state.response.push(step.clone());

        if step == expected {
            debug!("step {} correct: {}", position + 1, step);
            self.presenter.flash_feedback(&step, true);
            self.presenter
                .update_progress(self.state.response.len(), self.state.pattern.len());
            if self.state.response.len() == self.state.pattern.len() {
                self.complete_level(now);
            } else {
                self.state.phase = Phase::AwaitingInput;
            }
        } else {
            debug!("step {} wrong: got {}, expected {}", position + 1, step, expected);
            self.presenter.flash_feedback(&step, false);
            self.presenter.flash_feedback(&expected, true);
            self.fail(now);
        }
    }

    fn complete_level(&mut self, now: Instant) {
        self.input.disarm();
        let finished = self.state.level;
        self.state.score += finished * self.policy.points_per_level;
        self.state.level += 1;
        info!("level {} complete, score {}", finished, self.state.score);
        self.update_scoreboard();
        self.presenter
            .show_prompt(&format!("Level {} complete!", finished));
        self.state.phase = Phase::LevelComplete;
        self.timer.schedule_after(now, self.policy.timing.level_pause);
    }

    fn fail(&mut self, now: Instant) {
        self.input.disarm();
        self.state.lives = self.state.lives.saturating_sub(1);
        self.update_scoreboard();
        if self.state.lives == 0 {
            info!(
                "game over: score {}, level {}",
                self.state.score, self.state.level
            );
            self.timer.cancel();
            self.state.phase = Phase::GameOver;
            self.presenter
                .show_game_over(self.state.score, self.state.level);
            self.presenter.show_prompt("Game over");
        } else {
            self.presenter.show_prompt(&format!(
                "Wrong! Lives left: {}",
                self.state.lives
            ));
            self.state.phase = Phase::PatternFailed;
            self.timer.schedule_after(now, self.policy.timing.failure_pause);
        }
    }

    fn update_scoreboard(&mut self) {
        self.presenter
            .update_scoreboard(self.state.score, self.state.level, self.state.lives);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Song, Tier};
    use crate::policy::{LevelRule, SoundSettings, Timing};
    use crate::presentation::recording::{Call, Recorder};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::time::Duration;

    const QUIET: Duration = Duration::from_millis(300);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn policy(levels: Vec<LevelRule>) -> GamePolicy {
        GamePolicy {
            name: "test".into(),
            octaves: 3,
            first_octave: 3,
            lives: 3,
            points_per_level: 10,
            timing: Timing {
                lead_in: ms(1000),
                highlight: ms(600),
                step_gap: ms(300),
                level_pause: ms(2000),
                failure_pause: ms(2000),
                feedback: ms(500),
            },
            sound: SoundSettings {
                volume: 0.2,
                note: ms(800),
            },
            free_range: KeyRange::octaves(1, 3),
            levels,
        }
    }

    /// A level that always plays `steps`.
    fn fixed(visible: KeyRange, steps: &[&[usize]]) -> LevelRule {
        let steps = steps
            .iter()
            .map(|keys| Step::new(keys.iter().copied()).unwrap())
            .collect();
        LevelRule {
            visible,
            quiet: QUIET,
            length: 1..=1,
            tier: Tier::Songbook {
                songs: vec![Song {
                    title: "fixed".into(),
                    steps,
                }],
            },
        }
    }

    fn new_game(keys: &KeySpace, policy: GamePolicy) -> Game<'_, Recorder, ChaCha8Rng> {
        Game::new(keys, policy, ChaCha8Rng::seed_from_u64(7), Recorder::default())
    }

    /// Tick deadline by deadline until the player may answer.
    fn finish_playback(game: &mut Game<'_, Recorder, ChaCha8Rng>) -> Instant {
        loop {
            let due = game.next_deadline().unwrap();
            game.dispatch(GameEvent::Tick, due);
            if game.accepts_input() {
                return due;
            }
        }
    }

    /// Press `keys` together at `at`, then let the quiet period seal them.
    fn play_step(game: &mut Game<'_, Recorder, ChaCha8Rng>, keys: &[usize], at: Instant) -> Instant {
        for &key in keys {
            game.dispatch(GameEvent::Activate(key), at);
            game.dispatch(GameEvent::Deactivate(key), at);
        }
        let sealed = at + QUIET;
        game.dispatch(GameEvent::Tick, sealed);
        sealed
    }

    #[test]
    fn test_single_note_level_complete() {
        let policy = policy(vec![
            fixed(KeyRange::octaves(2, 2), &[&[12]]),
            fixed(KeyRange::octaves(1, 3), &[&[0]]),
        ]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        assert_eq!(game.state().phase(), Phase::ShowingPattern(Playback::LeadIn));

        let t = finish_playback(&mut game);
        assert_eq!(game.presenter().shown_steps(), vec![Step::single(12)]);
        play_step(&mut game, &[12], t + ms(100));

        let state = game.state();
        assert_eq!(state.phase(), Phase::LevelComplete);
        assert_eq!(state.score(), 10);
        assert_eq!(state.level(), 2);
        assert_eq!(state.lives(), 3);
        assert!(game.presenter().calls.contains(&Call::Scoreboard(10, 2, 3)));
    }

    #[test]
    fn test_chord_pressed_in_any_order_is_one_step() {
        let policy = policy(vec![
            fixed(KeyRange::octaves(2, 2), &[&[12]]),
            fixed(KeyRange::octaves(1, 3), &[&[0, 4]]),
        ]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);
        let t = play_step(&mut game, &[12], t);

        // level pause, then level 2 replays
        game.dispatch(GameEvent::Tick, t + ms(2000));
        assert_eq!(game.state().level(), 2);
        let t = finish_playback(&mut game);

        game.dispatch(GameEvent::Activate(4), t);
        game.dispatch(GameEvent::Activate(0), t + ms(200));
        assert_eq!(game.open_step().map(|s| s.len()), Some(2));
        game.dispatch(GameEvent::Tick, t + ms(200) + QUIET);

        assert_eq!(game.state().phase(), Phase::LevelComplete);
        assert_eq!(game.presenter().flashes().last(), Some(&(Step::new([0, 4]).unwrap(), true)));
        assert_eq!(game.state().score(), 10 + 20);
    }

    #[test]
    fn test_wrong_note_costs_a_life_and_replays() {
        let policy = policy(vec![fixed(KeyRange::octaves(1, 1), &[&[5]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);
        game.presenter_mut().clear();

        let t = play_step(&mut game, &[9], t);
        assert_eq!(game.state().phase(), Phase::PatternFailed);
        assert_eq!(game.state().lives(), 2);
        assert_eq!(
            game.presenter().flashes(),
            vec![(Step::single(9), false), (Step::single(5), true)]
        );

        game.dispatch(GameEvent::Tick, t + ms(2000));
        assert_eq!(game.state().phase(), Phase::ShowingPattern(Playback::LeadIn));
        assert!(game.state().response().is_empty());
        finish_playback(&mut game);
        assert_eq!(game.presenter().shown_steps(), vec![Step::single(5)]);
    }

    #[test]
    fn test_last_life_ends_the_game() {
        let policy = policy(vec![
            fixed(KeyRange::octaves(2, 2), &[&[12]]),
            fixed(KeyRange::octaves(1, 3), &[&[1]]),
        ]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);
        let mut t = play_step(&mut game, &[12], t);
        game.dispatch(GameEvent::Tick, t + ms(2000));

        for _ in 0..3 {
            let ready = finish_playback(&mut game);
            t = play_step(&mut game, &[2], ready);
        }

        let state = game.state();
        assert_eq!(state.phase(), Phase::GameOver);
        assert_eq!(state.lives(), 0);
        assert!(game.presenter().calls.contains(&Call::GameOver(10, 2)));
        assert_eq!(game.next_deadline(), None);

        game.presenter_mut().clear();
        game.dispatch(GameEvent::Activate(1), t + ms(10));
        game.dispatch(GameEvent::Start, t + ms(20));
        game.dispatch(GameEvent::Replay, t + ms(30));
        game.dispatch(GameEvent::Tick, t + ms(10_000));
        assert!(game.presenter().calls.is_empty());
        assert_eq!(game.state().phase(), Phase::GameOver);

        game.dispatch(GameEvent::Restart, t + ms(10_000));
        assert_eq!(game.state().phase(), Phase::Idle);
        assert_eq!((game.state().score(), game.state().level(), game.state().lives()), (0, 1, 3));
        game.dispatch(GameEvent::Start, t + ms(10_000));
        assert!(matches!(game.state().phase(), Phase::ShowingPattern(_)));
    }

    #[test]
    fn test_invisible_key_changes_nothing() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12, 16]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);
        game.presenter_mut().clear();

        game.dispatch(GameEvent::Activate(3), t);
        assert_eq!(game.open_step(), None);
        assert_eq!(game.next_deadline(), None);
        assert!(game.presenter().calls.is_empty());

        game.dispatch(GameEvent::Activate(12), t);
        game.dispatch(GameEvent::Activate(30), t + ms(250));
        // the invisible press did not push the deadline out
        assert_eq!(game.next_deadline(), Some(t + QUIET));
        assert_eq!(game.presenter().calls, vec![Call::Pressed(12)]);
    }

    #[test]
    fn test_input_gated_while_showing_pattern() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12], &[14]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        game.dispatch(GameEvent::Tick, t0 + ms(1100));
        assert_eq!(game.state().phase(), Phase::ShowingPattern(Playback::Lit(0)));

        game.presenter_mut().clear();
        game.dispatch(GameEvent::Activate(12), t0 + ms(1200));
        game.dispatch(GameEvent::Deactivate(12), t0 + ms(1250));
        assert_eq!(game.open_step(), None);
        assert!(game.presenter().calls.is_empty());
    }

    #[test]
    fn test_playback_timing() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12], &[14]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        // lead-in 1000, then (600 lit + 300 gap) per step
        assert_eq!(game.next_deadline(), Some(t0 + ms(1000)));
        game.dispatch(GameEvent::Tick, t0 + ms(2499));
        assert_eq!(game.state().phase(), Phase::ShowingPattern(Playback::Lit(1)));
        game.dispatch(GameEvent::Tick, t0 + ms(2799));
        assert_eq!(game.state().phase(), Phase::ShowingPattern(Playback::Gap(1)));
        game.dispatch(GameEvent::Tick, t0 + ms(2800));
        assert!(game.accepts_input());
    }

    #[test]
    fn test_late_tick_lights_one_step_at_a_time() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12], &[14]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        // step 1 was lit 1000..1600, step 2 from 1900
        game.dispatch(GameEvent::Tick, t0 + ms(2000));
        assert_eq!(game.state().phase(), Phase::ShowingPattern(Playback::Lit(1)));
        assert_eq!(game.presenter().shown_steps(), vec![Step::single(14)]);
        assert_eq!(game.next_deadline(), Some(t0 + ms(2500)));
    }

    #[test]
    fn test_press_after_quiet_period_starts_new_step() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12], &[14]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);

        game.dispatch(GameEvent::Activate(12), t);
        // no tick between the quiet deadline and the next press
        game.dispatch(GameEvent::Activate(14), t + QUIET + ms(100));
        assert_eq!(game.state().response(), &[Step::single(12)]);
        assert_eq!(game.open_step().map(|s| s.len()), Some(1));

        game.dispatch(GameEvent::Tick, t + QUIET * 2 + ms(100));
        assert_eq!(game.state().phase(), Phase::LevelComplete);
        assert_eq!(game.state().lives(), 3);
        assert_eq!(
            game.state().response(),
            &[Step::single(12), Step::single(14)]
        );
    }

    #[test]
    fn test_press_after_quiet_period_ends_level_first() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);

        game.dispatch(GameEvent::Activate(12), t);
        game.dispatch(GameEvent::Activate(13), t + QUIET);
        assert_eq!(game.state().phase(), Phase::LevelComplete);
        assert_eq!(game.state().response(), &[Step::single(12)]);
        assert_eq!(game.open_step(), None);
    }

    #[test]
    fn test_steps_verified_as_they_arrive() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12], &[14], &[16]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);

        let t = play_step(&mut game, &[12], t);
        assert_eq!(game.state().phase(), Phase::AwaitingInput);
        assert_eq!(game.state().response(), &[Step::single(12)]);
        assert!(game.presenter().calls.contains(&Call::Progress(1, 3)));

        play_step(&mut game, &[15], t + ms(100));
        assert_eq!(game.state().phase(), Phase::PatternFailed);
        assert_eq!(game.state().response().len(), 2);
    }

    #[test]
    fn test_slow_chord_splits_into_two_steps() {
        let policy = policy(vec![fixed(KeyRange::octaves(1, 1), &[&[0, 4]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);

        play_step(&mut game, &[0], t);
        assert_eq!(game.state().phase(), Phase::PatternFailed);
        assert_eq!(game.presenter().flashes()[0], (Step::single(0), false));
    }

    #[test]
    fn test_generated_pattern_round_trip() {
        let rule = LevelRule {
            visible: KeyRange::octaves(1, 3),
            quiet: QUIET,
            length: 5..=9,
            tier: Tier::Advanced,
        };
        let policy = policy(vec![rule]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let mut t = finish_playback(&mut game);

        let shown = game.presenter().shown_steps();
        assert_eq!(shown.as_slice(), game.state().pattern().steps());
        for step in &shown {
            t = play_step(&mut game, step.keys(), t + ms(50));
        }
        assert_eq!(game.state().phase(), Phase::LevelComplete);
        assert_eq!(game.state().response(), shown.as_slice());
    }

    #[test]
    fn test_replay_restarts_the_attempt() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12], &[14]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);
        let t = play_step(&mut game, &[12], t);
        game.dispatch(GameEvent::Activate(14), t);

        game.dispatch(GameEvent::Replay, t + ms(10));
        assert_eq!(game.state().phase(), Phase::ShowingPattern(Playback::LeadIn));
        assert!(game.state().response().is_empty());
        assert_eq!(game.open_step(), None);
        assert_eq!(game.state().lives(), 3);

        finish_playback(&mut game);
        assert_eq!(game.presenter().shown_steps().len(), 4);
    }

    #[test]
    fn test_restart_cancels_pending_transition() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);
        let t = play_step(&mut game, &[12], t);
        assert_eq!(game.state().phase(), Phase::LevelComplete);

        game.dispatch(GameEvent::Restart, t);
        assert_eq!(game.next_deadline(), None);
        game.dispatch(GameEvent::Tick, t + ms(60_000));
        assert_eq!(game.state().phase(), Phase::Idle);
        assert_eq!(game.state().level(), 1);
    }

    #[test]
    fn test_visible_range_changes_when_next_round_starts() {
        let policy = policy(vec![
            fixed(KeyRange::octaves(2, 2), &[&[12]]),
            fixed(KeyRange::octaves(1, 3), &[&[30]]),
        ]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let t = finish_playback(&mut game);
        let t = play_step(&mut game, &[12], t);

        assert_eq!(game.state().level(), 2);
        assert_eq!(game.state().visible(), KeyRange::octaves(2, 2));

        game.presenter_mut().clear();
        game.dispatch(GameEvent::Tick, t + ms(2000));
        assert_eq!(game.state().visible(), KeyRange::octaves(1, 3));
        assert_eq!(game.presenter().calls[0], Call::Rebuild(KeyRange::octaves(1, 3)));
    }

    #[test]
    fn test_start_only_from_idle() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        let t0 = Instant::now();
        game.dispatch(GameEvent::Start, t0);
        let deadline = game.next_deadline();
        game.dispatch(GameEvent::Start, t0 + ms(500));
        assert_eq!(game.next_deadline(), deadline);
    }

    #[test]
    #[should_panic(expected = "outside 0..36")]
    fn test_key_outside_keyspace_is_fatal() {
        let policy = policy(vec![fixed(KeyRange::octaves(2, 2), &[&[12]])]);
        let keys = policy.keyspace();
        let mut game = new_game(&keys, policy);
        game.dispatch(GameEvent::Activate(40), Instant::now());
    }
}
