//! Terminal front end: draws the keyboard, routes key presses into the game
//! and sounds notes through the synth.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use log::{debug, info};
use rand::Rng;

use crate::error::Error;
use crate::freeplay::FreePlay;
use crate::game::{Game, GameEvent};
use crate::keymap::{char_to_key, key_to_char};
use crate::keyspace::{KeyRange, KeySpace, Mode, KEYS_PER_OCTAVE};
use crate::pattern::Step;
use crate::policy::GamePolicy;
use crate::presentation::Presentation;
use crate::synth::AudioEngine;

/// Longest the loop sleeps between redraws
const FRAME: Duration = Duration::from_millis(50);

const PROGRESS_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Lit,
    Pressed,
    Correct,
    Wrong,
}

impl Mark {
    fn color(self) -> Color {
        match self {
            Mark::Lit => Color::Yellow,
            Mark::Pressed => Color::Cyan,
            Mark::Correct => Color::Green,
            Mark::Wrong => Color::Red,
        }
    }
}

/// A `Presentation` that renders to the terminal.
pub struct TerminalView<'k> {
    keys: &'k KeySpace,
    audio: Option<AudioEngine>,
    title: String,
    feedback: Duration,
    note: Duration,
    mode: Mode,
    visible: KeyRange,
    /// Transient key colours and when they expire
    marks: BTreeMap<usize, (Mark, Instant)>,
    scoreboard: (u32, u32, u32),
    progress: (usize, usize),
    prompt: Option<String>,
    game_over: Option<(u32, u32)>,
    /// Keys of the chord the player is still holding together
    composing: Vec<usize>,
    dirty: bool,
}

impl<'k> TerminalView<'k> {
    pub fn new(keys: &'k KeySpace, policy: &GamePolicy, audio: Option<AudioEngine>) -> Self {
        Self {
            keys,
            audio,
            title: policy.name.clone(),
            feedback: policy.timing.feedback,
            note: policy.sound.note,
            mode: Mode::Game,
            visible: keys.full_range(),
            marks: BTreeMap::new(),
            scoreboard: (0, 1, policy.lives),
            progress: (0, 0),
            prompt: None,
            game_over: None,
            composing: Vec::new(),
            dirty: true,
        }
    }

    fn set_mode(&mut self, mode: Mode, visible: KeyRange) {
        self.mode = mode;
        self.visible = visible;
        self.marks.clear();
        self.dirty = true;
    }

    fn mark(&mut self, index: usize, mark: Mark, duration: Duration) {
        self.marks.insert(index, (mark, Instant::now() + duration));
        self.dirty = true;
    }

    /// Sound and light a key pressed in free play.
    fn strike(&mut self, index: usize) {
        if let Some(audio) = &self.audio {
            audio.strike(self.keys.frequency_of(index));
        }
        self.mark(index, Mark::Pressed, self.note);
    }

    fn expire(&mut self, now: Instant) {
        let before = self.marks.len();
        self.marks.retain(|_, (_, until)| *until > now);
        if self.marks.len() != before {
            self.dirty = true;
        }
    }

    fn set_composing(&mut self, composing: Vec<usize>) {
        if composing != self.composing {
            self.composing = composing;
            self.dirty = true;
        }
    }

    fn silence(&self) {
        if let Some(audio) = &self.audio {
            audio.silence();
        }
    }

    fn draw(&mut self, out: &mut impl Write, free: &FreePlay) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.dirty = false;

        queue!(out, MoveTo(0, 0), Clear(ClearType::All))?;
        let mode = match self.mode {
            Mode::Game => "memory game",
            Mode::Free => "free play",
        };
        line(out, 0, &format!("echokeys - {} ({})", mode, self.title))?;

        let mut row = 2;
        match self.mode {
            Mode::Game => {
                let (score, level, lives) = self.scoreboard;
                line(
                    out,
                    row,
                    &format!("Score: {}  Level: {}  Lives: {}", score, level, lives),
                )?;
                let (done, total) = self.progress;
                let mut progress = progress_bar(done, total);
                if !self.composing.is_empty() {
                    let labels: Vec<String> =
                        self.composing.iter().map(|&i| self.keys.key(i).label()).collect();
                    progress.push_str(&format!("  + {}", labels.join(" ")));
                }
                line(out, row + 1, &progress)?;
            }
            Mode::Free => {
                line(out, row, &format!("Notes played: {}", free.total()))?;
                line(out, row + 1, &format!("Range: {}", free.range()))?;
            }
        }
        row += 2;
        if let Some(prompt) = &self.prompt {
            queue!(
                out,
                MoveTo(0, row),
                SetForegroundColor(Color::White),
                Print(prompt),
                ResetColor
            )?;
        }
        row += 2;

        for octave in 1..=self.keys.octaves() {
            self.draw_octave(out, row, self.keys.octave_range(octave))?;
            row += 3;
        }

        if let Some((score, level)) = self.game_over {
            queue!(
                out,
                MoveTo(0, row),
                SetForegroundColor(Color::Red),
                Print(format!(
                    "GAME OVER  final score {} at level {}  (Backspace to restart)",
                    score, level
                )),
                ResetColor
            )?;
            row += 2;
        }

        if self.mode == Mode::Free {
            let history: Vec<String> = free
                .history()
                .map(|i| self.keys.key(i).label())
                .collect();
            line(out, row, &format!("History: {}", history.join(" ")))?;
            row += 2;
        }

        line(
            out,
            row,
            "Enter start  Space replay  Backspace restart  Tab game/free  Del clear  Esc quit",
        )?;
        out.flush()
    }

    /// One row of trigger characters, one row of note labels.
    fn draw_octave(&self, out: &mut impl Write, row: u16, range: KeyRange) -> io::Result<()> {
        for (column, index) in range.iter().enumerate() {
            let x = (column * 5) as u16;
            let key = self.keys.key(index);
            let trigger = key_to_char(index).unwrap_or(' ');

            let (fg, bg) = if !self.visible.contains(index) {
                (Color::DarkGrey, Color::Reset)
            } else if let Some((mark, _)) = self.marks.get(&index) {
                (Color::Black, mark.color())
            } else if self.keys.is_white(index) {
                (Color::Black, Color::White)
            } else {
                (Color::White, Color::DarkGrey)
            };

            queue!(
                out,
                MoveTo(x, row),
                SetForegroundColor(fg),
                SetBackgroundColor(bg),
                Print(format!(" {} ", trigger)),
                ResetColor,
                MoveTo(x, row + 1),
                SetForegroundColor(if self.visible.contains(index) {
                    Color::Reset
                } else {
                    Color::DarkGrey
                }),
                Print(format!("{:<4}", key.label())),
                ResetColor
            )?;
        }
        Ok(())
    }
}

impl Presentation for TerminalView<'_> {
    fn rebuild_keyboard(&mut self, visible: KeyRange) {
        self.visible = visible;
        self.marks.clear();
        self.dirty = true;
    }

    fn show_step(&mut self, step: &Step, duration: Duration) {
        for &index in step.keys() {
            self.mark(index, Mark::Lit, duration);
        }
        if let Some(audio) = &self.audio {
            let freqs = step.keys().iter().map(|&i| self.keys.frequency_of(i)).collect();
            audio.play(freqs, duration);
        }
    }

    fn flash_feedback(&mut self, step: &Step, correct: bool) {
        let mark = if correct { Mark::Correct } else { Mark::Wrong };
        for &index in step.keys() {
            self.mark(index, mark, self.feedback);
        }
    }

    fn key_pressed(&mut self, index: usize) {
        self.strike(index);
    }

    fn key_released(&mut self, index: usize) {
        if matches!(self.marks.get(&index), Some((Mark::Pressed, _))) {
            self.marks.remove(&index);
            self.dirty = true;
        }
    }

    fn update_scoreboard(&mut self, score: u32, level: u32, lives: u32) {
        self.scoreboard = (score, level, lives);
        self.dirty = true;
    }

    fn update_progress(&mut self, done: usize, total: usize) {
        self.progress = (done, total);
        self.dirty = true;
    }

    fn show_prompt(&mut self, text: &str) {
        self.prompt = Some(text.to_string());
        self.dirty = true;
    }

    fn hide_prompt(&mut self) {
        self.prompt = None;
        self.dirty = true;
    }

    fn show_game_over(&mut self, final_score: u32, final_level: u32) {
        self.game_over = Some((final_score, final_level));
        self.dirty = true;
    }

    fn hide_game_over(&mut self) {
        self.game_over = None;
        self.dirty = true;
    }
}

fn line(out: &mut impl Write, row: u16, text: &str) -> io::Result<()> {
    queue!(out, MoveTo(0, row), Print(text))
}

fn progress_bar(done: usize, total: usize) -> String {
    if total == 0 {
        return String::new();
    }
    let filled = done.min(total) * PROGRESS_WIDTH / total;
    format!(
        "[{}{}] {}/{}",
        "#".repeat(filled),
        ".".repeat(PROGRESS_WIDTH - filled),
        done,
        total
    )
}

/// What a key press means outside the piano keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Start,
    Replay,
    Restart,
    SwitchMode,
    ClearHistory,
    Quit,
}

fn control(code: KeyCode) -> Option<Control> {
    match code {
        KeyCode::Enter => Some(Control::Start),
        KeyCode::Char(' ') => Some(Control::Replay),
        KeyCode::Backspace => Some(Control::Restart),
        KeyCode::Tab => Some(Control::SwitchMode),
        KeyCode::Delete => Some(Control::ClearHistory),
        KeyCode::Esc => Some(Control::Quit),
        _ => None,
    }
}

/// Piano key for a character, if the keyspace has it.
fn piano_key(code: KeyCode, keys: &KeySpace) -> Option<usize> {
    match code {
        KeyCode::Char(c) => char_to_key(c).filter(|&i| i < keys.len()),
        _ => None,
    }
}

/// Run the interactive session until Esc.
pub fn run<R: Rng>(
    keys: &KeySpace,
    policy: GamePolicy,
    rng: R,
    audio: Option<AudioEngine>,
    mode: Mode,
    free_range: KeyRange,
) -> Result<(), Error> {
    let view = TerminalView::new(keys, &policy, audio);
    let mut game = Game::new(keys, policy, rng, view);
    let mut free = FreePlay::new(free_range);
    if mode == Mode::Free {
        game.presenter_mut().set_mode(Mode::Free, free_range);
    }

    let mut stdout = io::stdout();

    terminal::enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, Hide)?;

    // Some terminals (macOS in particular) accept the enhancement flag but
    // never send release events.
    let has_key_release = if cfg!(target_os = "macos") {
        false
    } else {
        queue!(
            stdout,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
        )
        .is_ok()
            && stdout.flush().is_ok()
    };
    debug!("key release reporting: {}", has_key_release);

    let result = event_loop(&mut game, &mut free, &mut stdout, has_key_release);

    game.presenter().silence();
    if has_key_release {
        let _ = execute!(stdout, PopKeyboardEnhancementFlags);
    }
    let _ = execute!(stdout, Show, LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();

    result
}

fn event_loop<R: Rng>(
    game: &mut Game<'_, TerminalView<'_>, R>,
    free: &mut FreePlay,
    stdout: &mut io::Stdout,
    has_key_release: bool,
) -> Result<(), Error> {
    let keys = game.presenter().keys;
    loop {
        let now = Instant::now();
        game.dispatch(GameEvent::Tick, now);
        let composing: Vec<usize> = game
            .open_step()
            .map(|open| open.iter().copied().collect())
            .unwrap_or_default();
        game.presenter_mut().set_composing(composing);
        game.presenter_mut().expire(now);
        game.presenter_mut().draw(stdout, free)?;

        let timeout = game
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(FRAME)
            .min(FRAME);
        if !event::poll(timeout)? {
            continue;
        }

        let (code, kind) = match event::read()? {
            Event::Key(KeyEvent { code, kind, .. }) => (code, kind),
            Event::Resize(..) => {
                game.presenter_mut().dirty = true;
                continue;
            }
            _ => continue,
        };
        let now = Instant::now();
        let mode = game.presenter().mode;

        if let Some(index) = piano_key(code, keys) {
            match (kind, mode) {
                (KeyEventKind::Press, Mode::Game) => {
                    if game.accepts_input() {
                        game.dispatch(GameEvent::Activate(index), now);
                    }
                }
                (KeyEventKind::Release, Mode::Game) => {
                    if game.accepts_input() {
                        game.dispatch(GameEvent::Deactivate(index), now);
                    }
                }
                (KeyEventKind::Press, Mode::Free) => {
                    if !has_key_release {
                        free.release(index);
                    }
                    if free.activate(index) {
                        game.presenter_mut().strike(index);
                    }
                }
                (KeyEventKind::Release, Mode::Free) => {
                    free.release(index);
                    game.presenter_mut().key_released(index);
                }
                _ => {}
            }
            continue;
        }

        if kind != KeyEventKind::Press {
            continue;
        }
        match control(code) {
            Some(Control::Quit) => return Ok(()),
            Some(Control::Start) if mode == Mode::Game => game.dispatch(GameEvent::Start, now),
            Some(Control::Replay) if mode == Mode::Game => game.dispatch(GameEvent::Replay, now),
            Some(Control::Restart) if mode == Mode::Game => game.dispatch(GameEvent::Restart, now),
            Some(Control::SwitchMode) => {
                game.dispatch(GameEvent::Restart, now);
                game.presenter().silence();
                free.release_all();
                let next = match mode {
                    Mode::Game => Mode::Free,
                    Mode::Free => Mode::Game,
                };
                let visible = keys.visible_range(game.state().level(), next);
                let view = game.presenter_mut();
                view.set_mode(next, visible);
                info!("switched to {:?} mode", next);
            }
            Some(Control::ClearHistory) if mode == Mode::Free => {
                free.clear();
                game.presenter_mut().dirty = true;
            }
            _ => {}
        }
    }
}

/// Print the key table for `echokeys keys`.
pub fn print_keys(keys: &KeySpace) {
    println!("{:>5}  {:<5} {:<6} {:>9}  {}", "index", "note", "colour", "Hz", "key");
    for key in keys.keys() {
        if key.index % KEYS_PER_OCTAVE == 0 && key.index > 0 {
            println!();
        }
        println!(
            "{:>5}  {:<5} {:<6} {:>9.2}  {}",
            key.index,
            key.label(),
            if key.is_white() { "white" } else { "black" },
            key.frequency,
            key_to_char(key.index).unwrap_or('-')
        );
    }
}
