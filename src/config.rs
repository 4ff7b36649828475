use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::keymap;
use crate::keyspace::{KeyRange, KEYS_PER_OCTAVE};
use crate::pattern::{Song, Step, Tier};
use crate::policy::{GamePolicy, LevelRule, SoundSettings, Timing};

pub const PRESETS: [&str; 3] = ["classic", "ladder", "songbook"];
pub const DEFAULT_PRESET: &str = "classic";

const CLASSIC: &str = include_str!("../presets/classic.toml");
const LADDER: &str = include_str!("../presets/ladder.toml");
const SONGBOOK: &str = include_str!("../presets/songbook.toml");

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    /// Base preset a user file is merged over
    preset: Option<String>,
    name: Option<String>,
    octaves: Option<u8>,
    first_octave: Option<u8>,
    lives: Option<u32>,
    points_per_level: Option<u32>,
    #[serde(default)]
    timing: TimingConfig,
    #[serde(default)]
    sound: SoundConfig,
    #[serde(default)]
    free: FreeConfig,
    levels: Option<Vec<LevelConfig>>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TimingConfig {
    lead_in_ms: Option<u64>,
    highlight_ms: Option<u64>,
    step_gap_ms: Option<u64>,
    level_pause_ms: Option<u64>,
    failure_pause_ms: Option<u64>,
    feedback_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SoundConfig {
    volume: Option<f32>,
    note_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FreeConfig {
    octaves: Option<[u8; 2]>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LevelConfig {
    octaves: [u8; 2],
    quiet_ms: u64,
    #[serde(default = "default_length")]
    length: [usize; 2],
    tier: TierConfig,
}

fn default_length() -> [usize; 2] {
    [4, 6]
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TierConfig {
    Single,
    Chord { size: [usize; 2] },
    Mixed { chord_chance: f64, size: [usize; 2] },
    Advanced,
    Songbook { songs: Vec<SongConfig> },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SongConfig {
    title: String,
    steps: Vec<Vec<usize>>,
}

/// Resolve the game policy.
///
/// Precedence: an explicit `path` (must parse), then an explicit `preset`,
/// then the user's config file (ignored with a warning if broken), then the
/// classic preset. A config file is merged field by field over its base
/// preset; a `levels` list replaces the preset's levels wholesale.
pub fn load(preset: Option<&str>, path: Option<&Path>) -> Result<GamePolicy, ConfigError> {
    if let Some(path) = path {
        let user = read_file(path)?;
        let policy = resolve(preset, user)?;
        info!(target: "config", "loaded {}", path.display());
        return Ok(policy);
    }

    if preset.is_none() {
        if let Some(path) = user_config_path().filter(|p| p.exists()) {
            match read_file(&path).and_then(|user| resolve(None, user)) {
                Ok(policy) => {
                    info!(target: "config", "loaded {}", path.display());
                    return Ok(policy);
                }
                Err(e) => warn!(target: "config", "ignoring config {}: {}", path.display(), e),
            }
        }
    }

    build(parse_preset(preset.unwrap_or(DEFAULT_PRESET))?)
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("echokeys").join("config.toml"))
}

fn preset_source(name: &str) -> Option<&'static str> {
    match name {
        "classic" => Some(CLASSIC),
        "ladder" => Some(LADDER),
        "songbook" => Some(SONGBOOK),
        _ => None,
    }
}

fn parse_preset(name: &str) -> Result<ConfigFile, ConfigError> {
    let source = preset_source(name).ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))?;
    parse(source, &format!("preset {}", name))
}

fn parse(contents: &str, origin: &str) -> Result<ConfigFile, ConfigError> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, &path.display().to_string())
}

fn resolve(preset: Option<&str>, user: ConfigFile) -> Result<GamePolicy, ConfigError> {
    let base_name = preset
        .map(str::to_string)
        .or_else(|| user.preset.clone())
        .unwrap_or_else(|| DEFAULT_PRESET.to_string());
    let mut base = parse_preset(&base_name)?;
    merge(&mut base, user);
    build(base)
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    if user.name.is_some() {
        base.name = user.name;
    }
    if user.octaves.is_some() {
        base.octaves = user.octaves;
    }
    if user.first_octave.is_some() {
        base.first_octave = user.first_octave;
    }
    if user.lives.is_some() {
        base.lives = user.lives;
    }
    if user.points_per_level.is_some() {
        base.points_per_level = user.points_per_level;
    }
    merge_timing(&mut base.timing, user.timing);
    if user.sound.volume.is_some() {
        base.sound.volume = user.sound.volume;
    }
    if user.sound.note_ms.is_some() {
        base.sound.note_ms = user.sound.note_ms;
    }
    if user.free.octaves.is_some() {
        base.free.octaves = user.free.octaves;
    }
    if user.levels.is_some() {
        base.levels = user.levels;
    }
}

fn merge_timing(base: &mut TimingConfig, user: TimingConfig) {
    if user.lead_in_ms.is_some() {
        base.lead_in_ms = user.lead_in_ms;
    }
    if user.highlight_ms.is_some() {
        base.highlight_ms = user.highlight_ms;
    }
    if user.step_gap_ms.is_some() {
        base.step_gap_ms = user.step_gap_ms;
    }
    if user.level_pause_ms.is_some() {
        base.level_pause_ms = user.level_pause_ms;
    }
    if user.failure_pause_ms.is_some() {
        base.failure_pause_ms = user.failure_pause_ms;
    }
    if user.feedback_ms.is_some() {
        base.feedback_ms = user.feedback_ms;
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| invalid(format!("missing field '{}'", field)))
}

fn millis(value: Option<u64>, field: &str) -> Result<Duration, ConfigError> {
    required(value, field).map(Duration::from_millis)
}

fn octave_span(span: [u8; 2], octaves: u8, what: &str) -> Result<KeyRange, ConfigError> {
    let [first, last] = span;
    if first < 1 || first > last || last > octaves {
        return Err(invalid(format!(
            "{}: octaves [{}, {}] must satisfy 1 <= first <= last <= {}",
            what, first, last, octaves
        )));
    }
    Ok(KeyRange::octaves(first, last))
}

fn size_range(size: [usize; 2], visible: KeyRange, what: &str) -> Result<std::ops::RangeInclusive<usize>, ConfigError> {
    let [min, max] = size;
    if min < 2 || min > max || max > visible.len() {
        return Err(invalid(format!(
            "{}: chord size [{}, {}] must satisfy 2 <= min <= max <= {}",
            what,
            min,
            max,
            visible.len()
        )));
    }
    Ok(min..=max)
}

/// Validate a fully merged file and convert it to a policy.
fn build(file: ConfigFile) -> Result<GamePolicy, ConfigError> {
    // every key needs a trigger character
    let max_octaves = (keymap::capacity() / KEYS_PER_OCTAVE) as u8;
    let octaves = required(file.octaves, "octaves")?;
    if octaves < 1 || octaves > max_octaves {
        return Err(invalid(format!("octaves must be 1..={}, got {}", max_octaves, octaves)));
    }
    let first_octave = required(file.first_octave, "first_octave")?;
    if first_octave > 6 {
        return Err(invalid(format!("first_octave must be 0..=6, got {}", first_octave)));
    }
    let lives = required(file.lives, "lives")?;
    if lives == 0 {
        return Err(invalid("lives must be at least 1"));
    }

    let timing = Timing {
        lead_in: millis(file.timing.lead_in_ms, "timing.lead_in_ms")?,
        highlight: millis(file.timing.highlight_ms, "timing.highlight_ms")?,
        step_gap: millis(file.timing.step_gap_ms, "timing.step_gap_ms")?,
        level_pause: millis(file.timing.level_pause_ms, "timing.level_pause_ms")?,
        failure_pause: millis(file.timing.failure_pause_ms, "timing.failure_pause_ms")?,
        feedback: millis(file.timing.feedback_ms, "timing.feedback_ms")?,
    };

    let volume = required(file.sound.volume, "sound.volume")?;
    if !(0.0..=1.0).contains(&volume) {
        return Err(invalid(format!("sound.volume must be 0..=1, got {}", volume)));
    }
    let sound = SoundSettings {
        volume,
        note: millis(file.sound.note_ms, "sound.note_ms")?,
    };

    let free_range = octave_span(required(file.free.octaves, "free.octaves")?, octaves, "free")?;

    let level_configs = required(file.levels, "levels")?;
    if level_configs.is_empty() {
        return Err(invalid("at least one level is required"));
    }
    let levels = level_configs
        .into_iter()
        .enumerate()
        .map(|(i, level)| build_level(level, octaves, &format!("level {}", i + 1)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(GamePolicy {
        name: file.name.unwrap_or_else(|| "custom".to_string()),
        octaves,
        first_octave,
        lives,
        points_per_level: required(file.points_per_level, "points_per_level")?,
        timing,
        sound,
        free_range,
        levels,
    })
}

fn build_level(level: LevelConfig, octaves: u8, what: &str) -> Result<LevelRule, ConfigError> {
    let visible = octave_span(level.octaves, octaves, what)?;
    if level.quiet_ms == 0 {
        return Err(invalid(format!("{}: quiet_ms must be positive", what)));
    }
    let [min, max] = level.length;
    if min < 1 || min > max {
        return Err(invalid(format!(
            "{}: length [{}, {}] must satisfy 1 <= min <= max",
            what, min, max
        )));
    }

    let tier = match level.tier {
        TierConfig::Single => Tier::SingleNote,
        TierConfig::Chord { size } => Tier::Chord {
            size: size_range(size, visible, what)?,
        },
        TierConfig::Mixed { chord_chance, size } => {
            if !(0.0..=1.0).contains(&chord_chance) {
                return Err(invalid(format!(
                    "{}: chord_chance must be 0..=1, got {}",
                    what, chord_chance
                )));
            }
            Tier::Mixed {
                chord_chance,
                size: size_range(size, visible, what)?,
            }
        }
        TierConfig::Advanced => Tier::Advanced,
        TierConfig::Songbook { songs } => Tier::Songbook {
            songs: build_songs(songs, visible, what)?,
        },
    };

    Ok(LevelRule {
        visible,
        quiet: Duration::from_millis(level.quiet_ms),
        length: min..=max,
        tier,
    })
}

fn build_songs(songs: Vec<SongConfig>, visible: KeyRange, what: &str) -> Result<Vec<Song>, ConfigError> {
    if songs.is_empty() {
        return Err(invalid(format!("{}: songbook needs at least one song", what)));
    }
    songs
        .into_iter()
        .map(|song| {
            if song.steps.is_empty() {
                return Err(invalid(format!("{}: song '{}' has no steps", what, song.title)));
            }
            let steps = song
                .steps
                .into_iter()
                .map(|keys| {
                    let step = Step::new(keys)
                        .ok_or_else(|| invalid(format!("{}: song '{}' has an empty step", what, song.title)))?;
                    if !step.within(visible) {
                        return Err(invalid(format!(
                            "{}: song '{}' step {} outside {}",
                            what, song.title, step, visible
                        )));
                    }
                    Ok(step)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Song {
                title: song.title,
                steps,
            })
        })
        .collect()
}
