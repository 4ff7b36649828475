mod config;
mod error;
mod freeplay;
mod game;
mod input;
mod keymap;
mod keyspace;
mod note;
mod pattern;
mod policy;
mod presentation;
mod synth;
mod timer;
mod tui;

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fs::File;
use std::path::PathBuf;

use crate::error::Error;
use crate::keyspace::{KeyRange, Mode};
use crate::pattern::Tier;
use crate::policy::GamePolicy;
use crate::synth::AudioEngine;

#[derive(Parser)]
#[command(name = "echokeys", about = "Piano memory game for the terminal")]
#[command(version)]
struct Cli {
    /// Write debug output to the log file
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch a pattern, then play it back
    Play {
        /// Built-in rule set (classic, ladder, songbook)
        #[arg(long)]
        preset: Option<String>,

        /// Config file merged over the preset
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seed for the pattern generator
        #[arg(long)]
        seed: Option<u64>,

        /// Run without sound
        #[arg(long)]
        mute: bool,
    },

    /// Play freely with no scoring
    Free {
        /// Limit the keyboard to one octave
        #[arg(long)]
        octave: Option<u8>,

        #[arg(long)]
        mute: bool,
    },

    /// Print the key table
    Keys,

    /// Print the level table of a preset or config file
    Levels {
        #[arg(long)]
        preset: Option<String>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Play {
            preset,
            config,
            seed,
            mute,
        } => {
            let policy = config::load(preset.as_deref(), config.as_deref())?;
            let seed = seed.unwrap_or_else(rand::random);
            log::info!("policy {}, seed {}", policy.name, seed);
            let keys = policy.keyspace();
            let audio = open_audio(&policy, mute);
            let free_range = policy.free_range;
            tui::run(
                &keys,
                policy,
                ChaCha8Rng::seed_from_u64(seed),
                audio,
                Mode::Game,
                free_range,
            )
        }
        Command::Free { octave, mute } => {
            let policy = config::load(None, None)?;
            let keys = policy.keyspace();
            let free_range = match octave {
                Some(n) if n >= 1 && n <= keys.octaves() => keys.octave_range(n),
                Some(n) => {
                    return Err(Error::Config(error::ConfigError::Invalid(format!(
                        "octave must be 1..={}, got {}",
                        keys.octaves(),
                        n
                    ))));
                }
                None => policy.free_range,
            };
            let audio = open_audio(&policy, mute);
            tui::run(
                &keys,
                policy,
                ChaCha8Rng::seed_from_u64(rand::random()),
                audio,
                Mode::Free,
                free_range,
            )
        }
        Command::Keys => {
            let policy = config::load(None, None)?;
            tui::print_keys(&policy.keyspace());
            Ok(())
        }
        Command::Levels { preset, config } => {
            let policy = config::load(preset.as_deref(), config.as_deref())?;
            print_levels(&policy);
            Ok(())
        }
    }
}

fn open_audio(policy: &GamePolicy, mute: bool) -> Option<AudioEngine> {
    if mute {
        log::info!("sound muted");
        return None;
    }
    match AudioEngine::new(&policy.sound) {
        Ok(engine) => Some(engine),
        Err(e) => {
            log::warn!(target: "audio", "{}; running silent", e);
            None
        }
    }
}

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let log_path = dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("echokeys")
        .join("echokeys.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path)
        .or_else(|_| File::create(std::env::temp_dir().join("echokeys.log")))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot create log file: {}", e);
            return;
        }
    };

    if WriteLogger::init(log_level, Config::default(), log_file).is_ok() {
        log::info!("echokeys starting (log level: {:?})", log_level);
    }
}

fn print_levels(policy: &GamePolicy) {
    println!(
        "{}: {} lives, {} points per level",
        policy.name, policy.lives, policy.points_per_level
    );
    println!();
    for (i, rule) in policy.levels.iter().enumerate() {
        println!(
            "Level {}{}: {}, quiet {} ms",
            i + 1,
            if i + 1 == policy.levels.len() { "+" } else { "" },
            octave_label(rule.visible),
            rule.quiet.as_millis()
        );
        match &rule.tier {
            Tier::SingleNote => println!(
                "  single notes, {}-{} steps",
                rule.length.start(),
                rule.length.end()
            ),
            Tier::Chord { size } => println!(
                "  chords of {}-{} keys, {}-{} steps",
                size.start(),
                size.end(),
                rule.length.start(),
                rule.length.end()
            ),
            Tier::Mixed { chord_chance, size } => println!(
                "  {:.0}% chords of {}-{} keys, {}-{} steps",
                chord_chance * 100.0,
                size.start(),
                size.end(),
                rule.length.start(),
                rule.length.end()
            ),
            Tier::Advanced => println!(
                "  mixed shapes up to 5 keys, {}-{} steps",
                rule.length.start(),
                rule.length.end()
            ),
            Tier::Songbook { songs } => {
                for song in songs {
                    println!("  \"{}\" ({} steps)", song.title, song.steps.len());
                }
            }
        }
    }
}

fn octave_label(range: KeyRange) -> String {
    let first = range.start() / keyspace::KEYS_PER_OCTAVE + 1;
    let last = range.end() / keyspace::KEYS_PER_OCTAVE;
    if first == last {
        format!("octave {}", first)
    } else {
        format!("octaves {}-{}", first, last)
    }
}
