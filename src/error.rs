use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Problems turning a preset or config file into a game policy.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown preset '{0}' (available: {list})", list = crate::config::PRESETS.join(", "))]
    UnknownPreset(String),

    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// The audio device could not be opened. Never fatal: the game runs silent.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no output audio device available")]
    NoDevice,

    #[error("failed to get default output config: {0}")]
    Config(String),

    #[error("failed to build output stream: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("terminal: {0}")]
    Terminal(#[from] io::Error),
}
