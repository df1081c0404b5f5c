//! Error types.
//!
//! None of these escape the controller's public operations. They travel
//! from the audio resource to the log sink, and from config parsing to
//! whoever builds the controller.

use thiserror::Error;

/// Why the audio resource refused to start playback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// The host refused to start audio without a user gesture.
    #[error("playback blocked by host: {0}")]
    Blocked(String),
    #[error("no audio output device available")]
    NoOutputDevice,
    #[error("audio output device error: {0}")]
    Device(String),
    #[error("cannot open track {uri}: {reason}")]
    Source { uri: String, reason: String },
    #[error("audio resource already released")]
    Released,
}

/// Why the track could not be buffered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("track not found: {0}")]
    NotFound(String),
    #[error("unsupported or corrupt track {uri}: {reason}")]
    Decode { uri: String, reason: String },
    #[error("i/o error reading {uri}: {reason}")]
    Io { uri: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
