//! Controller configuration.
//!
//! Plain serde struct; every field has a default so a partial JSON
//! document (or none at all) is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Fade duration used by `toggle_mute` while playing.
pub const MUTE_FADE_MS: u64 = 250;

/// Track played when none is configured.
pub const DEFAULT_TRACK: &str = "audio/background.mp3";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// URI or file path of the looping track.
    pub track: String,
    /// Attempt playback once, automatically, after the track has loaded.
    pub auto_play: bool,
    /// Ramp duration when starting playback.
    pub fade_in_ms: u64,
    /// Ramp duration when stopping playback.
    pub fade_out_ms: u64,
    /// Initial target volume, 0.0-1.0.
    pub volume: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            track: DEFAULT_TRACK.into(),
            auto_play: true,
            fade_in_ms: 1500,
            fade_out_ms: 900,
            volume: 0.3,
        }
    }
}

impl ControllerConfig {
    /// Config for `track` with every other option at its default.
    pub fn for_track(track: impl Into<String>) -> Self {
        Self {
            track: track.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.volume.is_finite() || !(0.0..=1.0).contains(&self.volume) {
            return Err(ConfigError::Invalid(format!(
                "volume must be within 0.0-1.0 (got {})",
                self.volume
            )));
        }
        if self.track.trim().is_empty() {
            return Err(ConfigError::Invalid("track must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = ControllerConfig::default();
        assert!(config.auto_play);
        assert_eq!(config.fade_in_ms, 1500);
        assert_eq!(config.fade_out_ms, 900);
        assert_eq!(config.volume, 0.3);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            ControllerConfig::from_json(r#"{"auto_play": false, "fade_in_ms": 1000}"#).unwrap();
        assert!(!config.auto_play);
        assert_eq!(config.fade_in_ms, 1000);
        assert_eq!(config.fade_out_ms, 900);
        assert_eq!(config.track, DEFAULT_TRACK);
    }

    #[test]
    fn out_of_range_volume_rejected() {
        let err = ControllerConfig::from_json(r#"{"volume": 1.5}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_track_rejected() {
        let err = ControllerConfig::from_json(r#"{"track": "  "}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = ControllerConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, r#"{{"track": "/music/snow.ogg", "fade_out_ms": 500}}"#).unwrap();

        let config = ControllerConfig::load(file.path()).unwrap();
        assert_eq!(config.track, "/music/snow.ogg");
        assert_eq!(config.fade_out_ms, 500);
        assert_eq!(config.fade_in_ms, 1500);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = ControllerConfig::load("/nonexistent/bgm.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
