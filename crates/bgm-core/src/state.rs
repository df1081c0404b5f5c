//! Observable controller state.

use serde::{Deserialize, Serialize};

/// Whether the track is audible (or fading out towards a pause).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    #[default]
    Stopped,
    Playing,
}

/// Snapshot of everything a UI renders.
///
/// `volume` is the user-intended level and ignores mute; the resource's
/// actual output level is `Controller::output_volume`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub is_playing: bool,
    pub is_muted: bool,
    pub is_loaded: bool,
    pub volume: f32,
    /// Set when the host refused to start playback on its own.
    pub needs_interaction: bool,
}

impl ControllerState {
    pub fn new(volume: f32) -> Self {
        Self {
            is_playing: false,
            is_muted: false,
            is_loaded: false,
            volume,
            needs_interaction: false,
        }
    }

    pub fn phase(&self) -> PlaybackPhase {
        if self.is_playing {
            PlaybackPhase::Playing
        } else {
            PlaybackPhase::Stopped
        }
    }

    /// Level the resource should rest at when no fade is running.
    pub fn resting_volume(&self) -> f32 {
        if self.is_muted {
            0.0
        } else {
            self.volume
        }
    }
}
