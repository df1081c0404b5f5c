//! bgm-core — looping background track with frame-driven volume fades.
//!
//! One [`Controller`] owns one audio resource. Play fades in from silence,
//! pause fades out and then stops the resource, mute ramps to zero and
//! back. Fades are advanced by a [`FrameScheduler`] and only one is ever
//! in flight.
//!
//! # Architecture
//!
//! ```text
//! Controller   state machine, lifecycle, fade bookkeeping
//!   ├─ FrameScheduler   timer thread, host refresh callback, or manual clock
//!   └─ AudioResource    NativeTrack (symphonia + cpal) or MemoryResource
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod fade;
pub mod resource;
pub mod scheduler;
pub mod state;
pub mod track;

pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::{ConfigError, LoadError, PlaybackError};
pub use fade::{FadeCompletion, FadeOutcome};
pub use resource::{AudioResource, LoadBehavior, MemoryResource, ResourceEvent};
#[cfg(feature = "native")]
pub use resource::native::NativeTrack;
pub use scheduler::{FrameScheduler, ManualScheduler, TimerScheduler};
pub use state::{ControllerState, PlaybackPhase};
pub use track::TrackInfo;
