//! The audio resource the controller drives.
//!
//! The controller never decodes or outputs audio itself. It talks to an
//! [`AudioResource`]: something with a source, a loop flag, a volume, a
//! play/pause primitive, and two notifications ("can play through" and
//! "load error").

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{LoadError, PlaybackError};
use crate::fade::clamp_volume;

#[cfg(feature = "native")]
pub mod native;

/// Notifications raised by a resource while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// Enough is buffered to play to the end without stalling.
    CanPlayThrough,
    Error(LoadError),
}

/// Receiver for [`ResourceEvent`]s.
pub type EventSink = Arc<dyn Fn(ResourceEvent) + Send + Sync>;

/// Trait for audio resources.
///
/// All methods take `&self`; implementations manage their own concurrency.
/// Events may be delivered from any thread, and may be delivered
/// synchronously from `load`, but never from any other method (the
/// controller calls those while holding its state lock).
pub trait AudioResource: Send + Sync {
    fn source(&self) -> String;
    fn set_source(&self, uri: &str);
    fn looping(&self) -> bool;
    fn set_looping(&self, looping: bool);
    fn volume(&self) -> f32;
    /// Values outside 0.0-1.0 are clamped.
    fn set_volume(&self, volume: f32);
    /// Register the event receiver, replacing any previous one.
    fn subscribe(&self, sink: EventSink);
    fn unsubscribe(&self);
    /// Begin preloading the current source.
    fn load(&self);
    fn play(&self) -> Result<(), PlaybackError>;
    fn pause(&self);
    fn is_playing(&self) -> bool;
    /// Stop playback and drop whatever the resource holds on to.
    fn release(&self);
}

// ---------------------------------------------------------------------------
// MemoryResource
// ---------------------------------------------------------------------------

/// What [`MemoryResource::load`] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadBehavior {
    /// Emit `CanPlayThrough` from inside `load`.
    Ready,
    /// Emit nothing; the host calls [`MemoryResource::emit`] later.
    Pending,
    /// Emit `Error` from inside `load`.
    Fail(LoadError),
}

#[derive(Default)]
struct MemoryState {
    source: String,
    looping: bool,
    volume: f32,
    playing: bool,
    released: bool,
    blocked: Option<String>,
}

/// Headless resource with no audio output.
///
/// Tracks the attributes it is given and reports whatever load outcome it
/// was built with. Useful for hosts that render audio elsewhere and for
/// driving the controller deterministically.
pub struct MemoryResource {
    state: Mutex<MemoryState>,
    behavior: LoadBehavior,
    sink: Mutex<Option<EventSink>>,
    subscribed: AtomicBool,
    play_calls: AtomicUsize,
    pause_calls: AtomicUsize,
    load_calls: AtomicUsize,
}

impl MemoryResource {
    pub fn new(behavior: LoadBehavior) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            behavior,
            sink: Mutex::new(None),
            subscribed: AtomicBool::new(false),
            play_calls: AtomicUsize::new(0),
            pause_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
        }
    }

    /// Loads instantly.
    pub fn ready() -> Self {
        Self::new(LoadBehavior::Ready)
    }

    /// Make every following `play()` reject, as a host autoplay policy would.
    /// `None` lifts the block.
    pub fn set_blocked(&self, reason: Option<&str>) {
        self.state.lock().blocked = reason.map(String::from);
    }

    /// Deliver an event to the current subscriber, if any.
    pub fn emit(&self, event: ResourceEvent) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn play_calls(&self) -> usize {
        self.play_calls.load(Ordering::SeqCst)
    }

    pub fn pause_calls(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryResource {
    fn default() -> Self {
        Self::ready()
    }
}

impl AudioResource for MemoryResource {
    fn source(&self) -> String {
        self.state.lock().source.clone()
    }

    fn set_source(&self, uri: &str) {
        let mut state = self.state.lock();
        state.source = uri.to_string();
        state.playing = false;
    }

    fn looping(&self) -> bool {
        self.state.lock().looping
    }

    fn set_looping(&self, looping: bool) {
        self.state.lock().looping = looping;
    }

    fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    fn set_volume(&self, volume: f32) {
        self.state.lock().volume = clamp_volume(volume);
    }

    fn subscribe(&self, sink: EventSink) {
        *self.sink.lock() = Some(sink);
        self.subscribed.store(true, Ordering::SeqCst);
    }

    fn unsubscribe(&self) {
        self.sink.lock().take();
        self.subscribed.store(false, Ordering::SeqCst);
    }

    fn load(&self) {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            LoadBehavior::Ready => self.emit(ResourceEvent::CanPlayThrough),
            LoadBehavior::Pending => {}
            LoadBehavior::Fail(err) => self.emit(ResourceEvent::Error(err.clone())),
        }
    }

    fn play(&self) -> Result<(), PlaybackError> {
        self.play_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.released {
            return Err(PlaybackError::Released);
        }
        if let Some(reason) = &state.blocked {
            return Err(PlaybackError::Blocked(reason.clone()));
        }
        state.playing = true;
        Ok(())
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().playing = false;
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.released = true;
        state.source.clear();
    }
}
