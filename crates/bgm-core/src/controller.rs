//! Playback controller: lifecycle, fades, and the play/pause state machine.
//!
//! One [`Controller`] wraps one looping track. All state sits behind a
//! single mutex, so operations are processed in call order. Fades advance
//! from frame callbacks that hold only a `Weak` reference back to the
//! controller and ignore themselves once a newer fade has replaced them.
//!
//! Lock discipline: resource methods are called with the state lock held;
//! resource events and watcher notifications are handled without it.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{ControllerConfig, MUTE_FADE_MS};
use crate::fade::{clamp_volume, Fade, FadeCompletion, FadeFinish, FadeOutcome};
use crate::resource::{AudioResource, ResourceEvent};
use crate::scheduler::{FrameHandle, FrameScheduler};
use crate::state::{ControllerState, PlaybackPhase};

/// Allocates the audio resource during `initialize`.
pub type ResourceFactory = Box<dyn Fn() -> Arc<dyn AudioResource> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Active,
    Disposed,
}

struct Inner {
    lifecycle: Lifecycle,
    resource: Option<Arc<dyn AudioResource>>,
    state: ControllerState,
    /// The one in-flight ramp, if any.
    fade: Option<Fade>,
    next_fade_id: u64,
    /// Bumped by every `play()`; a pending pause only fires if unchanged.
    epoch: u64,
    autoplay_tried: bool,
}

impl Inner {
    fn active_resource(&self) -> Option<Arc<dyn AudioResource>> {
        match self.lifecycle {
            Lifecycle::Active => self.resource.clone(),
            _ => None,
        }
    }
}

struct Shared {
    config: ControllerConfig,
    scheduler: Arc<dyn FrameScheduler>,
    factory: ResourceFactory,
    inner: Mutex<Inner>,
    watchers: Mutex<Vec<mpsc::Sender<ControllerState>>>,
}

/// Background track controller.
pub struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    pub fn new<F>(config: ControllerConfig, scheduler: Arc<dyn FrameScheduler>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn AudioResource> + Send + Sync + 'static,
    {
        let state = ControllerState::new(clamp_volume(config.volume));
        Self {
            shared: Arc::new(Shared {
                config,
                scheduler,
                factory: Box::new(factory),
                inner: Mutex::new(Inner {
                    lifecycle: Lifecycle::Uninitialized,
                    resource: None,
                    state,
                    fade: None,
                    next_fade_id: 0,
                    epoch: 0,
                    autoplay_tried: false,
                }),
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Allocate and configure the resource, then start preloading.
    ///
    /// Runs once. Later calls, and calls after `dispose`, are ignored.
    pub fn initialize(&self) {
        let resource = self.shared.with_inner(|shared, inner| {
            if inner.lifecycle != Lifecycle::Uninitialized {
                log::warn!("bgm: initialize ignored ({:?})", inner.lifecycle);
                return None;
            }

            let resource = (shared.factory)();
            resource.set_source(&shared.config.track);
            resource.set_looping(true);
            resource.set_volume(0.0);

            let weak = Arc::downgrade(shared);
            resource.subscribe(Arc::new(move |event: ResourceEvent| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_event(event);
                }
            }));

            inner.resource = Some(Arc::clone(&resource));
            inner.lifecycle = Lifecycle::Active;
            log::info!("bgm: initialized with track {}", shared.config.track);
            Some(resource)
        });

        // Outside the lock: loading may notify synchronously.
        if let Some(resource) = resource {
            resource.load();
        }
    }

    /// Cancel any fade, stop playback and release the resource.
    ///
    /// Runs once; also runs on drop.
    pub fn dispose(&self) {
        self.shared.with_inner(|shared, inner| {
            let was_active = inner.lifecycle == Lifecycle::Active;
            inner.lifecycle = Lifecycle::Disposed;
            if !was_active {
                return;
            }

            shared.cancel_fade(inner);
            if let Some(resource) = inner.resource.take() {
                resource.unsubscribe();
                resource.pause();
                resource.release();
            }
            inner.state.is_playing = false;
            log::info!("bgm: controller disposed");
        });
        self.shared.watchers.lock().clear();
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Start playback from silence and fade in to the resting volume.
    ///
    /// If the resource refuses to start, the controller stays stopped and
    /// flags `needs_interaction`. The completion settles when the fade-in
    /// finishes (`Skipped` when nothing started).
    pub fn play(&self) -> FadeCompletion {
        self.shared.with_inner(|shared, inner| shared.play_locked(inner))
    }

    /// Fade out, then pause.
    ///
    /// The pause happens even if the fade-out is cut short, unless a later
    /// `play()` is the reason it was cut short.
    pub fn pause(&self) -> FadeCompletion {
        self.shared.with_inner(|shared, inner| shared.pause_locked(inner))
    }

    pub fn toggle(&self) -> FadeCompletion {
        self.shared.with_inner(|shared, inner| {
            if inner.state.is_playing {
                shared.pause_locked(inner)
            } else {
                shared.play_locked(inner)
            }
        })
    }

    /// Flip mute. While playing this is a short fade; otherwise the new
    /// level is applied at once. During a pause fade-out only the flag
    /// changes and the returned completion is the fade-out's.
    pub fn toggle_mute(&self) -> FadeCompletion {
        self.shared.with_inner(|shared, inner| {
            let Some(resource) = inner.active_resource() else {
                return FadeCompletion::settled(FadeOutcome::Skipped);
            };
            inner.state.is_muted = !inner.state.is_muted;
            let target = inner.state.resting_volume();

            // A fade-out already ends at 0; let it run into its pause.
            if let Some(fade) = inner.fade.as_ref() {
                if matches!(fade.finish, FadeFinish::Pause { .. }) {
                    return fade.completion.clone();
                }
            }

            if !inner.state.is_playing {
                shared.cancel_fade(inner);
                resource.set_volume(target);
                return FadeCompletion::settled(FadeOutcome::Completed);
            }
            shared.start_fade(inner, &resource, target, MUTE_FADE_MS as f64, FadeFinish::Nothing)
        })
    }

    /// Set the user-intended volume (clamped to 0.0-1.0).
    ///
    /// Applied to the resource straight away unless a fade is running.
    pub fn set_volume(&self, volume: f32) {
        if !volume.is_finite() {
            log::warn!("bgm: ignoring non-finite volume {}", volume);
            return;
        }
        self.shared.with_inner(|_, inner| {
            let Some(resource) = inner.active_resource() else {
                return;
            };
            let volume = clamp_volume(volume);
            if inner.state.volume == volume {
                return;
            }
            inner.state.volume = volume;
            if inner.fade.is_none() {
                resource.set_volume(inner.state.resting_volume());
            }
        })
    }

    /// Ramp the resource volume to `target` over `duration`, replacing any
    /// running fade. Playback state is not touched.
    pub fn fade_to(&self, target: f32, duration: Duration) -> FadeCompletion {
        self.shared.with_inner(|shared, inner| {
            let Some(resource) = inner.active_resource() else {
                return FadeCompletion::settled(FadeOutcome::Skipped);
            };
            let ms = duration.as_secs_f64() * 1000.0;
            shared.start_fade(inner, &resource, target, ms, FadeFinish::Nothing)
        })
    }

    /// Stop the running fade where it is. Safe when nothing is running.
    pub fn cancel_fade(&self) {
        self.shared.with_inner(|shared, inner| shared.cancel_fade(inner));
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ControllerState {
        self.shared.inner.lock().state
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.state().phase()
    }

    pub fn is_playing(&self) -> bool {
        self.state().is_playing
    }

    pub fn is_muted(&self) -> bool {
        self.state().is_muted
    }

    pub fn is_loaded(&self) -> bool {
        self.state().is_loaded
    }

    pub fn volume(&self) -> f32 {
        self.state().volume
    }

    pub fn needs_interaction(&self) -> bool {
        self.state().needs_interaction
    }

    /// Level the resource is producing right now (0 before init).
    pub fn output_volume(&self) -> f32 {
        self.shared
            .inner
            .lock()
            .active_resource()
            .map(|r| r.volume())
            .unwrap_or(0.0)
    }

    pub fn is_fading(&self) -> bool {
        self.shared.inner.lock().fade.is_some()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    /// Receive a snapshot after every change to the observable state.
    pub fn watch(&self) -> mpsc::Receiver<ControllerState> {
        let (tx, rx) = mpsc::channel();
        self.shared.watchers.lock().push(tx);
        rx
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Internals (state lock held)
// ---------------------------------------------------------------------------

impl Shared {
    /// Run `f` under the state lock, then notify watchers if it changed
    /// the observable state.
    fn with_inner<R>(self: &Arc<Self>, f: impl FnOnce(&Arc<Self>, &mut Inner) -> R) -> R {
        let (result, changed) = {
            let mut inner = self.inner.lock();
            let before = inner.state;
            let result = f(self, &mut *inner);
            let after = inner.state;
            (result, (before != after).then_some(after))
        };
        if let Some(state) = changed {
            self.watchers.lock().retain(|tx| tx.send(state).is_ok());
        }
        result
    }

    fn handle_event(self: &Arc<Self>, event: ResourceEvent) {
        self.with_inner(|shared, inner| {
            if inner.lifecycle != Lifecycle::Active {
                return;
            }
            match event {
                ResourceEvent::CanPlayThrough => {
                    inner.state.is_loaded = true;
                    if shared.config.auto_play && !inner.autoplay_tried {
                        inner.autoplay_tried = true;
                        log::info!("bgm: track loaded, attempting autoplay");
                        shared.play_locked(inner);
                    }
                }
                ResourceEvent::Error(err) => {
                    log::warn!("bgm: audio loading error: {}", err);
                }
            }
        });
    }

    fn play_locked(self: &Arc<Self>, inner: &mut Inner) -> FadeCompletion {
        let Some(resource) = inner.active_resource() else {
            return FadeCompletion::settled(FadeOutcome::Skipped);
        };

        inner.epoch += 1;
        self.cancel_fade(inner);

        if resource.source() != self.config.track {
            log::debug!("bgm: restoring track source {}", self.config.track);
            resource.set_source(&self.config.track);
        }

        let target = inner.state.resting_volume();
        resource.set_volume(0.0);

        match resource.play() {
            Ok(()) => {
                inner.state.is_playing = true;
                inner.state.needs_interaction = false;
                if target > 0.0 {
                    let fade_in = self.config.fade_in_ms as f64;
                    self.start_fade(inner, &resource, target, fade_in, FadeFinish::Nothing)
                } else {
                    FadeCompletion::settled(FadeOutcome::Completed)
                }
            }
            Err(e) => {
                log::warn!("bgm: audio playback failed: {}", e);
                inner.state.is_playing = false;
                inner.state.needs_interaction = true;
                FadeCompletion::settled(FadeOutcome::Skipped)
            }
        }
    }

    fn pause_locked(self: &Arc<Self>, inner: &mut Inner) -> FadeCompletion {
        let Some(resource) = inner.active_resource() else {
            return FadeCompletion::settled(FadeOutcome::Skipped);
        };

        self.cancel_fade(inner);
        let finish = FadeFinish::Pause { epoch: inner.epoch };
        let fade_out = self.config.fade_out_ms as f64;
        self.start_fade(inner, &resource, 0.0, fade_out, finish)
    }

    fn start_fade(
        self: &Arc<Self>,
        inner: &mut Inner,
        resource: &Arc<dyn AudioResource>,
        target: f32,
        duration_ms: f64,
        finish: FadeFinish,
    ) -> FadeCompletion {
        self.cancel_fade(inner);

        inner.next_fade_id += 1;
        let id = inner.next_fade_id;
        let mut fade = Fade::new(
            id,
            resource.volume(),
            target,
            self.scheduler.now_ms(),
            duration_ms,
            finish,
        );
        log::debug!(
            "bgm: fade #{} {:.3} -> {:.3} over {}ms",
            id,
            fade.from,
            fade.to,
            fade.duration_ms
        );

        fade.frame = Some(self.schedule_tick(id));
        let completion = fade.completion.clone();
        inner.fade = Some(fade);
        completion
    }

    fn schedule_tick(self: &Arc<Self>, fade_id: u64) -> FrameHandle {
        let weak = Arc::downgrade(self);
        self.scheduler.schedule(Box::new(move |timestamp: f64| {
            if let Some(shared) = weak.upgrade() {
                shared.tick(fade_id, timestamp);
            }
        }))
    }

    fn tick(self: &Arc<Self>, fade_id: u64, timestamp: f64) {
        self.with_inner(|shared, inner| {
            let Some(resource) = inner.active_resource() else {
                return;
            };
            let Some(fade) = inner.fade.as_mut() else {
                return;
            };
            if fade.id != fade_id {
                return;
            }

            resource.set_volume(fade.volume_at(timestamp));
            if fade.progress(timestamp) < 1.0 {
                fade.frame = Some(shared.schedule_tick(fade_id));
                return;
            }

            if let Some(mut done) = inner.fade.take() {
                done.frame = None;
                shared.finish_fade(inner, done, FadeOutcome::Completed);
            }
        });
    }

    fn cancel_fade(&self, inner: &mut Inner) {
        let Some(mut fade) = inner.fade.take() else {
            return;
        };
        if let Some(frame) = fade.frame.take() {
            self.scheduler.cancel(frame);
        }
        log::debug!("bgm: fade #{} cancelled", fade.id);
        self.finish_fade(inner, fade, FadeOutcome::Cancelled);
    }

    fn finish_fade(&self, inner: &mut Inner, fade: Fade, outcome: FadeOutcome) {
        match fade.finish {
            FadeFinish::Nothing => {
                fade.completion.settle(outcome);
            }
            FadeFinish::Pause { epoch } if epoch == inner.epoch => {
                if let Some(resource) = &inner.resource {
                    resource.pause();
                }
                inner.state.is_playing = false;
                fade.completion.settle(FadeOutcome::Completed);
            }
            FadeFinish::Pause { .. } => {
                // A newer play() owns the resource now.
                fade.completion.settle(FadeOutcome::Cancelled);
            }
        }
    }
}
