//! Volume fades.
//!
//! A [`Fade`] is the in-flight ramp: where it started, where it goes, and
//! the frame request that will advance it next. The controller owns at most
//! one and drives it from frame callbacks; this module only holds the math
//! and the completion signal handed back to callers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::scheduler::FrameHandle;

/// How an operation's trailing fade ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeOutcome {
    /// The ramp reached its target.
    Completed,
    /// A later operation (or teardown) superseded the ramp.
    Cancelled,
    /// No ramp was needed, or the operation was a no-op.
    Skipped,
}

/// What the controller does once a fade settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FadeFinish {
    Nothing,
    /// Pause the resource, unless a `play()` started after this fade did.
    Pause { epoch: u64 },
}

#[derive(Default)]
struct Slot {
    outcome: Mutex<Option<FadeOutcome>>,
    settled: Condvar,
}

/// Settle-once completion shared between the controller and callers.
///
/// Clones observe the same outcome. The first `settle` wins.
#[derive(Clone, Default)]
pub struct FadeCompletion {
    slot: Arc<Slot>,
}

impl FadeCompletion {
    pub fn pending() -> Self {
        Self::default()
    }

    /// A completion that is already settled with `outcome`.
    pub fn settled(outcome: FadeOutcome) -> Self {
        let completion = Self::default();
        completion.settle(outcome);
        completion
    }

    pub(crate) fn settle(&self, outcome: FadeOutcome) -> bool {
        let mut guard = self.slot.outcome.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(outcome);
        self.slot.settled.notify_all();
        true
    }

    pub fn outcome(&self) -> Option<FadeOutcome> {
        *self.slot.outcome.lock()
    }

    pub fn is_settled(&self) -> bool {
        self.outcome().is_some()
    }

    /// Block until settled. Must not be called from the thread that drives
    /// the frame scheduler.
    pub fn wait(&self) -> FadeOutcome {
        let mut guard = self.slot.outcome.lock();
        loop {
            if let Some(outcome) = *guard {
                return outcome;
            }
            self.slot.settled.wait(&mut guard);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<FadeOutcome> {
        let mut guard = self.slot.outcome.lock();
        if guard.is_none() {
            self.slot.settled.wait_while_for(&mut guard, |o| o.is_none(), timeout);
        }
        *guard
    }
}

impl std::fmt::Debug for FadeCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FadeCompletion")
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// The active ramp.
pub(crate) struct Fade {
    pub id: u64,
    pub from: f32,
    pub to: f32,
    pub start_ms: f64,
    pub duration_ms: f64,
    pub frame: Option<FrameHandle>,
    pub finish: FadeFinish,
    pub completion: FadeCompletion,
}

impl Fade {
    pub fn new(id: u64, from: f32, to: f32, start_ms: f64, duration_ms: f64, finish: FadeFinish) -> Self {
        Self {
            id,
            from,
            to: clamp_volume(to),
            start_ms,
            duration_ms: duration_ms.max(0.0),
            frame: None,
            finish,
            completion: FadeCompletion::pending(),
        }
    }

    pub fn progress(&self, now_ms: f64) -> f64 {
        progress(self.start_ms, self.duration_ms, now_ms)
    }

    pub fn volume_at(&self, now_ms: f64) -> f32 {
        lerp(self.from, self.to, self.progress(now_ms))
    }
}

/// Elapsed fraction of a ramp, clamped to [0, 1]. Zero-length ramps are
/// complete immediately.
pub fn progress(start_ms: f64, duration_ms: f64, now_ms: f64) -> f64 {
    if duration_ms <= 0.0 {
        return 1.0;
    }
    ((now_ms - start_ms) / duration_ms).clamp(0.0, 1.0)
}

pub fn lerp(from: f32, to: f32, t: f64) -> f32 {
    if t >= 1.0 {
        return to;
    }
    from + (to - from) * t as f32
}

/// Clamp to the valid volume range. NaN maps to silence.
pub fn clamp_volume(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn progress_is_linear_and_clamped() {
        assert_eq!(progress(100.0, 1000.0, 100.0), 0.0);
        assert_eq!(progress(100.0, 1000.0, 600.0), 0.5);
        assert_eq!(progress(100.0, 1000.0, 5000.0), 1.0);
        // Frame timestamps can predate the recorded start.
        assert_eq!(progress(100.0, 1000.0, 90.0), 0.0);
    }

    #[test]
    fn zero_duration_completes_at_once() {
        assert_eq!(progress(0.0, 0.0, 0.0), 1.0);
        let fade = Fade::new(1, 0.8, 0.0, 50.0, 0.0, FadeFinish::Nothing);
        assert_eq!(fade.volume_at(50.0), 0.0);
    }

    #[test]
    fn volume_interpolates_between_endpoints() {
        let fade = Fade::new(1, 0.0, 0.3, 0.0, 1000.0, FadeFinish::Nothing);
        assert!((fade.volume_at(500.0) - 0.15).abs() < 1e-6);
        assert_eq!(fade.volume_at(1000.0), 0.3);

        let down = Fade::new(2, 0.6, 0.0, 0.0, 300.0, FadeFinish::Nothing);
        assert!((down.volume_at(100.0) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn target_is_clamped() {
        let fade = Fade::new(1, 0.2, 3.0, 0.0, 100.0, FadeFinish::Nothing);
        assert_eq!(fade.to, 1.0);
        let fade = Fade::new(2, 0.2, f32::NAN, 0.0, 100.0, FadeFinish::Nothing);
        assert_eq!(fade.to, 0.0);
    }

    #[test]
    fn completion_first_settle_wins() {
        let completion = FadeCompletion::pending();
        let observer = completion.clone();
        assert!(!observer.is_settled());

        assert!(completion.settle(FadeOutcome::Cancelled));
        assert!(!completion.settle(FadeOutcome::Completed));
        assert_eq!(observer.outcome(), Some(FadeOutcome::Cancelled));
    }

    #[test]
    fn wait_returns_once_settled_elsewhere() {
        let completion = FadeCompletion::pending();
        let remote = completion.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.settle(FadeOutcome::Completed);
        });
        assert_eq!(completion.wait(), FadeOutcome::Completed);
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_on_pending() {
        let completion = FadeCompletion::pending();
        assert_eq!(completion.wait_timeout(Duration::from_millis(10)), None);
        let done = FadeCompletion::settled(FadeOutcome::Skipped);
        assert_eq!(done.wait_timeout(Duration::from_millis(10)), Some(FadeOutcome::Skipped));
    }
}
