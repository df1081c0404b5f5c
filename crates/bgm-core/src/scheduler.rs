//! Per-frame scheduling capability.
//!
//! The fade scheduler only needs "call me once on the next frame, with a
//! timestamp" and "forget that request". Hosts with a real refresh callback
//! implement [`FrameScheduler`] over it; everyone else uses the timer
//! approximation or the manual clock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// One-shot frame callback. Receives the frame timestamp in milliseconds.
pub type FrameCallback = Box<dyn FnOnce(f64) + Send>;

/// Identifies a scheduled callback so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

/// Trait for frame sources.
///
/// Implementations must never invoke a callback synchronously from
/// `schedule`; callers may hold locks while scheduling.
pub trait FrameScheduler: Send + Sync {
    /// Monotonic time in milliseconds, same clock as frame timestamps.
    fn now_ms(&self) -> f64;
    fn schedule(&self, callback: FrameCallback) -> FrameHandle;
    /// Drop a pending callback. Unknown or already-fired handles are ignored.
    fn cancel(&self, handle: FrameHandle);
}

/// Pending callbacks keyed by handle, in scheduling order.
#[derive(Default)]
struct FrameQueue {
    next_id: AtomicU64,
    pending: Mutex<Vec<(FrameHandle, FrameCallback)>>,
}

impl FrameQueue {
    fn push(&self, callback: FrameCallback) -> FrameHandle {
        let handle = FrameHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().push((handle, callback));
        handle
    }

    fn remove(&self, handle: FrameHandle) {
        self.pending.lock().retain(|(h, _)| *h != handle);
    }

    /// Take everything queued so far. Callbacks run outside the lock so
    /// they can schedule the next frame.
    fn drain(&self) -> Vec<(FrameHandle, FrameCallback)> {
        std::mem::take(&mut *self.pending.lock())
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

// ---------------------------------------------------------------------------
// TimerScheduler
// ---------------------------------------------------------------------------

/// Timer-thread approximation of a display refresh callback.
pub struct TimerScheduler {
    origin: Instant,
    queue: Arc<FrameQueue>,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerScheduler {
    /// 60 Hz frame source.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_micros(16_667))
    }

    pub fn with_interval(interval: Duration) -> Self {
        let origin = Instant::now();
        let queue = Arc::new(FrameQueue::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_queue = Arc::clone(&queue);
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("bgm-frames".into())
            .spawn(move || {
                while !thread_shutdown.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    let frame = thread_queue.drain();
                    if frame.is_empty() {
                        continue;
                    }
                    let timestamp = origin.elapsed().as_secs_f64() * 1000.0;
                    for (_, callback) in frame {
                        callback(timestamp);
                    }
                }
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                log::error!("bgm: failed to spawn frame thread: {}", e);
                None
            }
        };

        Self {
            origin,
            queue,
            shutdown,
            handle: Mutex::new(handle),
        }
    }

    /// Stop the frame thread and wait for it. Pending callbacks are dropped.
    ///
    /// Called from a frame callback (the last owner dropped mid-frame), the
    /// thread is left to exit on its own.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.queue.drain();
    }
}

impl Default for TimerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl FrameScheduler for TimerScheduler {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn schedule(&self, callback: FrameCallback) -> FrameHandle {
        self.queue.push(callback)
    }

    fn cancel(&self, handle: FrameHandle) {
        self.queue.remove(handle);
    }
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

/// Deterministic frame source driven by the caller.
///
/// Time only moves when [`advance`](Self::advance) or
/// [`set_time`](Self::set_time) is called. Callbacks scheduled while a frame
/// runs wait for the next frame, like a real refresh loop.
#[derive(Default)]
pub struct ManualScheduler {
    now: Mutex<f64>,
    queue: FrameQueue,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, ms: f64) {
        *self.now.lock() = ms;
    }

    /// Move the clock forward by `ms` and run one frame.
    pub fn advance(&self, ms: f64) {
        {
            let mut now = self.now.lock();
            *now += ms;
        }
        self.run_frame();
    }

    /// Run every callback pending at the current time. Returns how many ran.
    pub fn run_frame(&self) -> usize {
        let timestamp = *self.now.lock();
        let frame = self.queue.drain();
        let count = frame.len();
        for (_, callback) in frame {
            callback(timestamp);
        }
        count
    }

    /// Advance in `frame_ms` steps until nothing is pending or `max_frames`
    /// frames ran.
    pub fn run_until_idle(&self, frame_ms: f64, max_frames: usize) {
        for _ in 0..max_frames {
            if self.pending() == 0 {
                break;
            }
            self.advance(frame_ms);
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl FrameScheduler for ManualScheduler {
    fn now_ms(&self) -> f64 {
        *self.now.lock()
    }

    fn schedule(&self, callback: FrameCallback) -> FrameHandle {
        self.queue.push(callback)
    }

    fn cancel(&self, handle: FrameHandle) {
        self.queue.remove(handle);
    }
}
