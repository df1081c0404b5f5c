//! Native audio resource: symphonia decode, cpal output.
//!
//! Pipeline per `play()` from a stopped state:
//! 1. a decoder thread decodes the track, remixes to the output channel
//!    count, resamples to the output rate and pushes into a sample ring.
//!    At end of stream it reopens the file when looping is on.
//! 2. an output thread owns the cpal stream; its callback pulls from the
//!    ring and applies the current volume. While paused it writes silence.
//!
//! `load()` only probes the file (on a loader thread) and reports the
//! outcome as a [`ResourceEvent`].

use std::collections::VecDeque;
use std::error::Error;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{AudioResource, EventSink, ResourceEvent};
use crate::error::PlaybackError;
use crate::fade::clamp_volume;
use crate::track::{self, TrackInfo};

/// About a second of 48 kHz stereo.
const RING_CAPACITY: usize = 48_000 * 2;

type BoxError = Box<dyn Error + Send + Sync>;

/// Looping track played on the default output device.
pub struct NativeTrack {
    state: Arc<TrackState>,
}

struct TrackState {
    source: Mutex<String>,
    looping: AtomicBool,
    /// f32 bits.
    volume: AtomicU32,
    /// Decoder + output threads are alive.
    running: AtomicBool,
    paused: AtomicBool,
    stop_signal: AtomicBool,
    /// Decoder reached the end of a non-looping stream.
    finished: AtomicBool,
    released: AtomicBool,
    ring: Mutex<SampleRing>,
    sink: Mutex<Option<EventSink>>,
    info: Mutex<Option<TrackInfo>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TrackState {
    fn emit(&self, event: ResourceEvent) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::SeqCst))
    }

    /// Signal both threads and wait for them. Safe to call when stopped.
    fn stop_pipeline(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.ring.lock().clear();
        self.running.store(false, Ordering::SeqCst);
    }
}

impl NativeTrack {
    pub fn new() -> Self {
        Self {
            state: Arc::new(TrackState {
                source: Mutex::new(String::new()),
                looping: AtomicBool::new(false),
                volume: AtomicU32::new(1.0f32.to_bits()),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                stop_signal: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                released: AtomicBool::new(false),
                ring: Mutex::new(SampleRing::new(RING_CAPACITY)),
                sink: Mutex::new(None),
                info: Mutex::new(None),
                threads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Tags and stream parameters, once `load()` has succeeded.
    pub fn track_info(&self) -> Option<TrackInfo> {
        self.state.info.lock().clone()
    }

    fn start_pipeline(&self, uri: String) -> Result<(), PlaybackError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(PlaybackError::NoOutputDevice)?;

        let (track_rate, track_channels) = match self.track_info() {
            Some(info) => (info.sample_rate, info.channels),
            None => {
                let (rate, channels, _) =
                    track::probe_stream(Path::new(&uri)).map_err(|reason| PlaybackError::Source {
                        uri: uri.clone(),
                        reason,
                    })?;
                (rate, channels)
            }
        };
        let config = choose_stream_config(&device, track_rate, track_channels.max(1) as u16)
            .map_err(PlaybackError::Device)?;

        let state = &self.state;
        state.stop_signal.store(false, Ordering::SeqCst);
        state.paused.store(false, Ordering::SeqCst);
        state.finished.store(false, Ordering::SeqCst);
        state.ring.lock().clear();
        state.running.store(true, Ordering::SeqCst);

        let mut threads = state.threads.lock();

        let decoder_state = Arc::clone(state);
        let out_rate = config.sample_rate.0;
        let out_channels = config.channels as usize;
        threads.push(thread::spawn(move || {
            if let Err(e) = decode_loop(&uri, &decoder_state, out_rate, out_channels) {
                log::error!("bgm: decode error: {}", e);
            }
            decoder_state.finished.store(true, Ordering::SeqCst);
        }));

        let output_state = Arc::clone(state);
        threads.push(thread::spawn(move || {
            if let Err(e) = output_loop(&output_state, config) {
                log::error!("bgm: output error: {}", e);
            }
            // Nothing consumes the ring any more.
            output_state.stop_signal.store(true, Ordering::SeqCst);
            output_state.running.store(false, Ordering::SeqCst);
        }));

        log::debug!("bgm: pipeline started at {} Hz", out_rate);
        Ok(())
    }
}

impl Default for NativeTrack {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeTrack {
    fn drop(&mut self) {
        self.state.stop_pipeline();
    }
}

impl AudioResource for NativeTrack {
    fn source(&self) -> String {
        self.state.source.lock().clone()
    }

    /// A different source stops the running pipeline; the next `play()`
    /// starts over on the new one.
    fn set_source(&self, uri: &str) {
        if *self.state.source.lock() == uri {
            return;
        }
        self.state.stop_pipeline();
        *self.state.info.lock() = None;
        *self.state.source.lock() = uri.to_string();
    }

    fn looping(&self) -> bool {
        self.state.looping.load(Ordering::SeqCst)
    }

    fn set_looping(&self, looping: bool) {
        self.state.looping.store(looping, Ordering::SeqCst);
    }

    fn volume(&self) -> f32 {
        self.state.volume()
    }

    fn set_volume(&self, volume: f32) {
        self.state
            .volume
            .store(clamp_volume(volume).to_bits(), Ordering::SeqCst);
    }

    fn subscribe(&self, sink: EventSink) {
        *self.state.sink.lock() = Some(sink);
    }

    fn unsubscribe(&self) {
        self.state.sink.lock().take();
    }

    fn load(&self) {
        let uri = self.source();
        let state = Arc::clone(&self.state);
        // Detached: the event handler may block on the caller's lock.
        let spawned = thread::Builder::new()
            .name("bgm-loader".into())
            .spawn(move || match track::probe(&uri) {
                Ok(info) => {
                    log::info!(
                        "bgm: loaded \"{}\" ({} Hz, {} ch)",
                        info.title,
                        info.sample_rate,
                        info.channels
                    );
                    *state.info.lock() = Some(info);
                    state.emit(ResourceEvent::CanPlayThrough);
                }
                Err(e) => state.emit(ResourceEvent::Error(e)),
            });
        if let Err(e) = spawned {
            log::error!("bgm: failed to spawn loader thread: {}", e);
        }
    }

    fn play(&self) -> Result<(), PlaybackError> {
        if self.state.released.load(Ordering::SeqCst) {
            return Err(PlaybackError::Released);
        }
        if self.state.running.load(Ordering::SeqCst) {
            self.state.paused.store(false, Ordering::SeqCst);
            return Ok(());
        }
        // Threads may linger after a non-looping stream drained.
        self.state.stop_pipeline();

        let uri = self.source();
        if !Path::new(&uri).exists() {
            return Err(PlaybackError::Source {
                uri,
                reason: "file not found".into(),
            });
        }
        self.start_pipeline(uri)
    }

    fn pause(&self) {
        if self.state.running.load(Ordering::SeqCst) {
            self.state.paused.store(true, Ordering::SeqCst);
        }
    }

    fn is_playing(&self) -> bool {
        self.state.running.load(Ordering::SeqCst) && !self.state.paused.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.state.released.store(true, Ordering::SeqCst);
        self.state.sink.lock().take();
        self.state.stop_pipeline();
        self.state.source.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Decoder thread
// ---------------------------------------------------------------------------

struct OpenTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

fn open_track(uri: &str) -> Result<OpenTrack, BoxError> {
    let path = Path::new(uri);
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format = probed.format;
    let track = format.default_track().ok_or("no default track")?;
    let decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);

    Ok(OpenTrack {
        format,
        decoder,
        track_id,
        sample_rate,
        channels,
    })
}

/// Decode `uri` into the ring until stopped, reopening at end of stream
/// while looping is enabled.
fn decode_loop(uri: &str, state: &TrackState, out_rate: u32, out_channels: usize) -> Result<(), BoxError> {
    loop {
        let mut track = open_track(uri)?;
        let mut resampler = LinearResampler::new(track.sample_rate, out_rate, out_channels);

        loop {
            if state.stop_signal.load(Ordering::SeqCst) {
                return Ok(());
            }
            while state.paused.load(Ordering::SeqCst) {
                if state.stop_signal.load(Ordering::SeqCst) {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(10));
            }

            let packet = match track.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track.track_id {
                continue;
            }

            let decoded = track.decoder.decode(&packet)?;
            let spec = *decoded.spec();
            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);

            let remixed = remix(buf.samples(), track.channels, out_channels);
            let samples = resampler.process(&remixed);
            if !push_with_backpressure(state, &samples) {
                return Ok(());
            }
        }

        if !state.looping.load(Ordering::SeqCst) {
            return Ok(());
        }
        log::debug!("bgm: end of stream, looping {}", uri);
    }
}

/// Returns false if stopped while waiting for space.
fn push_with_backpressure(state: &TrackState, samples: &[f32]) -> bool {
    for chunk in samples.chunks(RING_CAPACITY / 4) {
        loop {
            if state.ring.lock().push(chunk) {
                break;
            }
            if state.stop_signal.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Output thread
// ---------------------------------------------------------------------------

fn choose_stream_config(
    device: &cpal::Device,
    track_rate: u32,
    track_channels: u16,
) -> Result<cpal::StreamConfig, String> {
    let supports_track = device
        .supported_output_configs()
        .map(|configs| {
            configs.into_iter().any(|range| {
                range.sample_format() == cpal::SampleFormat::F32
                    && range.channels() == track_channels
                    && range.min_sample_rate().0 <= track_rate
                    && range.max_sample_rate().0 >= track_rate
            })
        })
        .unwrap_or(false);

    if supports_track {
        return Ok(cpal::StreamConfig {
            channels: track_channels,
            sample_rate: cpal::SampleRate(track_rate),
            buffer_size: cpal::BufferSize::Default,
        });
    }

    let default_cfg = device.default_output_config().map_err(|e| e.to_string())?;
    if default_cfg.sample_format() != cpal::SampleFormat::F32 {
        return Err(format!(
            "device does not support f32 output (got {:?})",
            default_cfg.sample_format()
        ));
    }
    Ok(default_cfg.into())
}

/// Own the cpal stream until stopped, or until a finished stream drains.
fn output_loop(state: &Arc<TrackState>, config: cpal::StreamConfig) -> Result<(), BoxError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or("no output device")?;

    let cb_state = Arc::clone(state);
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if cb_state.paused.load(Ordering::SeqCst) {
                data.fill(0.0);
                return;
            }
            cb_state.ring.lock().pull(data);
            let gain = cb_state.volume();
            for s in data.iter_mut() {
                *s *= gain;
            }
        },
        move |err| {
            log::error!("bgm: cpal error: {}", err);
        },
        None,
    )?;
    stream.play()?;

    loop {
        if state.stop_signal.load(Ordering::SeqCst) {
            break;
        }
        if state.finished.load(Ordering::SeqCst) && state.ring.lock().is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(25));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sample plumbing
// ---------------------------------------------------------------------------

/// Bounded FIFO of interleaved samples.
struct SampleRing {
    buf: VecDeque<f32>,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// All-or-nothing push. Returns false when there is not enough room.
    fn push(&mut self, samples: &[f32]) -> bool {
        if self.capacity - self.buf.len() < samples.len() {
            return false;
        }
        self.buf.extend(samples.iter().copied());
        true
    }

    /// Fill `out` from the front, padding with silence. Returns samples read.
    fn pull(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.buf.len());
        for (dst, src) in out.iter_mut().zip(self.buf.drain(..n)) {
            *dst = src;
        }
        out[n..].fill(0.0);
        n
    }

    fn clear(&mut self) {
        self.buf.clear();
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Linear-interpolation resampler over interleaved frames. The fractional
/// read position carries across blocks.
struct LinearResampler {
    /// Source frames per output frame.
    step: f64,
    pos: f64,
    channels: usize,
}

impl LinearResampler {
    fn new(src_rate: u32, dst_rate: u32, channels: usize) -> Self {
        Self {
            step: src_rate as f64 / dst_rate.max(1) as f64,
            pos: 0.0,
            channels: channels.max(1),
        }
    }

    fn is_passthrough(&self) -> bool {
        (self.step - 1.0).abs() < 1e-3
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        let ch = self.channels;
        let frames = input.len() / ch;
        if frames == 0 {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(((frames as f64 / self.step) as usize + 1) * ch);
        while self.pos < frames as f64 {
            let i = self.pos as usize;
            let j = (i + 1).min(frames - 1);
            let frac = (self.pos - i as f64) as f32;
            for c in 0..ch {
                let a = input[i * ch + c];
                let b = input[j * ch + c];
                out.push(a + (b - a) * frac);
            }
            self.pos += self.step;
        }
        self.pos -= frames as f64;
        out
    }
}

/// Convert interleaved samples between channel counts. Mono is duplicated
/// on the way up and channels are averaged on the way down to mono;
/// anything else keeps the leading channels and zero-fills the rest.
fn remix(src: &[f32], src_ch: usize, dst_ch: usize) -> Vec<f32> {
    if src_ch == dst_ch || src_ch == 0 || dst_ch == 0 {
        return src.to_vec();
    }
    let mut out = Vec::with_capacity(src.len() / src_ch * dst_ch);
    for frame in src.chunks_exact(src_ch) {
        if src_ch == 1 {
            out.extend(std::iter::repeat(frame[0]).take(dst_ch));
        } else if dst_ch == 1 {
            out.push(frame.iter().sum::<f32>() / src_ch as f32);
        } else {
            out.extend((0..dst_ch).map(|c| frame.get(c).copied().unwrap_or(0.0)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::track::tests::write_silent_wav;
    use std::sync::mpsc;

    fn subscribed(track: &NativeTrack) -> mpsc::Receiver<ResourceEvent> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        track.subscribe(Arc::new(move |event: ResourceEvent| {
            let _ = tx.lock().send(event);
        }));
        rx
    }

    #[test]
    fn ring_push_is_all_or_nothing() {
        let mut ring = SampleRing::new(4);
        assert!(ring.push(&[1.0, 2.0, 3.0]));
        assert!(!ring.push(&[4.0, 5.0]));
        let mut out = [9.0f32; 5];
        assert_eq!(ring.pull(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0, 0.0, 0.0]);
        assert!(ring.is_empty());
    }

    #[test]
    fn ring_clear_drops_samples() {
        let mut ring = SampleRing::new(8);
        ring.push(&[1.0, 2.0]);
        ring.clear();
        let mut out = [1.0f32; 2];
        assert_eq!(ring.pull(&mut out), 0);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn resampler_same_rate_passthrough() {
        let mut rs = LinearResampler::new(48000, 48000, 2);
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(rs.process(&input), input);
    }

    #[test]
    fn resampler_doubling_interpolates() {
        let mut rs = LinearResampler::new(22050, 44100, 1);
        let out = rs.process(&[0.0, 1.0, 0.0, -1.0]);
        assert_eq!(out.len(), 8);
        assert_eq!(out[1], 0.5);
        assert_eq!(out[2], 1.0);
    }

    #[test]
    fn resampler_halving_keeps_every_other_frame() {
        let mut rs = LinearResampler::new(96000, 48000, 1);
        let input: Vec<f32> = (0..8).map(|i| i as f32).collect();
        assert_eq!(rs.process(&input), vec![0.0, 2.0, 4.0, 6.0]);
        // Phase continues into the next block.
        assert_eq!(rs.process(&input), vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn remix_mono_to_stereo() {
        assert_eq!(remix(&[1.0, 2.0], 1, 2), vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn remix_stereo_to_mono_averages() {
        assert_eq!(remix(&[1.0, 3.0, 2.0, 4.0], 2, 1), vec![2.0, 3.0]);
    }

    #[test]
    fn remix_stereo_to_quad_zero_fills() {
        assert_eq!(remix(&[1.0, 2.0], 2, 4), vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn attributes_round_trip_without_device() {
        let track = NativeTrack::new();
        track.set_source("/music/loop.ogg");
        track.set_looping(true);
        track.set_volume(1.4);
        assert_eq!(track.source(), "/music/loop.ogg");
        assert!(track.looping());
        assert_eq!(track.volume(), 1.0);
        assert!(!track.is_playing());
    }

    #[test]
    fn load_missing_file_reports_error() {
        let track = NativeTrack::new();
        track.set_source("/nonexistent/loop.ogg");
        let rx = subscribed(&track);
        track.load();

        let event = rx.recv_timeout(Duration::from_secs(5)).expect("no load event");
        assert_eq!(
            event,
            ResourceEvent::Error(LoadError::NotFound("/nonexistent/loop.ogg".into()))
        );
        assert!(track.track_info().is_none());
    }

    #[test]
    fn load_wav_reports_ready() {
        let file = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile()
            .expect("tempfile");
        write_silent_wav(file.path(), 44100, 2, 4410);

        let track = NativeTrack::new();
        track.set_source(file.path().to_str().unwrap());
        let rx = subscribed(&track);
        track.load();

        let event = rx.recv_timeout(Duration::from_secs(5)).expect("no load event");
        assert_eq!(event, ResourceEvent::CanPlayThrough);
        let info = track.track_info().expect("info after load");
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
    }

    #[test]
    fn play_missing_file_fails_gracefully() {
        let track = NativeTrack::new();
        track.set_source("/nonexistent/loop.ogg");
        match track.play() {
            Err(PlaybackError::Source { uri, .. }) => assert_eq!(uri, "/nonexistent/loop.ogg"),
            other => panic!("expected source error, got {:?}", other),
        }
        assert!(!track.is_playing());
    }

    #[test]
    fn released_track_refuses_play() {
        let track = NativeTrack::new();
        track.set_source("/music/loop.ogg");
        track.release();
        assert_eq!(track.play(), Err(PlaybackError::Released));
        assert_eq!(track.source(), "");
    }
}
