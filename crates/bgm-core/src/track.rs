//! Track probing: tags via lofty, stream parameters via symphonia.

use std::fs::File;
use std::path::Path;

use lofty::prelude::*;
use lofty::probe::Probe;
use serde::{Deserialize, Serialize};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::LoadError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
    pub sample_rate: u32,
    pub channels: u32,
}

/// Probe `uri` as a local file path.
///
/// Fails when the file is missing or holds no decodable default track.
/// Missing tags are not an error; the title falls back to the file stem.
pub fn probe(uri: &str) -> Result<TrackInfo, LoadError> {
    let path = Path::new(uri);
    if !path.exists() {
        return Err(LoadError::NotFound(uri.to_string()));
    }

    let (sample_rate, channels, n_frames) = probe_stream(path).map_err(|reason| LoadError::Decode {
        uri: uri.to_string(),
        reason,
    })?;

    let mut info = read_tags(path);
    info.sample_rate = sample_rate;
    info.channels = channels;
    if info.duration_ms.is_none() {
        info.duration_ms = n_frames
            .filter(|_| sample_rate > 0)
            .map(|frames| frames * 1000 / sample_rate as u64);
    }
    Ok(info)
}

/// Returns (sample_rate, channels, frame count if known).
pub(crate) fn probe_stream(path: &Path) -> Result<(u32, u32, Option<u64>), String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| e.to_string())?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| "no default track".to_string())?;
    let rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count() as u32).unwrap_or(2);
    Ok((rate, channels, track.codec_params.n_frames))
}

fn read_tags(path: &Path) -> TrackInfo {
    let fallback_title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .to_string();

    let mut info = TrackInfo {
        title: fallback_title,
        artist: None,
        album: None,
        duration_ms: None,
        sample_rate: 0,
        channels: 0,
    };

    let tagged = match Probe::open(path).and_then(|p| p.read()) {
        Ok(t) => t,
        Err(e) => {
            log::debug!("bgm: no readable tags in {}: {}", path.display(), e);
            return info;
        }
    };

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        if let Some(title) = tag.title() {
            info.title = title.to_string();
        }
        info.artist = tag.artist().map(|s| s.to_string());
        info.album = tag.album().map(|s| s.to_string());
    }
    info.duration_ms = Some(tagged.properties().duration().as_millis() as u64).filter(|&d| d > 0);
    info
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_not_found() {
        let err = probe("/nonexistent/carol.mp3").unwrap_err();
        assert_eq!(err, LoadError::NotFound("/nonexistent/carol.mp3".into()));
    }

    #[test]
    fn garbage_file_is_decode_error() {
        let mut file = tempfile::Builder::new()
            .suffix(".mp3")
            .tempfile()
            .expect("tempfile");
        file.write_all(&[0x13; 64]).unwrap();

        let uri = file.path().to_str().unwrap().to_string();
        match probe(&uri) {
            Err(LoadError::Decode { uri: failed, .. }) => assert_eq!(failed, uri),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn wav_file_probes_stream_parameters() {
        let file = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile()
            .expect("tempfile");
        write_silent_wav(file.path(), 8000, 1, 8000);

        let info = probe(file.path().to_str().unwrap()).unwrap();
        assert_eq!(info.sample_rate, 8000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.duration_ms, Some(1000));
        assert!(!info.title.is_empty());
    }

    /// 16-bit PCM WAV of `frames` silent frames.
    pub(crate) fn write_silent_wav(path: &Path, rate: u32, channels: u16, frames: u32) {
        let data_len = frames * channels as u32 * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&rate.to_le_bytes());
        bytes.extend_from_slice(&(rate * channels as u32 * 2).to_le_bytes());
        bytes.extend_from_slice(&(channels * 2).to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(44 + data_len as usize, 0);
        std::fs::write(path, bytes).unwrap();
    }
}
