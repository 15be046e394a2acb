//! Media decoding via ffmpeg/ffprobe subprocesses.
//!
//! Candor does not link a media stack; like the rest of the local tooling it
//! shells out to ffmpeg for container handling and normalization (frames as
//! PNG into a scoped temp directory, audio as 16 kHz mono s16le PCM on
//! stdout). Everything downstream works on decoded `RgbImage`s and f32
//! sample buffers.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::RgbImage;
use serde::Deserialize;
use tracing::debug;

use super::ExtractionError;

/// Probed properties of the dominant video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoStreamInfo {
    pub fps: f64,
    pub frame_count: u64,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
}

/// Decodes video containers into frames and PCM audio.
///
/// Trait seam so extraction logic is testable without a media toolchain;
/// the shipped implementation is [`FfmpegDecoder`].
pub trait MediaDecoder: Send + Sync {
    /// Probe stream properties. Fails with `VideoUnreadable` when the file
    /// is not a decodable video.
    fn probe(&self, path: &Path) -> Result<VideoStreamInfo, ExtractionError>;

    /// Decode every `interval`-th frame, up to `max` frames, in stream order.
    fn sample_frames(
        &self,
        path: &Path,
        interval: u64,
        max: usize,
    ) -> Result<Vec<RgbImage>, ExtractionError>;

    /// Decode the audio track to mono f32 samples at `sample_rate` Hz.
    /// Fails with `AudioUnavailable` when there is no usable track.
    fn extract_audio(&self, path: &Path, sample_rate: u32) -> Result<Vec<f32>, ExtractionError>;
}

// ═══════════════════════════════════════════════════════════
// FfmpegDecoder
// ═══════════════════════════════════════════════════════════

/// ffmpeg/ffprobe-backed decoder.
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegDecoder {
    /// Use `ffmpeg`/`ffprobe` from PATH.
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }

    /// Use explicit binary locations.
    pub fn with_binaries(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDecoder for FfmpegDecoder {
    fn probe(&self, path: &Path) -> Result<VideoStreamInfo, ExtractionError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=avg_frame_rate,nb_frames,duration,width,height",
                "-show_entries",
                "format=duration",
                "-print_format",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(|e| ExtractionError::VideoUnreadable(format!("ffprobe spawn: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::VideoUnreadable(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn sample_frames(
        &self,
        path: &Path,
        interval: u64,
        max: usize,
    ) -> Result<Vec<RgbImage>, ExtractionError> {
        // Scoped frame directory — removed on every exit path via Drop.
        let frame_dir = tempfile::tempdir()?;
        let pattern = frame_dir.path().join("frame_%04d.png");

        let interval = interval.max(1);
        let select = format!("select=not(mod(n\\,{interval}))");
        let frame_limit = max.to_string();
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(path)
            .args([
                "-vf",
                select.as_str(),
                "-vsync",
                "vfr",
                "-frames:v",
                frame_limit.as_str(),
            ])
            .arg(&pattern)
            .output()
            .map_err(|e| ExtractionError::VideoUnreadable(format!("ffmpeg spawn: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::VideoUnreadable(format!(
                "ffmpeg frame sampling exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(frame_dir.path())?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        // frame_%04d names sort into stream order
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for p in paths {
            let img = image::open(&p)
                .map_err(|e| ExtractionError::VideoUnreadable(format!("frame decode: {e}")))?;
            frames.push(img.to_rgb8());
        }

        debug!(
            frames = frames.len(),
            interval,
            "Sampled frames from {}",
            path.display()
        );

        Ok(frames)
    }

    fn extract_audio(&self, path: &Path, sample_rate: u32) -> Result<Vec<f32>, ExtractionError> {
        let rate = sample_rate.to_string();
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(path)
            .args([
                "-vn",
                "-ac",
                "1",
                "-ar",
                rate.as_str(),
                "-f",
                "s16le",
                "pipe:1",
            ])
            .output()
            .map_err(|e| ExtractionError::AudioUnavailable(format!("ffmpeg spawn: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::AudioUnavailable(format!(
                "ffmpeg audio decode exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(ExtractionError::AudioUnavailable(
                "no audio samples produced".into(),
            ));
        }

        Ok(pcm_s16le_to_f32(&output.stdout))
    }
}

// ═══════════════════════════════════════════════════════════
// Mock decoder (testing / wiring without a media toolchain)
// ═══════════════════════════════════════════════════════════

/// Mock decoder — serves fixed frames and optional audio samples.
pub struct MockDecoder {
    frames: Vec<RgbImage>,
    audio: Option<Vec<f32>>,
    probe_delay: Option<std::time::Duration>,
}

impl MockDecoder {
    /// Decoder with the given frames and no audio track.
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames,
            audio: None,
            probe_delay: None,
        }
    }

    /// Attach mono samples as the audio track.
    pub fn with_audio(mut self, samples: Vec<f32>) -> Self {
        self.audio = Some(samples);
        self
    }

    /// Sleep in `probe` — lets tests exercise request timeouts.
    pub fn with_probe_delay(mut self, delay: std::time::Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }
}

impl MediaDecoder for MockDecoder {
    fn probe(&self, _path: &Path) -> Result<VideoStreamInfo, ExtractionError> {
        if let Some(delay) = self.probe_delay {
            std::thread::sleep(delay);
        }
        Ok(VideoStreamInfo {
            fps: 30.0,
            frame_count: (self.frames.len() as u64 * 30).max(30),
            duration_seconds: self.frames.len() as f64,
            width: self.frames.first().map(|f| f.width()).unwrap_or(0),
            height: self.frames.first().map(|f| f.height()).unwrap_or(0),
        })
    }

    fn sample_frames(
        &self,
        _path: &Path,
        _interval: u64,
        max: usize,
    ) -> Result<Vec<RgbImage>, ExtractionError> {
        Ok(self.frames.iter().take(max).cloned().collect())
    }

    fn extract_audio(&self, _path: &Path, _sample_rate: u32) -> Result<Vec<f32>, ExtractionError> {
        self.audio
            .clone()
            .ok_or_else(|| ExtractionError::AudioUnavailable("no audio track".into()))
    }
}

// ═══════════════════════════════════════════════════════════
// Parsing helpers
// ═══════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse ffprobe JSON into stream info.
///
/// `nb_frames` is absent from many containers; when missing it is estimated
/// as `duration * fps`.
pub fn parse_probe_output(json: &str) -> Result<VideoStreamInfo, ExtractionError> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| ExtractionError::VideoUnreadable(format!("ffprobe output: {e}")))?;

    let stream = probe
        .streams
        .first()
        .ok_or_else(|| ExtractionError::VideoUnreadable("no video stream".into()))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| ExtractionError::VideoUnreadable("unparseable frame rate".into()))?;

    let duration_seconds = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or_else(|| (duration_seconds * fps).round() as u64);

    if frame_count == 0 {
        return Err(ExtractionError::VideoUnreadable(
            "video stream has no frames".into(),
        ));
    }

    Ok(VideoStreamInfo {
        fps,
        frame_count,
        duration_seconds,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}

/// Parse an ffprobe rational frame rate like `"30000/1001"`.
/// Returns `None` for zero denominators and non-positive rates.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((n, d)) => (n.parse::<f64>().ok()?, d.parse::<f64>().ok()?),
        None => (rate.parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 {
        return None;
    }
    let fps = num / den;
    (fps > 0.0).then_some(fps)
}

/// Convert little-endian signed 16-bit PCM bytes to f32 samples in [-1, 1].
/// A trailing odd byte is ignored.
pub fn pcm_s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}
