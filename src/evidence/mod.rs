//! Evidence extraction: video → face-frame sequence + audio feature vector.
//!
//! The extractor decodes an uploaded video, samples at most
//! [`MAX_SAMPLED_FRAMES`] frames across its duration, localizes the dominant
//! face per sampled frame, and derives a fixed-length spectral audio vector.
//! Evidence is owned by one extraction call and dropped after fusion; only
//! the verdict is durable.

pub mod audio;
pub mod decoder;
pub mod extractor;
pub mod face;

use image::RgbImage;

pub use decoder::{FfmpegDecoder, MediaDecoder, VideoStreamInfo};
pub use extractor::EvidenceExtractor;
pub use face::{FaceLocalizer, FaceRegion, SkinRegionLocalizer};

/// Upper bound on sampled frames per video.
pub const MAX_SAMPLED_FRAMES: usize = 30;

/// Canonical face crop edge length in pixels.
pub const FACE_CROP_SIZE: u32 = 224;

/// Margin added around a detected face box before cropping, in pixels,
/// clamped to the frame bounds.
pub const FACE_CROP_MARGIN: u32 = 20;

/// Video stream properties recorded alongside the extracted evidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    pub fps: f64,
    pub duration_seconds: f64,
    pub frame_count: u64,
}

/// The evidence bundle fed to both analyzers.
///
/// Invariants: `face_frames` holds between 1 and [`MAX_SAMPLED_FRAMES`]
/// crops of [`FACE_CROP_SIZE`]² pixels (zero-image padding to exactly 30
/// happens inside the classifier adapter, not here); `audio_vector` is
/// always exactly [`audio::AUDIO_FEATURE_DIM`] long.
#[derive(Debug, Clone)]
pub struct Evidence {
    pub face_frames: Vec<RgbImage>,
    pub audio_vector: Vec<f32>,
    pub metadata: VideoMetadata,
}

/// Errors from evidence extraction.
///
/// `VideoUnreadable` and `NoFaceDetected` are fatal to the request.
/// `AudioUnavailable` never escapes the extractor — it is recovered locally
/// with the deterministic fallback vector.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Video could not be opened or decoded: {0}")]
    VideoUnreadable(String),
    #[error("No face detected in any sampled frame")]
    NoFaceDetected,
    #[error("Audio track unavailable or undecodable: {0}")]
    AudioUnavailable(String),
    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
}
