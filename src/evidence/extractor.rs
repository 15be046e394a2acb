//! Evidence extraction orchestration.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::content_key::ContentKey;

use super::audio::{self, FEATURE_SAMPLE_RATE};
use super::decoder::MediaDecoder;
use super::face::{self, FaceLocalizer};
use super::{Evidence, ExtractionError, VideoMetadata, MAX_SAMPLED_FRAMES};

/// Frame sampling interval: at most [`MAX_SAMPLED_FRAMES`] frames are
/// inspected across the full duration.
pub fn sampling_interval(frame_count: u64) -> u64 {
    (frame_count / MAX_SAMPLED_FRAMES as u64).max(1)
}

/// Turns a video file into an [`Evidence`] bundle.
///
/// Holds its collaborators by trait object — constructed once at startup
/// and shared by reference into the request path.
pub struct EvidenceExtractor {
    decoder: Box<dyn MediaDecoder>,
    localizer: Box<dyn FaceLocalizer>,
}

impl EvidenceExtractor {
    pub fn new(decoder: Box<dyn MediaDecoder>, localizer: Box<dyn FaceLocalizer>) -> Self {
        Self { decoder, localizer }
    }

    /// Production wiring: ffmpeg decoding + skin-region localization.
    pub fn ffmpeg() -> Self {
        Self::new(
            Box::new(super::decoder::FfmpegDecoder::new()),
            Box::new(super::face::SkinRegionLocalizer::new()),
        )
    }

    /// Extract evidence for the video at `path`.
    ///
    /// `key` is the upload's content digest; it seeds the deterministic
    /// audio fallback so repeated uploads of the same bytes always yield
    /// identical evidence.
    pub fn extract(&self, path: &Path, key: &ContentKey) -> Result<Evidence, ExtractionError> {
        let stream = self.decoder.probe(path)?;
        debug!(
            fps = stream.fps,
            frames = stream.frame_count,
            duration = stream.duration_seconds,
            "Probed video {}",
            path.display()
        );

        let interval = sampling_interval(stream.frame_count);
        let sampled = self
            .decoder
            .sample_frames(path, interval, MAX_SAMPLED_FRAMES)?;

        let mut face_frames = Vec::new();
        for frame in &sampled {
            let regions = self.localizer.localize(frame);
            // Frames without a face are skipped, not padded.
            if let Some(region) = face::largest_region(&regions) {
                face_frames.push(face::crop_face(frame, &region));
            }
        }

        if face_frames.is_empty() {
            warn!("No faces detected across {} sampled frames", sampled.len());
            return Err(ExtractionError::NoFaceDetected);
        }

        let audio_vector = self.audio_features(path, key);

        info!(
            key = %key.short(),
            sampled = sampled.len(),
            faces = face_frames.len(),
            "Evidence extracted"
        );

        Ok(Evidence {
            face_frames,
            audio_vector,
            metadata: VideoMetadata {
                fps: stream.fps,
                duration_seconds: stream.duration_seconds,
                frame_count: stream.frame_count,
            },
        })
    }

    /// Spectral features, or the digest-seeded fallback on any audio
    /// failure. Audio problems never fail the request.
    fn audio_features(&self, path: &Path, key: &ContentKey) -> Vec<f32> {
        match self.decoder.extract_audio(path, FEATURE_SAMPLE_RATE) {
            Ok(samples) => match audio::spectral_features(&samples, FEATURE_SAMPLE_RATE) {
                Some(features) => features,
                None => {
                    warn!(
                        key = %key.short(),
                        samples = samples.len(),
                        "Audio track too short for spectral analysis, using deterministic fallback"
                    );
                    audio::fallback_vector(key)
                }
            },
            Err(e) => {
                warn!(key = %key.short(), error = %e, "Audio extraction failed, using deterministic fallback");
                audio::fallback_vector(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::audio::AUDIO_FEATURE_DIM;
    use crate::evidence::decoder::MockDecoder;
    use crate::evidence::face::SkinRegionLocalizer;
    use crate::evidence::FACE_CROP_SIZE;
    use image::{Rgb, RgbImage};

    fn face_frame() -> RgbImage {
        let mut img = RgbImage::from_pixel(320, 240, Rgb([20, 40, 180]));
        for y in 60..160 {
            for x in 100..180 {
                img.put_pixel(x, y, Rgb([205, 140, 110]));
            }
        }
        img
    }

    fn faceless_frame() -> RgbImage {
        RgbImage::from_pixel(320, 240, Rgb([20, 40, 180]))
    }

    fn sine(seconds: f32) -> Vec<f32> {
        let n = (seconds * FEATURE_SAMPLE_RATE as f32) as usize;
        (0..n)
            .map(|i| {
                (2.0 * std::f32::consts::PI * 440.0 * i as f32 / FEATURE_SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    fn extractor(frames: Vec<RgbImage>, audio: Option<Vec<f32>>) -> EvidenceExtractor {
        let mut decoder = MockDecoder::new(frames);
        if let Some(samples) = audio {
            decoder = decoder.with_audio(samples);
        }
        EvidenceExtractor::new(Box::new(decoder), Box::new(SkinRegionLocalizer::new()))
    }

    #[test]
    fn interval_caps_sampling_at_thirty_frames() {
        assert_eq!(sampling_interval(10), 1);
        assert_eq!(sampling_interval(30), 1);
        assert_eq!(sampling_interval(300), 10);
        assert_eq!(sampling_interval(0), 1);
    }

    #[test]
    fn extract_yields_canonical_face_crops() {
        let ex = extractor(vec![face_frame(), face_frame()], Some(sine(1.0)));
        let key = ContentKey::digest(b"two faces");
        let evidence = ex.extract(Path::new("ignored.mp4"), &key).unwrap();

        assert_eq!(evidence.face_frames.len(), 2);
        for crop in &evidence.face_frames {
            assert_eq!(crop.width(), FACE_CROP_SIZE);
            assert_eq!(crop.height(), FACE_CROP_SIZE);
        }
        assert_eq!(evidence.audio_vector.len(), AUDIO_FEATURE_DIM);
        assert!((evidence.metadata.fps - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn faceless_frames_are_skipped_not_padded() {
        let ex = extractor(
            vec![faceless_frame(), face_frame(), faceless_frame()],
            Some(sine(1.0)),
        );
        let key = ContentKey::digest(b"one of three");
        let evidence = ex.extract(Path::new("ignored.mp4"), &key).unwrap();
        assert_eq!(evidence.face_frames.len(), 1);
    }

    #[test]
    fn zero_faces_fails_with_no_face_detected() {
        let ex = extractor(vec![faceless_frame(), faceless_frame()], Some(sine(1.0)));
        let key = ContentKey::digest(b"nobody home");
        let result = ex.extract(Path::new("ignored.mp4"), &key);
        assert!(matches!(result, Err(ExtractionError::NoFaceDetected)));
    }

    #[test]
    fn missing_audio_uses_digest_seeded_fallback() {
        let key = ContentKey::digest(b"silent film");
        let ex = extractor(vec![face_frame()], None);
        let evidence = ex.extract(Path::new("ignored.mp4"), &key).unwrap();

        assert_eq!(evidence.audio_vector, audio::fallback_vector(&key));
    }

    #[test]
    fn too_short_audio_uses_digest_seeded_fallback() {
        let key = ContentKey::digest(b"clipped audio");
        let ex = extractor(vec![face_frame()], Some(vec![0.0; 10]));
        let evidence = ex.extract(Path::new("ignored.mp4"), &key).unwrap();

        assert_eq!(evidence.audio_vector, audio::fallback_vector(&key));
    }

    #[test]
    fn extraction_is_deterministic_for_fixed_inputs() {
        let key = ContentKey::digest(b"stable");
        let make = || extractor(vec![face_frame()], None);
        let a = make().extract(Path::new("ignored.mp4"), &key).unwrap();
        let b = make().extract(Path::new("ignored.mp4"), &key).unwrap();
        assert_eq!(a.audio_vector, b.audio_vector);
        assert_eq!(a.face_frames.len(), b.face_frames.len());
        assert_eq!(
            a.face_frames[0].as_raw(),
            b.face_frames[0].as_raw()
        );
    }
}
