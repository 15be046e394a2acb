//! Reference-similarity micro-expression analyzer.
//!
//! Compares each face frame against a labeled reference dataset of truth /
//! lie exemplars. Frames are described by HOG (oriented-gradient) and LBP
//! (local texture) features; a frame's class is whichever exemplar set it
//! resembles more, and the video-level outcome is a majority vote across
//! frames. The descriptor math is self-contained pixel analysis — no
//! model runtime involved.

use std::path::Path;
use std::sync::Arc;

use image::{GrayImage, Luma, RgbImage};
use tracing::{debug, info, warn};

use crate::config::{FACIAL_EXPRESSION_BANDS, MICRO_GESTURE_BANDS};
use crate::evidence::{Evidence, FACE_CROP_SIZE};
use crate::verdict::{AnalyzerOutcome, AnalyzerSource, FeatureScores, Label};

use super::{AnalyzerError, EvidenceAnalyzer};

const SOURCE_NAME: &str = "similarity";

/// HOG cell edge in pixels.
const HOG_CELL: usize = 8;

/// HOG block edge in cells (2×2 cells per block, stride of one cell).
const HOG_BLOCK: usize = 2;

/// Unsigned orientation bins over 0–180°.
const HOG_BINS: usize = 9;

/// Weight of HOG cosine similarity in the combined score. HOG is the more
/// discriminative of the two descriptors.
const HOG_WEIGHT: f64 = 0.7;

/// Weight of LBP histogram similarity in the combined score.
const LBP_WEIGHT: f64 = 0.3;

/// Perceptual-hash distance at or below which two exemplars are considered
/// near-duplicates and the later one is skipped on load.
const DEDUP_MAX_DISTANCE: u32 = 5;

// ═══════════════════════════════════════════════════════════
// Face descriptors
// ═══════════════════════════════════════════════════════════

/// Texture/gradient descriptor of one face crop.
#[derive(Debug, Clone)]
pub struct FaceDescriptor {
    hog: Vec<f32>,
    lbp: Vec<f32>,
}

/// Compute the descriptor for a face crop (resized to the canonical size
/// when needed, then grayscaled).
pub fn descriptor(face: &RgbImage) -> FaceDescriptor {
    let canonical;
    let face = if face.width() == FACE_CROP_SIZE && face.height() == FACE_CROP_SIZE {
        face
    } else {
        canonical = image::imageops::resize(
            face,
            FACE_CROP_SIZE,
            FACE_CROP_SIZE,
            image::imageops::FilterType::Triangle,
        );
        &canonical
    };
    let gray = rgb_to_gray(face);
    FaceDescriptor {
        hog: hog_descriptor(&gray),
        lbp: lbp_histogram(&gray),
    }
}

/// Combined similarity of two descriptors: weighted HOG cosine plus inverse
/// chi-squared LBP histogram distance. Higher means more alike.
pub fn descriptor_similarity(a: &FaceDescriptor, b: &FaceDescriptor) -> f64 {
    let hog = cosine_similarity(&a.hog, &b.hog);
    let lbp = 1.0 / (1.0 + chi2_distance(&a.lbp, &b.lbp));
    HOG_WEIGHT * hog + LBP_WEIGHT * lbp
}

/// Convert RGB to grayscale using ITU-R BT.601 luminance.
fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = (rgb.width(), rgb.height());
    let mut gray = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let p = rgb.get_pixel(x, y);
            let luma =
                (0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32) as u8;
            gray.put_pixel(x, y, Luma([luma]));
        }
    }
    gray
}

/// Histogram-of-oriented-gradients descriptor: 8 px cells, 9 unsigned
/// orientation bins, 2×2-cell blocks with single-cell stride, L2 block
/// normalization.
fn hog_descriptor(gray: &GrayImage) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let cells_x = w / HOG_CELL;
    let cells_y = h / HOG_CELL;

    let px = |x: usize, y: usize| gray.get_pixel(x as u32, y as u32).0[0] as f32;

    // Per-cell orientation histograms from central-difference gradients.
    let mut cells = vec![[0.0f32; HOG_BINS]; cells_x * cells_y];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = px(x + 1, y) - px(x - 1, y);
            let gy = px(x, y + 1) - px(x, y - 1);
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude == 0.0 {
                continue;
            }
            // Unsigned orientation in [0, 180).
            let mut angle = gy.atan2(gx).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            if angle >= 180.0 {
                angle -= 180.0;
            }
            let bin = ((angle / 180.0 * HOG_BINS as f32) as usize).min(HOG_BINS - 1);

            let (cx, cy) = (x / HOG_CELL, y / HOG_CELL);
            if cx < cells_x && cy < cells_y {
                cells[cy * cells_x + cx][bin] += magnitude;
            }
        }
    }

    // Block normalization: 2x2 cells, stride one cell, L2.
    let blocks_x = cells_x.saturating_sub(HOG_BLOCK - 1);
    let blocks_y = cells_y.saturating_sub(HOG_BLOCK - 1);
    let mut features = Vec::with_capacity(blocks_x * blocks_y * HOG_BLOCK * HOG_BLOCK * HOG_BINS);
    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let start = features.len();
            for cy in by..by + HOG_BLOCK {
                for cx in bx..bx + HOG_BLOCK {
                    features.extend_from_slice(&cells[cy * cells_x + cx]);
                }
            }
            let norm: f32 = features[start..].iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in &mut features[start..] {
                    *v /= norm;
                }
            }
        }
    }
    features
}

/// Normalized 256-bin histogram of 8-neighbor, radius-1 local binary
/// patterns. Captures skin-texture changes the gradient descriptor misses.
fn lbp_histogram(gray: &GrayImage) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let px = |x: usize, y: usize| gray.get_pixel(x as u32, y as u32).0[0];

    let mut hist = vec![0.0f32; 256];
    // Neighbor offsets in a fixed clockwise order.
    const NEIGHBORS: [(i32, i32); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = px(x, y);
            let mut code = 0u8;
            for (bit, (dx, dy)) in NEIGHBORS.iter().enumerate() {
                let neighbor = px((x as i32 + dx) as usize, (y as i32 + dy) as usize);
                if neighbor >= center {
                    code |= 1 << bit;
                }
            }
            hist[code as usize] += 1.0;
        }
    }

    let total: f32 = hist.iter().sum::<f32>() + 1e-7;
    for v in &mut hist {
        *v /= total;
    }
    hist
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    dot / (na * nb + 1e-7)
}

fn chi2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .filter(|(x, y)| **x + **y > 0.0)
        .map(|(x, y)| {
            let (x, y) = (*x as f64, *y as f64);
            (x - y).powi(2) / (x + y)
        })
        .sum()
}

// ═══════════════════════════════════════════════════════════
// ReferenceDataset
// ═══════════════════════════════════════════════════════════

/// Per-class mean similarity of one frame against the dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerClassSimilarity {
    pub truth: f64,
    pub fake: f64,
}

/// Labeled face exemplars the similarity analyzer compares against.
///
/// Loaded from a directory with `truth/` and `lie/` image subdirectories.
/// Near-duplicate exemplars are skipped on load via perceptual hashing so a
/// padded dataset cannot double-weight one expression.
pub struct ReferenceDataset {
    truth: Vec<FaceDescriptor>,
    lie: Vec<FaceDescriptor>,
}

impl ReferenceDataset {
    /// Load exemplars from `dataset_dir`. Missing directories or unreadable
    /// images are logged and skipped; `is_loaded` reports whether both
    /// classes ended up non-empty.
    pub fn load(dataset_dir: &Path) -> Self {
        let truth = load_class_dir(&dataset_dir.join("truth"));
        let lie = load_class_dir(&dataset_dir.join("lie"));

        let dataset = Self { truth, lie };
        if dataset.is_loaded() {
            info!(
                truth = dataset.truth_count(),
                lie = dataset.lie_count(),
                "Micro-expression reference dataset loaded"
            );
        } else {
            warn!(
                dir = %dataset_dir.display(),
                "Micro-expression dataset missing or empty, similarity analyzer unavailable"
            );
        }
        dataset
    }

    /// Build a dataset from in-memory exemplars (wiring and tests).
    pub fn from_exemplars(truth: &[RgbImage], lie: &[RgbImage]) -> Self {
        Self {
            truth: truth.iter().map(descriptor).collect(),
            lie: lie.iter().map(descriptor).collect(),
        }
    }

    /// Both exemplar classes present.
    pub fn is_loaded(&self) -> bool {
        !self.truth.is_empty() && !self.lie.is_empty()
    }

    pub fn truth_count(&self) -> usize {
        self.truth.len()
    }

    pub fn lie_count(&self) -> usize {
        self.lie.len()
    }

    /// Mean similarity of a frame descriptor against each exemplar class.
    pub fn compare(&self, frame: &FaceDescriptor) -> PerClassSimilarity {
        let mean = |class: &[FaceDescriptor]| {
            if class.is_empty() {
                return 0.0;
            }
            class
                .iter()
                .map(|e| descriptor_similarity(frame, e))
                .sum::<f64>()
                / class.len() as f64
        };
        PerClassSimilarity {
            truth: mean(&self.truth),
            fake: mean(&self.lie),
        }
    }
}

/// Read one class directory into descriptors, skipping unreadable files and
/// perceptual near-duplicates.
fn load_class_dir(dir: &Path) -> Vec<FaceDescriptor> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Reference class directory unavailable");
            return Vec::new();
        }
    };

    let hasher = img_hash::HasherConfig::new()
        .hash_alg(img_hash::HashAlg::DoubleGradient)
        .hash_size(16, 16)
        .to_hasher();

    let mut paths: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();

    let mut descriptors = Vec::new();
    let mut hashes: Vec<img_hash::ImageHash> = Vec::new();
    for path in paths {
        let img = match image::open(&path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable exemplar");
                continue;
            }
        };

        let hash = hasher.hash_image(&img);
        if hashes.iter().any(|h| h.dist(&hash) <= DEDUP_MAX_DISTANCE) {
            debug!(path = %path.display(), "Skipping near-duplicate exemplar");
            continue;
        }
        hashes.push(hash);
        descriptors.push(descriptor(&img));
    }
    descriptors
}

// ═══════════════════════════════════════════════════════════
// SimilarityAnalyzer adapter
// ═══════════════════════════════════════════════════════════

/// The similarity analyzer adapter.
pub struct SimilarityAnalyzer {
    dataset: Arc<ReferenceDataset>,
}

impl SimilarityAnalyzer {
    pub fn new(dataset: Arc<ReferenceDataset>) -> Self {
        Self { dataset }
    }

    pub fn dataset(&self) -> &ReferenceDataset {
        &self.dataset
    }
}

impl EvidenceAnalyzer for SimilarityAnalyzer {
    fn source(&self) -> AnalyzerSource {
        AnalyzerSource::Similarity
    }

    fn evaluate(&self, evidence: &Evidence) -> Result<AnalyzerOutcome, AnalyzerError> {
        if !self.dataset.is_loaded() {
            return Err(AnalyzerError::Unavailable {
                origin: SOURCE_NAME,
                reason: "reference dataset not loaded".into(),
            });
        }
        if evidence.face_frames.is_empty() {
            return Err(AnalyzerError::Inference {
                origin: SOURCE_NAME,
                reason: "evidence contains no face frames".into(),
            });
        }

        // Per-frame classification: relative truth similarity, ties to Truth.
        let mut truth_confidences = Vec::new();
        let mut lie_confidences = Vec::new();
        for frame in &evidence.face_frames {
            let sim = self.dataset.compare(&descriptor(frame));
            let total = sim.truth + sim.fake;
            let truth_share = if total > 0.0 { sim.truth / total } else { 0.5 };
            if truth_share >= 0.5 {
                truth_confidences.push(truth_share);
            } else {
                lie_confidences.push(1.0 - truth_share);
            }
        }

        let mean = |v: &[f64]| {
            if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            }
        };
        let (truth_votes, lie_votes) = (truth_confidences.len(), lie_confidences.len());
        let (avg_truth, avg_lie) = (mean(&truth_confidences), mean(&lie_confidences));

        // Majority vote; vote tie falls to the higher mean confidence, and
        // a full tie favors Truth.
        let label = if truth_votes > lie_votes {
            Label::Truth
        } else if lie_votes > truth_votes {
            Label::Fake
        } else if avg_truth >= avg_lie {
            Label::Truth
        } else {
            Label::Fake
        };

        let (winning_votes, winning_confidence) = match label {
            Label::Truth => (truth_votes, avg_truth),
            Label::Fake => (lie_votes, avg_lie),
        };
        let total_frames = evidence.face_frames.len();
        let agreement = winning_votes as f64 / total_frames as f64;

        let truth_probability = match label {
            Label::Truth => winning_confidence,
            Label::Fake => 1.0 - winning_confidence,
        };

        let band = |bands: crate::config::FeatureBands, strength: f64| match label {
            Label::Truth => bands.truth.scale(strength),
            Label::Fake => bands.fake.scale(strength),
        };

        debug!(
            truth_votes,
            lie_votes,
            label = label.as_str(),
            "Similarity analysis complete across {total_frames} frames"
        );

        Ok(AnalyzerOutcome {
            source: AnalyzerSource::Similarity,
            label,
            truth_probability,
            confidence_percent: (winning_confidence * 100.0).clamp(0.0, 100.0),
            subscores: FeatureScores {
                facial_expressions: band(FACIAL_EXPRESSION_BANDS, agreement),
                // No audio signal in this analyzer.
                voice_analysis: None,
                micro_gestures: band(MICRO_GESTURE_BANDS, winning_confidence),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::VideoMetadata;
    use image::Rgb;

    /// Vertical stripes: strong horizontal gradients.
    fn vertical_stripes() -> RgbImage {
        RgbImage::from_fn(FACE_CROP_SIZE, FACE_CROP_SIZE, |x, _| {
            if (x / 8) % 2 == 0 {
                Rgb([230, 230, 230])
            } else {
                Rgb([30, 30, 30])
            }
        })
    }

    /// Horizontal stripes: strong vertical gradients.
    fn horizontal_stripes() -> RgbImage {
        RgbImage::from_fn(FACE_CROP_SIZE, FACE_CROP_SIZE, |_, y| {
            if (y / 8) % 2 == 0 {
                Rgb([230, 230, 230])
            } else {
                Rgb([30, 30, 30])
            }
        })
    }

    fn evidence_of(frames: Vec<RgbImage>) -> Evidence {
        Evidence {
            face_frames: frames,
            audio_vector: vec![0.0; crate::evidence::audio::AUDIO_FEATURE_DIM],
            metadata: VideoMetadata {
                fps: 30.0,
                duration_seconds: 3.0,
                frame_count: 90,
            },
        }
    }

    fn striped_dataset() -> Arc<ReferenceDataset> {
        Arc::new(ReferenceDataset::from_exemplars(
            &[vertical_stripes()],
            &[horizontal_stripes()],
        ))
    }

    #[test]
    fn descriptor_has_expected_shape() {
        let d = descriptor(&vertical_stripes());
        let cells = (FACE_CROP_SIZE as usize) / HOG_CELL;
        let blocks = cells - (HOG_BLOCK - 1);
        assert_eq!(d.hog.len(), blocks * blocks * HOG_BLOCK * HOG_BLOCK * HOG_BINS);
        assert_eq!(d.lbp.len(), 256);
        let lbp_sum: f32 = d.lbp.iter().sum();
        assert!((lbp_sum - 1.0).abs() < 1e-3);
    }

    #[test]
    fn identical_faces_are_maximally_similar() {
        let a = descriptor(&vertical_stripes());
        let b = descriptor(&vertical_stripes());
        let same = descriptor_similarity(&a, &b);
        assert!(same > 0.99, "self-similarity = {same}");

        let c = descriptor(&horizontal_stripes());
        let different = descriptor_similarity(&a, &c);
        assert!(different < same, "cross-similarity {different} >= {same}");
    }

    #[test]
    fn unloaded_dataset_makes_analyzer_unavailable() {
        let dataset = Arc::new(ReferenceDataset::from_exemplars(&[], &[vertical_stripes()]));
        assert!(!dataset.is_loaded());
        let analyzer = SimilarityAnalyzer::new(dataset);
        let result = analyzer.evaluate(&evidence_of(vec![vertical_stripes()]));
        assert!(matches!(result, Err(AnalyzerError::Unavailable { .. })));
    }

    #[test]
    fn frame_matching_truth_exemplars_votes_truth() {
        let analyzer = SimilarityAnalyzer::new(striped_dataset());
        let outcome = analyzer
            .evaluate(&evidence_of(vec![vertical_stripes()]))
            .unwrap();
        assert_eq!(outcome.label, Label::Truth);
        assert!(outcome.truth_probability > 0.5);
        assert_eq!(outcome.source, AnalyzerSource::Similarity);
    }

    #[test]
    fn majority_vote_decides_label() {
        let analyzer = SimilarityAnalyzer::new(striped_dataset());
        let outcome = analyzer
            .evaluate(&evidence_of(vec![
                horizontal_stripes(),
                horizontal_stripes(),
                vertical_stripes(),
            ]))
            .unwrap();
        assert_eq!(outcome.label, Label::Fake);
        assert!(outcome.truth_probability < 0.5);
    }

    #[test]
    fn outcome_has_no_voice_subscore_and_stays_in_bands() {
        let analyzer = SimilarityAnalyzer::new(striped_dataset());
        let outcome = analyzer
            .evaluate(&evidence_of(vec![vertical_stripes(), vertical_stripes()]))
            .unwrap();

        assert!(outcome.subscores.voice_analysis.is_none());
        let band = FACIAL_EXPRESSION_BANDS.truth;
        let facial = outcome.subscores.facial_expressions;
        assert!(facial >= band.low && facial <= band.high);
        assert!((0.0..=100.0).contains(&outcome.confidence_percent));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let analyzer = SimilarityAnalyzer::new(striped_dataset());
        let evidence = evidence_of(vec![vertical_stripes(), horizontal_stripes()]);
        let a = analyzer.evaluate(&evidence).unwrap();
        let b = analyzer.evaluate(&evidence).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn load_skips_near_duplicate_exemplars() {
        let dir = tempfile::tempdir().unwrap();
        let truth_dir = dir.path().join("truth");
        let lie_dir = dir.path().join("lie");
        std::fs::create_dir_all(&truth_dir).unwrap();
        std::fs::create_dir_all(&lie_dir).unwrap();

        vertical_stripes().save(truth_dir.join("a.png")).unwrap();
        vertical_stripes().save(truth_dir.join("b.png")).unwrap();
        horizontal_stripes().save(lie_dir.join("a.png")).unwrap();

        let dataset = ReferenceDataset::load(dir.path());
        assert!(dataset.is_loaded());
        assert_eq!(dataset.truth_count(), 1, "duplicate exemplar must be skipped");
        assert_eq!(dataset.lie_count(), 1);
    }

    #[test]
    fn load_with_missing_directories_is_empty_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = ReferenceDataset::load(&dir.path().join("nowhere"));
        assert!(!dataset.is_loaded());
        assert_eq!(dataset.truth_count(), 0);
    }
}
