//! Temporal classifier adapter.
//!
//! Wraps the trained visual+audio classifier behind the [`TrainedModel`]
//! collaborator interface. The adapter owns input shaping (pad/truncate to
//! exactly 30 frames, [0,1] CHW pixel layout) and outcome shaping (label,
//! confidence, banded subscores); the model only maps a fixed-shape tensor
//! pair to a two-class distribution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use crate::config::{FACIAL_EXPRESSION_BANDS, MICRO_GESTURE_BANDS, VOICE_ANALYSIS_BANDS};
use crate::evidence::audio::{self, AUDIO_FEATURE_DIM};
use crate::evidence::{Evidence, FACE_CROP_SIZE};
use crate::verdict::{AnalyzerOutcome, AnalyzerSource, FeatureScores, Label};

use super::{AnalyzerError, EvidenceAnalyzer};

/// Frame sequence length the classifier was trained on. Shorter evidence is
/// zero-image padded, longer evidence truncated.
pub const FRAME_SEQUENCE_LEN: usize = 30;

/// Color channels per frame.
pub const FRAME_CHANNELS: usize = 3;

/// f32 values in one prepared frame (CHW).
const FRAME_VALUES: usize = FRAME_CHANNELS * (FACE_CROP_SIZE * FACE_CROP_SIZE) as usize;

const SOURCE_NAME: &str = "classifier";

// ═══════════════════════════════════════════════════════════
// Collaborator interface
// ═══════════════════════════════════════════════════════════

/// Two-class output distribution. Index order matches the trained head:
/// class 0 is Fake, class 1 is Truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassProbabilities {
    pub fake: f32,
    pub truth: f32,
}

impl ClassProbabilities {
    pub fn truth_probability(&self) -> f64 {
        (self.truth as f64).clamp(0.0, 1.0)
    }

    /// Probability of the winning class.
    pub fn winning(&self) -> f64 {
        self.truth_probability().max(1.0 - self.truth_probability())
    }
}

/// Fixed-shape model input: `[FRAME_SEQUENCE_LEN, 3, 224, 224]` frames
/// flattened row-major, plus the 20-dim audio vector.
#[derive(Debug, Clone)]
pub struct ClassifierInput {
    pub frames: Vec<f32>,
    pub audio: Vec<f32>,
}

/// The trained classifier collaborator. One inference per call, no online
/// learning.
pub trait TrainedModel: Send + Sync {
    fn infer(&self, input: &ClassifierInput) -> Result<ClassProbabilities, AnalyzerError>;
}

// ═══════════════════════════════════════════════════════════
// Model metadata sidecar
// ═══════════════════════════════════════════════════════════

/// `model_metadata.json` written next to the weights by the training
/// tooling.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    pub model_path: Option<String>,
    pub timestamp: Option<String>,
    pub accuracy: Option<f64>,
}

impl ModelMetadata {
    /// Read the sidecar from a models directory. `None` when absent or
    /// unparseable (the adapter still works without it).
    pub fn load(models_dir: &std::path::Path) -> Option<Self> {
        let path = models_dir.join("model_metadata.json");
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable model metadata");
                None
            }
        }
    }

    /// Model version name (the weight file's basename).
    pub fn version(&self) -> Option<String> {
        self.model_path
            .as_deref()
            .map(|p| {
                std::path::Path::new(p)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.to_string())
            })
    }
}

/// Availability and training provenance of the classifier model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub version: Option<String>,
    pub last_trained: Option<String>,
    pub accuracy: Option<f64>,
}

// ═══════════════════════════════════════════════════════════
// TemporalClassifier adapter
// ═══════════════════════════════════════════════════════════

/// The temporal classifier adapter.
pub struct TemporalClassifier {
    model: Option<Arc<dyn TrainedModel>>,
    metadata: Option<ModelMetadata>,
}

impl TemporalClassifier {
    pub fn new(model: Arc<dyn TrainedModel>, metadata: Option<ModelMetadata>) -> Self {
        Self {
            model: Some(model),
            metadata,
        }
    }

    /// Adapter without a loaded model — every evaluation fails with
    /// `Unavailable`, which the fusion cascade consumes.
    pub fn unavailable() -> Self {
        Self {
            model: None,
            metadata: None,
        }
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            loaded: self.model.is_some(),
            version: self.metadata.as_ref().and_then(|m| m.version()),
            last_trained: self.metadata.as_ref().and_then(|m| m.timestamp.clone()),
            accuracy: self.metadata.as_ref().and_then(|m| m.accuracy),
        }
    }
}

impl EvidenceAnalyzer for TemporalClassifier {
    fn source(&self) -> AnalyzerSource {
        AnalyzerSource::Classifier
    }

    fn evaluate(&self, evidence: &Evidence) -> Result<AnalyzerOutcome, AnalyzerError> {
        let model = self.model.as_ref().ok_or_else(|| AnalyzerError::Unavailable {
            origin: SOURCE_NAME,
            reason: "no trained model loaded".into(),
        })?;

        let input = prepare_input(evidence);
        let probs = model.infer(&input)?;

        let truth_probability = probs.truth_probability();
        let label = Label::from_truth_probability(truth_probability);
        let winning = probs.winning();

        let band = |bands: crate::config::FeatureBands| match label {
            Label::Truth => bands.truth.scale(winning),
            Label::Fake => bands.fake.scale(winning),
        };

        Ok(AnalyzerOutcome {
            source: AnalyzerSource::Classifier,
            label,
            truth_probability,
            confidence_percent: winning * 100.0,
            subscores: FeatureScores {
                facial_expressions: band(FACIAL_EXPRESSION_BANDS),
                voice_analysis: Some(band(VOICE_ANALYSIS_BANDS)),
                micro_gestures: band(MICRO_GESTURE_BANDS),
            },
        })
    }
}

/// Shape evidence into the model's fixed input: exactly
/// [`FRAME_SEQUENCE_LEN`] frames (zero-image padded / truncated), pixels
/// normalized to [0,1] in CHW order, audio forced to 20 dims.
pub fn prepare_input(evidence: &Evidence) -> ClassifierInput {
    let mut frames = Vec::with_capacity(FRAME_SEQUENCE_LEN * FRAME_VALUES);

    for idx in 0..FRAME_SEQUENCE_LEN {
        match evidence.face_frames.get(idx) {
            Some(img) => {
                // Crops are produced at the canonical size; resize guards
                // against evidence assembled elsewhere.
                let canonical;
                let img = if img.width() == FACE_CROP_SIZE && img.height() == FACE_CROP_SIZE {
                    img
                } else {
                    canonical = image::imageops::resize(
                        img,
                        FACE_CROP_SIZE,
                        FACE_CROP_SIZE,
                        image::imageops::FilterType::Triangle,
                    );
                    &canonical
                };
                for channel in 0..FRAME_CHANNELS {
                    for pixel in img.pixels() {
                        frames.push(pixel.0[channel] as f32 / 255.0);
                    }
                }
            }
            None => frames.extend(std::iter::repeat(0.0).take(FRAME_VALUES)),
        }
    }

    ClassifierInput {
        frames,
        audio: audio::force_dimension(evidence.audio_vector.clone(), AUDIO_FEATURE_DIM),
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX model — behind `onnx-model` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-model")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;

    use super::{
        AnalyzerError, ClassProbabilities, ClassifierInput, TrainedModel, AUDIO_FEATURE_DIM,
        FRAME_CHANNELS, FRAME_SEQUENCE_LEN, SOURCE_NAME,
    };
    use crate::evidence::FACE_CROP_SIZE;

    fn inference_error(reason: String) -> AnalyzerError {
        AnalyzerError::Inference {
            origin: SOURCE_NAME,
            reason,
        }
    }

    /// ONNX Runtime implementation of the trained classifier.
    ///
    /// Expects `model.onnx` in the model directory; the network takes
    /// `[1, 30, 3, 224, 224]` frames and `[1, 20]` audio features and
    /// returns a `[1, 2]` logit pair (softmax applied here).
    ///
    /// Uses interior mutability (Mutex) because ort::Session::run requires
    /// `&mut self` but our TrainedModel trait exposes `&self` for ergonomic
    /// shared usage.
    pub struct OnnxTemporalModel {
        session: Mutex<Session>,
    }

    impl OnnxTemporalModel {
        /// Load the ONNX classifier from a directory containing `model.onnx`.
        pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
            let model_path = model_dir.join("model.onnx");
            if !model_path.exists() {
                return Err(AnalyzerError::Unavailable {
                    origin: SOURCE_NAME,
                    reason: format!("model weights not found at {}", model_path.display()),
                });
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| inference_error(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| inference_error(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| inference_error(format!("ONNX load failed: {e}")))?;

            tracing::info!("ONNX classifier loaded from {}", model_dir.display());

            Ok(Self {
                session: Mutex::new(session),
            })
        }
    }

    impl TrainedModel for OnnxTemporalModel {
        fn infer(&self, input: &ClassifierInput) -> Result<ClassProbabilities, AnalyzerError> {
            use ort::value::TensorRef;

            let side = FACE_CROP_SIZE as usize;
            let frames = ndarray::Array::from_shape_vec(
                (1, FRAME_SEQUENCE_LEN, FRAME_CHANNELS, side, side),
                input.frames.clone(),
            )
            .map_err(|e| inference_error(e.to_string()))?;
            let audio =
                ndarray::Array2::from_shape_vec((1, AUDIO_FEATURE_DIM), input.audio.clone())
                    .map_err(|e| inference_error(e.to_string()))?;

            let frames_tensor = TensorRef::from_array_view(&frames)
                .map_err(|e| inference_error(e.to_string()))?;
            let audio_tensor = TensorRef::from_array_view(&audio)
                .map_err(|e| inference_error(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| inference_error("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![frames_tensor, audio_tensor])
                .map_err(|e| inference_error(format!("ONNX inference failed: {e}")))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| inference_error(format!("Output extraction: {e}")))?;

            if data.len() < 2 {
                return Err(inference_error(format!(
                    "Unexpected output shape: {shape:?}, expected [1, 2]"
                )));
            }

            // Logits → probabilities.
            let (l0, l1) = (data[0] as f64, data[1] as f64);
            let max = l0.max(l1);
            let (e0, e1) = ((l0 - max).exp(), (l1 - max).exp());
            let sum = e0 + e1;

            Ok(ClassProbabilities {
                fake: (e0 / sum) as f32,
                truth: (e1 / sum) as f32,
            })
        }
    }
}

#[cfg(feature = "onnx-model")]
pub use onnx::OnnxTemporalModel;

// ═══════════════════════════════════════════════════════════
// Mock model
// ═══════════════════════════════════════════════════════════

/// Mock classifier model — fixed output, counts invocations.
pub struct MockModel {
    output: ClassProbabilities,
    invocations: AtomicUsize,
}

impl MockModel {
    pub fn returning(fake: f32, truth: f32) -> Self {
        Self {
            output: ClassProbabilities { fake, truth },
            invocations: AtomicUsize::new(0),
        }
    }

    /// Times `infer` has been called — lets cache tests observe that repeat
    /// uploads never reach the model.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl TrainedModel for MockModel {
    fn infer(&self, input: &ClassifierInput) -> Result<ClassProbabilities, AnalyzerError> {
        debug_assert_eq!(input.frames.len(), FRAME_SEQUENCE_LEN * FRAME_VALUES);
        debug_assert_eq!(input.audio.len(), AUDIO_FEATURE_DIM);
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.output)
    }
}
