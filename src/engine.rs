//! The detection engine: upload bytes in, cached verdict out.
//!
//! `DetectionEngine` is the single shared state of the system. It is
//! constructed once at process start — extractor, both analyzer adapters,
//! and the verdict cache are explicit dependencies, not globals — and then
//! shared by reference into whatever transport sits on top.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task;
use tracing::{info, warn};

use crate::analyzers::classifier::{ModelStatus, TemporalClassifier};
use crate::analyzers::similarity::{ReferenceDataset, SimilarityAnalyzer};
use crate::analyzers::{AnalyzerError, EvidenceAnalyzer};
use crate::cache::VerdictCache;
use crate::config;
use crate::content_key::ContentKey;
use crate::evidence::{Evidence, EvidenceExtractor, ExtractionError};
use crate::fusion;
use crate::verdict::{AnalyzerOutcome, Verdict};

/// Default request-level timeout. Uploads are short-lived; anything slower
/// fails as retryable rather than partially applying fusion.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

/// Request-level analysis errors — the only failures a caller ever sees.
/// Analyzer and cache-write problems degrade inside the pipeline instead.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Video could not be decoded: {0}")]
    VideoUnreadable(String),
    #[error("No usable evidence: no face detected in any sampled frame")]
    NoFaceDetected,
    #[error("Analysis timed out after {0:?}; the upload can be retried")]
    Timeout(Duration),
    #[error("I/O error during analysis: {0}")]
    Io(#[from] std::io::Error),
    #[error("Analysis task failed: {0}")]
    TaskFailed(String),
}

impl From<ExtractionError> for AnalysisError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::NoFaceDetected => AnalysisError::NoFaceDetected,
            ExtractionError::VideoUnreadable(reason) => AnalysisError::VideoUnreadable(reason),
            // Audio failures are recovered inside extraction; reaching here
            // means decode itself broke.
            ExtractionError::AudioUnavailable(reason) => AnalysisError::VideoUnreadable(reason),
            ExtractionError::Io(e) => AnalysisError::Io(e),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Engine status
// ═══════════════════════════════════════════════════════════

/// Availability snapshot: classifier model, reference dataset, cache size.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStatus {
    pub model: ModelStatus,
    pub dataset_loaded: bool,
    pub dataset_truth_exemplars: usize,
    pub dataset_lie_exemplars: usize,
    pub cached_verdicts: usize,
}

// ═══════════════════════════════════════════════════════════
// DetectionEngine
// ═══════════════════════════════════════════════════════════

/// The analysis pipeline behind every upload:
/// digest → cache → extract → analyze (both adapters) → fuse → store.
pub struct DetectionEngine {
    extractor: Arc<EvidenceExtractor>,
    classifier: Arc<TemporalClassifier>,
    similarity: Arc<SimilarityAnalyzer>,
    cache: VerdictCache,
    uploads_dir: PathBuf,
    request_timeout: Duration,
}

impl DetectionEngine {
    pub fn new(
        extractor: EvidenceExtractor,
        classifier: TemporalClassifier,
        similarity: SimilarityAnalyzer,
        cache: VerdictCache,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            extractor: Arc::new(extractor),
            classifier: Arc::new(classifier),
            similarity: Arc::new(similarity),
            cache,
            uploads_dir,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the request-level timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Production wiring from the default application directories.
    ///
    /// A model or dataset that fails to load leaves its adapter unavailable
    /// (warned); the engine still serves verdicts through the fusion
    /// cascade.
    pub fn bootstrap() -> Self {
        let models_dir = config::models_dir();

        #[cfg(feature = "onnx-model")]
        let classifier = {
            use crate::analyzers::classifier::{ModelMetadata, OnnxTemporalModel};
            let metadata = ModelMetadata::load(&models_dir);
            match OnnxTemporalModel::load(&models_dir) {
                Ok(model) => TemporalClassifier::new(Arc::new(model), metadata),
                Err(e) => {
                    warn!(error = %e, "Classifier model unavailable, continuing without it");
                    TemporalClassifier::unavailable()
                }
            }
        };
        #[cfg(not(feature = "onnx-model"))]
        let classifier = {
            warn!(
                dir = %models_dir.display(),
                "Built without the onnx-model feature, classifier adapter unavailable"
            );
            TemporalClassifier::unavailable()
        };

        let dataset = ReferenceDataset::load(&config::reference_dataset_dir());

        Self::new(
            EvidenceExtractor::ffmpeg(),
            classifier,
            SimilarityAnalyzer::new(Arc::new(dataset)),
            VerdictCache::open(&config::cache_dir()),
            config::uploads_dir(),
        )
    }

    /// Analyze an upload, returning the cached verdict for repeat content.
    ///
    /// `filename` is used only as an extension hint for the scratch copy
    /// handed to the decoder.
    pub async fn analyze(&self, bytes: &[u8], filename: &str) -> Result<Verdict, AnalysisError> {
        let key = ContentKey::digest(bytes);
        info!(
            key = %key.short(),
            filename,
            bytes = bytes.len(),
            "Upload received"
        );

        let timeout = self.request_timeout;
        match tokio::time::timeout(
            timeout,
            self.cache
                .get_or_compute(&key, || self.run_pipeline(key, bytes, filename)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(key = %key.short(), "Analysis timed out");
                Err(AnalysisError::Timeout(timeout))
            }
        }
    }

    /// Current availability of the engine's collaborators.
    pub async fn status(&self) -> EngineStatus {
        let dataset = self.similarity.dataset();
        EngineStatus {
            model: self.classifier.status(),
            dataset_loaded: dataset.is_loaded(),
            dataset_truth_exemplars: dataset.truth_count(),
            dataset_lie_exemplars: dataset.lie_count(),
            cached_verdicts: self.cache.len().await,
        }
    }

    /// Drop every cached verdict.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    // ── Pipeline ────────────────────────────────────────────

    /// Cache-miss path: extract evidence, run both analyzers, fuse.
    async fn run_pipeline(
        &self,
        key: ContentKey,
        bytes: &[u8],
        filename: &str,
    ) -> Result<Verdict, AnalysisError> {
        let upload = self.stage_upload(bytes, filename)?;
        let video_path = upload.path().to_path_buf();

        let extractor = self.extractor.clone();
        let evidence = task::spawn_blocking(move || extractor.extract(&video_path, &key))
            .await
            .map_err(|e| AnalysisError::TaskFailed(e.to_string()))??;
        let evidence = Arc::new(evidence);
        // The scratch copy is only needed for decoding.
        drop(upload);

        // No data dependency between the analyzers — run them in parallel;
        // both complete (or fail) before fusion.
        let (classifier_outcome, similarity_outcome) = tokio::join!(
            run_analyzer(self.classifier.clone(), evidence.clone()),
            run_analyzer(self.similarity.clone(), evidence.clone()),
        );

        let verdict = fusion::fuse(
            &key,
            classifier_outcome.as_ref(),
            similarity_outcome.as_ref(),
        );
        info!(
            key = %key.short(),
            prediction = verdict.prediction.as_str(),
            confidence = verdict.confidence,
            provenance = ?verdict.provenance,
            fallback = verdict.is_fallback,
            "Verdict produced"
        );
        Ok(verdict)
    }

    /// Write the upload to a scratch file the decoder can open. The file is
    /// removed on drop, on every exit path.
    fn stage_upload(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<tempfile::NamedTempFile, AnalysisError> {
        std::fs::create_dir_all(&self.uploads_dir)?;

        let suffix = std::path::Path::new(filename)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        let upload = tempfile::Builder::new()
            .prefix(&uuid::Uuid::new_v4().to_string())
            .suffix(&suffix)
            .tempfile_in(&self.uploads_dir)?;
        std::fs::write(upload.path(), bytes)?;
        Ok(upload)
    }
}

/// Evaluate one analyzer on a blocking thread. Failures are logged with
/// full context and collapse to `None` — the fusion cascade consumes
/// absence, the caller never does.
async fn run_analyzer(
    analyzer: Arc<dyn EvidenceAnalyzer>,
    evidence: Arc<Evidence>,
) -> Option<AnalyzerOutcome> {
    let source = analyzer.source();
    let result = task::spawn_blocking(move || analyzer.evaluate(&evidence)).await;

    match result {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(AnalyzerError::Unavailable { origin, reason })) => {
            warn!(analyzer = origin, reason = %reason, "Analyzer unavailable, fusing without it");
            None
        }
        Ok(Err(AnalyzerError::Inference { origin, reason })) => {
            warn!(analyzer = origin, reason = %reason, "Analyzer inference failed, fusing without it");
            None
        }
        Err(join_error) => {
            warn!(
                analyzer = source.as_str(),
                error = %join_error,
                "Analyzer task failed, fusing without it"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::classifier::MockModel;
    use crate::evidence::decoder::MockDecoder;
    use crate::evidence::face::SkinRegionLocalizer;
    use crate::verdict::{Label, Provenance};
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

    fn stripes(vertical: bool) -> RgbImage {
        RgbImage::from_fn(224, 224, |x, y| {
            let band = if vertical { x / 8 } else { y / 8 };
            if band % 2 == 0 {
                Rgb([230, 230, 230])
            } else {
                Rgb([30, 30, 30])
            }
        })
    }

    fn loaded_dataset() -> Arc<ReferenceDataset> {
        Arc::new(ReferenceDataset::from_exemplars(
            &[stripes(true)],
            &[stripes(false)],
        ))
    }

    fn empty_dataset() -> Arc<ReferenceDataset> {
        Arc::new(ReferenceDataset::from_exemplars(&[], &[]))
    }

    struct EngineFixture {
        engine: DetectionEngine,
        model: Arc<MockModel>,
        _dir: tempfile::TempDir,
    }

    fn build_engine(
        frames: Vec<RgbImage>,
        model: Option<Arc<MockModel>>,
        dataset: Arc<ReferenceDataset>,
    ) -> EngineFixture {
        let dir = tempfile::tempdir().unwrap();
        let model = model.unwrap_or_else(|| Arc::new(MockModel::returning(0.1, 0.9)));

        let classifier = TemporalClassifier::new(model.clone(), None);
        let engine = DetectionEngine::new(
            EvidenceExtractor::new(
                Box::new(MockDecoder::new(frames).with_audio(vec![0.0; 32_000])),
                Box::new(SkinRegionLocalizer::new()),
            ),
            classifier,
            SimilarityAnalyzer::new(dataset),
            VerdictCache::open(&dir.path().join("cache")),
            dir.path().join("uploads"),
        );
        EngineFixture {
            engine,
            model,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn analyze_produces_fused_verdict() {
        let fx = build_engine(vec![face_frame(), face_frame()], None, loaded_dataset());
        let verdict = fx.engine.analyze(b"upload one", "clip.mp4").await.unwrap();

        assert_eq!(verdict.provenance, Provenance::Both);
        assert!(!verdict.is_fallback);
        assert!(verdict.in_bounds());
        assert_eq!(fx.model.invocation_count(), 1);
    }

    /// Scenario C: identical bytes uploaded twice return the identical
    /// verdict with no second model invocation.
    #[tokio::test]
    async fn repeat_upload_hits_cache_without_reanalysis() {
        let fx = build_engine(vec![face_frame()], None, loaded_dataset());

        let first = fx.engine.analyze(b"same bytes", "a.mp4").await.unwrap();
        let second = fx.engine.analyze(b"same bytes", "b.mp4").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.model.invocation_count(), 1, "cache hit must not re-run the model");
        assert_eq!(fx.engine.cache.len().await, 1);
    }

    /// Scenario D: no detectable face aborts before any adapter or cache
    /// interaction.
    #[tokio::test]
    async fn faceless_video_fails_before_adapters_and_cache() {
        let fx = build_engine(vec![faceless_frame()], None, loaded_dataset());

        let result = fx.engine.analyze(b"nobody", "empty.mp4").await;
        assert!(matches!(result, Err(AnalysisError::NoFaceDetected)));
        assert_eq!(fx.model.invocation_count(), 0);
        assert_eq!(fx.engine.cache.len().await, 0);
    }

    /// Scenario B shape: classifier down, similarity carries the verdict.
    #[tokio::test]
    async fn classifier_outage_degrades_to_similarity_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DetectionEngine::new(
            EvidenceExtractor::new(
                Box::new(MockDecoder::new(vec![face_frame()])),
                Box::new(SkinRegionLocalizer::new()),
            ),
            TemporalClassifier::unavailable(),
            SimilarityAnalyzer::new(loaded_dataset()),
            VerdictCache::open(&dir.path().join("cache")),
            dir.path().join("uploads"),
        );

        let verdict = engine.analyze(b"degraded", "clip.mov").await.unwrap();
        assert_eq!(verdict.provenance, Provenance::SimilarityOnly);
        assert!(!verdict.is_fallback);
        assert!(verdict.in_bounds());
    }

    #[tokio::test]
    async fn both_adapters_down_yields_flagged_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DetectionEngine::new(
            EvidenceExtractor::new(
                Box::new(MockDecoder::new(vec![face_frame()])),
                Box::new(SkinRegionLocalizer::new()),
            ),
            TemporalClassifier::unavailable(),
            SimilarityAnalyzer::new(empty_dataset()),
            VerdictCache::open(&dir.path().join("cache")),
            dir.path().join("uploads"),
        );

        let verdict = engine.analyze(b"all down", "clip.mp4").await.unwrap();
        assert!(verdict.is_fallback);
        assert_eq!(verdict.provenance, Provenance::Fallback);
        assert!(verdict.in_bounds());

        // Deterministic: the fallback is cached and stable.
        let again = engine.analyze(b"all down", "clip.mp4").await.unwrap();
        assert_eq!(verdict, again);
    }

    #[tokio::test]
    async fn classifier_truth_dominates_when_similarity_agrees() {
        let fx = build_engine(
            vec![face_frame()],
            Some(Arc::new(MockModel::returning(0.05, 0.95))),
            loaded_dataset(),
        );
        let verdict = fx.engine.analyze(b"honest subject", "t.mp4").await.unwrap();
        assert_eq!(verdict.prediction, Label::Truth);
    }

    #[tokio::test]
    async fn slow_decode_times_out_with_retryable_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DetectionEngine::new(
            EvidenceExtractor::new(
                Box::new(
                    MockDecoder::new(vec![face_frame()])
                        .with_probe_delay(Duration::from_millis(500)),
                ),
                Box::new(SkinRegionLocalizer::new()),
            ),
            TemporalClassifier::unavailable(),
            SimilarityAnalyzer::new(loaded_dataset()),
            VerdictCache::open(&dir.path().join("cache")),
            dir.path().join("uploads"),
        )
        .with_request_timeout(Duration::from_millis(50));

        let result = engine.analyze(b"slow video", "slow.mp4").await;
        assert!(matches!(result, Err(AnalysisError::Timeout(_))));
    }

    #[tokio::test]
    async fn status_reports_collaborator_availability() {
        let fx = build_engine(vec![face_frame()], None, loaded_dataset());
        let status = fx.engine.status().await;

        assert!(status.model.loaded);
        assert!(status.dataset_loaded);
        assert_eq!(status.dataset_truth_exemplars, 1);
        assert_eq!(status.dataset_lie_exemplars, 1);
        assert_eq!(status.cached_verdicts, 0);

        fx.engine.analyze(b"counted", "c.mp4").await.unwrap();
        assert_eq!(fx.engine.status().await.cached_verdicts, 1);
    }

    #[tokio::test]
    async fn clear_cache_forces_recomputation() {
        let fx = build_engine(vec![face_frame()], None, loaded_dataset());

        fx.engine.analyze(b"recompute me", "r.mp4").await.unwrap();
        assert_eq!(fx.model.invocation_count(), 1);

        fx.engine.clear_cache().await;
        fx.engine.analyze(b"recompute me", "r.mp4").await.unwrap();
        assert_eq!(fx.model.invocation_count(), 2);
    }
}
