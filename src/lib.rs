//! Candor — locally-run deception analysis.
//!
//! Turns an uploaded video into a single truth/deception verdict by fusing
//! two independent evidence sources — a temporal visual+audio classifier
//! and a reference-similarity micro-expression analyzer — and caches every
//! verdict by content digest so identical uploads never recompute.
//!
//! ```no_run
//! use candor::DetectionEngine;
//!
//! # async fn example() -> Result<(), candor::AnalysisError> {
//! let engine = DetectionEngine::bootstrap();
//! let bytes = std::fs::read("interview.mp4")?;
//! let verdict = engine.analyze(&bytes, "interview.mp4").await?;
//! println!("{} at {:.1}%", verdict.prediction.as_str(), verdict.confidence);
//! # Ok(())
//! # }
//! ```

pub mod analyzers;
pub mod cache;
pub mod config;
pub mod content_key;
pub mod engine;
pub mod evidence;
pub mod fusion;
pub mod verdict;

pub use analyzers::{EvidenceAnalyzer, ReferenceDataset, SimilarityAnalyzer, TemporalClassifier, TrainedModel};
pub use cache::VerdictCache;
pub use content_key::ContentKey;
pub use engine::{AnalysisError, DetectionEngine, EngineStatus};
pub use evidence::{Evidence, EvidenceExtractor};
pub use verdict::{Label, Provenance, Verdict};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries embedding the engine.
/// Honors `RUST_LOG`, falling back to the application default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);
}
