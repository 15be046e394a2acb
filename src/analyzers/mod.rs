//! Analyzer adapters.
//!
//! Two structurally different evaluators — a temporal neural classifier and
//! a reference-similarity micro-expression comparator — sit behind one
//! capability trait so the fusion engine never sees analyzer internals.
//! An adapter that cannot run fails fast; it never fabricates a 50/50
//! outcome.

pub mod classifier;
pub mod similarity;

use crate::evidence::Evidence;
use crate::verdict::{AnalyzerOutcome, AnalyzerSource};

pub use classifier::{MockModel, TemporalClassifier, TrainedModel};
pub use similarity::{ReferenceDataset, SimilarityAnalyzer};

/// A single analyzer's capability over extracted evidence.
pub trait EvidenceAnalyzer: Send + Sync {
    fn source(&self) -> AnalyzerSource;

    /// Evaluate evidence into an outcome, or fail explicitly.
    ///
    /// `Unavailable` means the collaborator (model / reference dataset) is
    /// not loaded; `Inference` means evaluation itself broke. Both are
    /// consumed by the engine's fusion cascade, never surfaced to callers.
    fn evaluate(&self, evidence: &Evidence) -> Result<AnalyzerOutcome, AnalyzerError>;
}

/// Errors from analyzer evaluation.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("{origin} analyzer unavailable: {reason}")]
    Unavailable { origin: &'static str, reason: String },
    #[error("{origin} inference failed: {reason}")]
    Inference { origin: &'static str, reason: String },
}
