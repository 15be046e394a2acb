//! Shared data model: analyzer outcomes and the final verdict.
//!
//! Wire shapes (field names, casing) match the external interface consumed
//! by the upload frontends: `{"prediction": "Truth", "confidence": 85.0,
//! "features": {"facialExpressions": ..}, "isFallback": false}`.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Labels and sources
// ═══════════════════════════════════════════════════════════

/// The two-class prediction label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Truth,
    Fake,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Truth => "Truth",
            Label::Fake => "Fake",
        }
    }

    /// Label implied by a truth probability. Exactly 0.5 resolves to Truth,
    /// matching the fusion cascade's `>= 0.5` rule.
    pub fn from_truth_probability(p: f64) -> Self {
        if p >= 0.5 {
            Label::Truth
        } else {
            Label::Fake
        }
    }
}

/// Which analyzer produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyzerSource {
    Classifier,
    Similarity,
}

impl AnalyzerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerSource::Classifier => "classifier",
            AnalyzerSource::Similarity => "similarity",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Feature subscores
// ═══════════════════════════════════════════════════════════

/// Per-analyzer feature subscores, each in [0, 100].
///
/// The similarity analyzer has no audio signal, so its voice score is
/// `None`; fusion fills the gap (classifier's score, or a deterministic
/// synthesis in the similarity-only state).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureScores {
    pub facial_expressions: f64,
    pub voice_analysis: Option<f64>,
    pub micro_gestures: f64,
}

/// Final verdict features — all three always present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictFeatures {
    pub facial_expressions: f64,
    pub voice_analysis: f64,
    pub micro_gestures: f64,
}

impl VerdictFeatures {
    /// True when every feature score sits in [0, 100].
    pub fn in_bounds(&self) -> bool {
        [self.facial_expressions, self.voice_analysis, self.micro_gestures]
            .iter()
            .all(|s| (0.0..=100.0).contains(s))
    }
}

// ═══════════════════════════════════════════════════════════
// Analyzer outcome
// ═══════════════════════════════════════════════════════════

/// One analyzer's independent prediction.
///
/// Absence of an outcome (the adapter returned an error) signals
/// "analyzer unavailable" — it is never encoded as a 50/50 outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerOutcome {
    pub source: AnalyzerSource,
    pub label: Label,
    /// Probability the subject is truthful, in [0, 1].
    pub truth_probability: f64,
    /// Confidence in the winning label, in [0, 100].
    pub confidence_percent: f64,
    pub subscores: FeatureScores,
}

// ═══════════════════════════════════════════════════════════
// Verdict
// ═══════════════════════════════════════════════════════════

/// Which analyzers contributed to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Both,
    ClassifierOnly,
    SimilarityOnly,
    Fallback,
}

/// The final fused prediction. Immutable once produced; this is the value
/// the cache persists and returns for repeat uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub prediction: Label,
    /// Overall confidence in [0, 100].
    pub confidence: f64,
    pub features: VerdictFeatures,
    pub provenance: Provenance,
    #[serde(rename = "isFallback")]
    pub is_fallback: bool,
}

impl Verdict {
    /// True when the confidence and every feature score are in bounds.
    pub fn in_bounds(&self) -> bool {
        (0.0..=100.0).contains(&self.confidence) && self.features.in_bounds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_verdict() -> Verdict {
        Verdict {
            prediction: Label::Truth,
            confidence: 85.0,
            features: VerdictFeatures {
                facial_expressions: 92.0,
                voice_analysis: 88.5,
                micro_gestures: 90.0,
            },
            provenance: Provenance::Both,
            is_fallback: false,
        }
    }

    #[test]
    fn label_from_probability_half_is_truth() {
        assert_eq!(Label::from_truth_probability(0.5), Label::Truth);
        assert_eq!(Label::from_truth_probability(0.51), Label::Truth);
        assert_eq!(Label::from_truth_probability(0.49), Label::Fake);
    }

    #[test]
    fn verdict_serializes_with_wire_field_names() {
        let json = serde_json::to_value(sample_verdict()).unwrap();
        assert_eq!(json["prediction"], "Truth");
        assert_eq!(json["isFallback"], false);
        assert_eq!(json["features"]["facialExpressions"], 92.0);
        assert_eq!(json["features"]["voiceAnalysis"], 88.5);
        assert_eq!(json["features"]["microGestures"], 90.0);
    }

    #[test]
    fn verdict_roundtrips_through_json() {
        let verdict = sample_verdict();
        let json = serde_json::to_string(&verdict).unwrap();
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, verdict);
    }

    #[test]
    fn in_bounds_rejects_out_of_range_scores() {
        let mut verdict = sample_verdict();
        assert!(verdict.in_bounds());
        verdict.features.voice_analysis = 100.5;
        assert!(!verdict.in_bounds());
        verdict.features.voice_analysis = 88.5;
        verdict.confidence = -1.0;
        assert!(!verdict.in_bounds());
    }
}
