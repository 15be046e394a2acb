//! Ensemble fusion.
//!
//! Merges zero, one, or two analyzer outcomes into one verdict through a
//! total cascade over adapter availability. `fuse` is a pure function:
//! fixed inputs always produce the identical verdict, and the no-analyzer
//! fallback derives everything from the content digest.

use rand::{Rng, SeedableRng};

use crate::config::{
    self, FACIAL_EXPRESSION_BANDS, FALLBACK_CONFIDENCE_BAND, MICRO_GESTURE_BANDS,
    VOICE_ANALYSIS_BANDS,
};
use crate::content_key::ContentKey;
use crate::verdict::{AnalyzerOutcome, Label, Provenance, Verdict, VerdictFeatures};

/// Fuse analyzer outcomes into a verdict.
///
/// The cascade is total: every availability combination maps to exactly one
/// verdict.
pub fn fuse(
    key: &ContentKey,
    classifier: Option<&AnalyzerOutcome>,
    similarity: Option<&AnalyzerOutcome>,
) -> Verdict {
    match (classifier, similarity) {
        (Some(c), Some(s)) => fuse_both(c, s),
        (Some(c), None) => classifier_only(c),
        (None, Some(s)) => similarity_only(s),
        (None, None) => fallback_verdict(key),
    }
}

/// Both analyzers reported: weighted truth probability decides the label,
/// confidences average, and subscores compose cross-modally — the voice
/// signal can only come from the classifier, the facial/gesture signals are
/// the similarity analyzer's specialty.
fn fuse_both(c: &AnalyzerOutcome, s: &AnalyzerOutcome) -> Verdict {
    let combined = config::CLASSIFIER_FUSION_WEIGHT * c.truth_probability
        + config::SIMILARITY_FUSION_WEIGHT * s.truth_probability;
    let prediction = Label::from_truth_probability(combined);

    Verdict {
        prediction,
        confidence: (c.confidence_percent + s.confidence_percent) / 2.0,
        features: VerdictFeatures {
            facial_expressions: s.subscores.facial_expressions,
            voice_analysis: c
                .subscores
                .voice_analysis
                .unwrap_or_else(|| synthesized_voice(c)),
            micro_gestures: s.subscores.micro_gestures,
        },
        provenance: Provenance::Both,
        is_fallback: false,
    }
}

/// Only the classifier reported: its outcome carries over verbatim.
fn classifier_only(c: &AnalyzerOutcome) -> Verdict {
    Verdict {
        prediction: c.label,
        confidence: c.confidence_percent,
        features: VerdictFeatures {
            facial_expressions: c.subscores.facial_expressions,
            voice_analysis: c
                .subscores
                .voice_analysis
                .unwrap_or_else(|| synthesized_voice(c)),
            micro_gestures: c.subscores.micro_gestures,
        },
        provenance: Provenance::ClassifierOnly,
        is_fallback: false,
    }
}

/// Only the similarity analyzer reported: reframe its outcome into the
/// verdict schema. It has no audio signal, so the voice subscore is
/// synthesized deterministically from its label strength.
fn similarity_only(s: &AnalyzerOutcome) -> Verdict {
    Verdict {
        prediction: s.label,
        confidence: s.confidence_percent,
        features: VerdictFeatures {
            facial_expressions: s.subscores.facial_expressions,
            voice_analysis: synthesized_voice(s),
            micro_gestures: s.subscores.micro_gestures,
        },
        provenance: Provenance::SimilarityOnly,
        is_fallback: false,
    }
}

/// Neither analyzer reported: a fully deterministic verdict seeded from the
/// content digest, flagged as fallback. The same video always falls back to
/// the same answer, which keeps the cache contract intact.
pub fn fallback_verdict(key: &ContentKey) -> Verdict {
    let mut rng = rand::rngs::StdRng::from_seed(key.seed());

    let prediction = if rng.gen::<f64>() > 0.5 {
        Label::Truth
    } else {
        Label::Fake
    };
    let (lo, hi) = FALLBACK_CONFIDENCE_BAND;
    let confidence = lo + rng.gen::<f64>() * (hi - lo);

    let mut draw = |bands: config::FeatureBands| {
        let band = match prediction {
            Label::Truth => bands.truth,
            Label::Fake => bands.fake,
        };
        band.scale(rng.gen::<f64>())
    };

    Verdict {
        prediction,
        confidence,
        features: VerdictFeatures {
            facial_expressions: draw(FACIAL_EXPRESSION_BANDS),
            voice_analysis: draw(VOICE_ANALYSIS_BANDS),
            micro_gestures: draw(MICRO_GESTURE_BANDS),
        },
        provenance: Provenance::Fallback,
        is_fallback: true,
    }
}

/// Deterministic voice subscore for outcomes without an audio signal:
/// the label's band scaled by the winning-class probability.
fn synthesized_voice(outcome: &AnalyzerOutcome) -> f64 {
    let winning = outcome
        .truth_probability
        .max(1.0 - outcome.truth_probability);
    match outcome.label {
        Label::Truth => VOICE_ANALYSIS_BANDS.truth.scale(winning),
        Label::Fake => VOICE_ANALYSIS_BANDS.fake.scale(winning),
    }
}
