//! Application directories and the analysis configuration constants.
//!
//! The fusion weights and subscore bands below are the empirically-tuned
//! values shipped with the trained model. They are declared here as named
//! configuration so every module reads the same numbers; do not re-derive
//! them per call site.

use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Candor";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    "info,candor=debug".to_string()
}

/// Get the application data directory
/// ~/Candor/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Candor")
}

/// Get the verdict cache directory
pub fn cache_dir() -> PathBuf {
    app_data_dir().join("cache")
}

/// Get the models directory (classifier weights + metadata sidecar)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the micro-expression reference dataset directory
/// (expects `truth/` and `lie/` subdirectories of face exemplars)
pub fn reference_dataset_dir() -> PathBuf {
    app_data_dir().join("micro_expression_dataset")
}

/// Get the scratch directory for in-flight uploads
pub fn uploads_dir() -> PathBuf {
    app_data_dir().join("uploads")
}

// ═══════════════════════════════════════════════════════════
// Fusion configuration
// ═══════════════════════════════════════════════════════════

/// Weight of the temporal classifier's truth probability when both
/// analyzers produced an outcome.
pub const CLASSIFIER_FUSION_WEIGHT: f64 = 0.5;

/// Weight of the similarity analyzer's truth probability when both
/// analyzers produced an outcome. Must sum to 1.0 with the classifier
/// weight.
pub const SIMILARITY_FUSION_WEIGHT: f64 = 0.5;

/// Confidence band for the full-fallback verdict (both analyzers down).
pub const FALLBACK_CONFIDENCE_BAND: (f64, f64) = (70.0, 95.0);

// ═══════════════════════════════════════════════════════════
// Subscore bands
// ═══════════════════════════════════════════════════════════

/// Inclusive [low, high] band for one feature subscore under one label.
///
/// A subscore is placed inside its band by the monotonic map
/// `low + (high - low) * winning_probability`: the more decisive the
/// winning class, the closer the score sits to the band's high end.
#[derive(Debug, Clone, Copy)]
pub struct SubscoreBand {
    pub low: f64,
    pub high: f64,
}

impl SubscoreBand {
    /// Map a winning-class probability (or any [0,1] strength) into the band.
    pub fn scale(&self, strength: f64) -> f64 {
        let s = strength.clamp(0.0, 1.0);
        self.low + (self.high - self.low) * s
    }
}

/// Per-feature bands, one pair per label.
#[derive(Debug, Clone, Copy)]
pub struct FeatureBands {
    /// Band used when the analyzer's winning label is Truth.
    pub truth: SubscoreBand,
    /// Band used when the analyzer's winning label is Fake.
    pub fake: SubscoreBand,
}

/// All three features share the same bands in the shipped configuration,
/// but each is named so they can diverge without touching call sites.
pub const FACIAL_EXPRESSION_BANDS: FeatureBands = FeatureBands {
    truth: SubscoreBand { low: 60.0, high: 100.0 },
    fake: SubscoreBand { low: 20.0, high: 60.0 },
};

pub const VOICE_ANALYSIS_BANDS: FeatureBands = FeatureBands {
    truth: SubscoreBand { low: 60.0, high: 100.0 },
    fake: SubscoreBand { low: 20.0, high: 60.0 },
};

pub const MICRO_GESTURE_BANDS: FeatureBands = FeatureBands {
    truth: SubscoreBand { low: 60.0, high: 100.0 },
    fake: SubscoreBand { low: 20.0, high: 60.0 },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("Candor"));
    }

    #[test]
    fn cache_dir_under_app_data() {
        let cache = cache_dir();
        assert!(cache.starts_with(app_data_dir()));
        assert!(cache.ends_with("cache"));
    }

    #[test]
    fn fusion_weights_sum_to_one() {
        assert!((CLASSIFIER_FUSION_WEIGHT + SIMILARITY_FUSION_WEIGHT - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn band_scale_stays_inside_band() {
        let band = FACIAL_EXPRESSION_BANDS.truth;
        assert_eq!(band.scale(0.0), band.low);
        assert_eq!(band.scale(1.0), band.high);
        let mid = band.scale(0.5);
        assert!(mid > band.low && mid < band.high);
    }

    #[test]
    fn band_scale_clamps_out_of_range_strength() {
        let band = MICRO_GESTURE_BANDS.fake;
        assert_eq!(band.scale(-1.0), band.low);
        assert_eq!(band.scale(2.0), band.high);
    }

    #[test]
    fn band_scale_is_monotonic() {
        let band = VOICE_ANALYSIS_BANDS.truth;
        assert!(band.scale(0.9) > band.scale(0.6));
    }
}
