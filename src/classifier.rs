//! Serialized activity classifier artifact.
//!
//! A linear model over the augmented motion-feature matrix, persisted as
//! JSON together with the tuning metadata the segmenter needs (hysteresis
//! thresholds, smoothing window, padding and gap limits). The artifact is
//! optional equipment: a missing or unreadable file just routes the
//! segmenter onto its rule-based path.

use std::io::Read;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AnalysisError, Result};

/// Lower bound for the derived rescue-probability threshold.
const RESCUE_FLOOR: f64 = 0.20;

/// Offset below the off threshold used to derive the rescue threshold.
const RESCUE_OFFSET: f64 = 0.03;

/// Trained activity classifier plus segmentation tuning metadata.
///
/// Every tuning field has a serde default, so a bare
/// `{"weights": [...], "bias": ...}` artifact is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityClassifier {
    /// Linear weights over the feature-matrix columns.
    pub weights: Vec<f64>,
    /// Intercept.
    #[serde(default)]
    pub bias: f64,

    /// Probability at which a frame run switches on.
    #[serde(default = "default_on_threshold")]
    pub on_threshold: f64,
    /// Probability at which a running selection switches off.
    #[serde(default = "default_off_threshold")]
    pub off_threshold: f64,
    /// Moving-average window over the probability series, in frames.
    #[serde(default = "default_smooth_window")]
    pub smooth_window: usize,
    /// Padding added around each active run, in seconds.
    #[serde(default = "default_padding_seconds")]
    pub padding_seconds: f64,
    /// Hard cap on the applied padding, in seconds.
    #[serde(default = "default_max_padding_seconds")]
    pub max_padding_seconds: f64,
    /// Shortest run kept, in seconds.
    #[serde(default = "default_min_segment_seconds")]
    pub min_segment_seconds: f64,
    /// Inactive gaps up to this long are filled, in seconds.
    #[serde(default = "default_gap_fill_seconds")]
    pub gap_fill_seconds: f64,
    /// Runs closer than this are merged, in seconds.
    #[serde(default = "default_merge_gap_seconds")]
    pub merge_gap_seconds: f64,
    /// Probability floor for motion-rescued frames; derived from the off
    /// threshold when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescue_prob_threshold: Option<f64>,
    /// Percentile for the corroborating motion heuristic.
    #[serde(default = "default_motion_percentile")]
    pub motion_percentile: f64,
    /// Scale applied to the motion-percentile threshold.
    #[serde(default = "default_motion_quantile_scale")]
    pub motion_quantile_scale: f64,
}

fn default_on_threshold() -> f64 {
    0.56
}
fn default_off_threshold() -> f64 {
    0.42
}
fn default_smooth_window() -> usize {
    5
}
fn default_padding_seconds() -> f64 {
    1.5
}
fn default_max_padding_seconds() -> f64 {
    0.8
}
fn default_min_segment_seconds() -> f64 {
    1.0
}
fn default_gap_fill_seconds() -> f64 {
    0.5
}
fn default_merge_gap_seconds() -> f64 {
    0.25
}
fn default_motion_percentile() -> f64 {
    65.0
}
fn default_motion_quantile_scale() -> f64 {
    0.50
}

impl ActivityClassifier {
    /// Parse an artifact from any source.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Json`] when the document does not parse,
    /// or [`AnalysisError::MalformedDocument`] when it carries no weights.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let classifier: Self = serde_json::from_reader(reader)?;
        if classifier.weights.is_empty() {
            return Err(AnalysisError::MalformedDocument {
                kind: "classifier",
                detail: "empty weight vector".into(),
            });
        }
        Ok(classifier)
    }

    /// Load from a file path, degrading to `None` (logged) when the file
    /// is missing or malformed.
    #[must_use]
    pub fn load_or_none(path: &Path) -> Option<Self> {
        match std::fs::File::open(path) {
            Ok(file) => match Self::from_reader(std::io::BufReader::new(file)) {
                Ok(classifier) => {
                    info!(path = %path.display(), dims = classifier.weights.len(), "activity classifier loaded");
                    Some(classifier)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "activity classifier unreadable");
                    None
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "activity classifier missing");
                None
            }
        }
    }

    /// Per-frame activity probabilities via the logistic link.
    ///
    /// Returns `None` when the matrix width does not match the weight
    /// vector — the caller treats that as a model failure and falls back.
    #[must_use]
    pub fn predict_proba(&self, features: &Array2<f32>) -> Option<Vec<f64>> {
        let (n, m) = features.dim();
        if m != self.weights.len() {
            return None;
        }

        let mut probs = Vec::with_capacity(n);
        for row in features.rows() {
            let logit: f64 = row
                .iter()
                .zip(self.weights.iter())
                .map(|(&x, &w)| f64::from(x) * w)
                .sum::<f64>()
                + self.bias;
            probs.push(1.0 / (1.0 + (-logit).exp()));
        }
        Some(probs)
    }

    /// Probability floor for motion-rescued frames.
    #[must_use]
    pub fn rescue_threshold(&self) -> f64 {
        self.rescue_prob_threshold
            .unwrap_or_else(|| RESCUE_FLOOR.max(self.off_threshold - RESCUE_OFFSET))
    }
}
