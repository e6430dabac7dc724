//! Effect-size-derived check weights for posture scoring.
//!
//! Each rule check carries an importance weight derived from how strongly
//! its measured quantity separates correct-form from incorrect-form
//! samples in a labeled dataset (Cohen's d, |d| normalized to sum 1
//! across an exercise's check set). The table is read-only configuration:
//! load it once per process and share it across sessions by value.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Exercise;
use crate::error::{AnalysisError, Result};

/// One entry of the stored weight document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    /// Signed Cohen's d of the underlying metric.
    #[serde(default)]
    pub d: f64,
    /// Normalized importance weight.
    pub weight: f64,
}

/// Immutable per-check weight table for one exercise.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckWeights {
    entries: BTreeMap<String, WeightEntry>,
}

impl CheckWeights {
    /// Push-up weights from the AI Hub fitness-posture dataset
    /// (224 labeled clips; |d| normalized across the five checks).
    #[must_use]
    pub fn push_up() -> Self {
        Self::from_entries([
            ("elbow_angle", 0.3354, 0.12),
            ("back_angle", -0.1096, 0.04),
            ("hand_offset", -0.4424, 0.28),
            ("head_tilt", 0.3709, 0.24),
            ("shoulder_abduction", -0.5043, 0.32),
        ])
    }

    /// Pull-up weights from the AI Hub fitness-posture dataset
    /// (142 labeled clips).
    #[must_use]
    pub fn pull_up() -> Self {
        Self::from_entries([
            ("head_tilt", -0.8611, 0.53),
            ("shoulder_packing", 0.3248, 0.20),
            ("elbow_flare", -0.3119, 0.19),
            ("body_sway", -0.1335, 0.08),
        ])
    }

    fn from_entries<const N: usize>(entries: [(&str, f64, f64); N]) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, d, weight)| (name.to_string(), WeightEntry { d, weight }))
                .collect(),
        }
    }

    /// Default table for an exercise.
    #[must_use]
    pub fn for_exercise(exercise: Exercise) -> Self {
        match exercise {
            Exercise::PushUp => Self::push_up(),
            Exercise::PullUp => Self::pull_up(),
        }
    }

    /// Uniform weights over the given check names, used when no stored
    /// table is available.
    #[must_use]
    pub fn uniform<I, S>(checks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = checks.into_iter().map(Into::into).collect();
        let w = if names.is_empty() { 0.0 } else { 1.0 / names.len() as f64 };
        Self {
            entries: names
                .into_iter()
                .map(|name| (name, WeightEntry { d: 0.0, weight: w }))
                .collect(),
        }
    }

    /// Build a table from raw Cohen's d effect sizes, normalizing |d| to
    /// sum 1. Zero total effect yields zero weights.
    #[must_use]
    pub fn from_effect_sizes<I, S>(effect_sizes: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let sizes: Vec<(String, f64)> = effect_sizes
            .into_iter()
            .map(|(name, d)| (name.into(), d))
            .collect();
        let total: f64 = sizes.iter().map(|(_, d)| d.abs()).sum();
        Self {
            entries: sizes
                .into_iter()
                .map(|(name, d)| {
                    let weight = if total > 0.0 { d.abs() / total } else { 0.0 };
                    (name, WeightEntry { d, weight })
                })
                .collect(),
        }
    }

    /// Load the stored document form (`{check: {d, weight}}`).
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Json`] when the document does not parse,
    /// or [`AnalysisError::MalformedDocument`] when it is empty.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let entries: BTreeMap<String, WeightEntry> = serde_json::from_reader(reader)?;
        if entries.is_empty() {
            return Err(AnalysisError::MalformedDocument {
                kind: "weights",
                detail: "no check entries".into(),
            });
        }
        Ok(Self { entries })
    }

    /// Load from a file path, falling back to the built-in table for
    /// `exercise` when the file is missing or malformed. The fallback is
    /// logged, not raised: a missing table must not fail a session.
    #[must_use]
    pub fn load_or_default(path: &Path, exercise: Exercise) -> Self {
        match std::fs::File::open(path) {
            Ok(file) => match Self::from_reader(file) {
                Ok(weights) => weights,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "weight table unreadable, using defaults");
                    Self::for_exercise(exercise)
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "weight table missing, using defaults");
                Self::for_exercise(exercise)
            }
        }
    }

    /// Weight of one check; unknown names weigh zero.
    #[must_use]
    pub fn weight(&self, check: &str) -> f64 {
        self.entries.get(check).map_or(0.0, |e| e.weight)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &WeightEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize to the stored document form.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Json`] when serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }
}

/// Cohen's d between two samples, using the pooled standard deviation.
///
/// Returns 0.0 when either sample has fewer than two values or the
/// pooled deviation vanishes.
#[must_use]
pub fn cohens_d(correct: &[f64], incorrect: &[f64]) -> f64 {
    let n1 = correct.len();
    let n2 = incorrect.len();
    if n1 < 2 || n2 < 2 {
        return 0.0;
    }

    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let m1 = mean(correct);
    let m2 = mean(incorrect);

    let sample_var = |xs: &[f64], m: f64| {
        xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
    };
    let v1 = sample_var(correct, m1);
    let v2 = sample_var(incorrect, m2);

    let pooled =
        (((n1 - 1) as f64 * v1 + (n2 - 1) as f64 * v2) / (n1 + n2 - 2) as f64).sqrt();
    if pooled < 1e-12 {
        return 0.0;
    }
    (m1 - m2) / pooled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_default_tables_sum_to_one() {
        for weights in [CheckWeights::push_up(), CheckWeights::pull_up()] {
            let total: f64 = weights.iter().map(|(_, e)| e.weight).sum();
            assert!(approx_eq(total, 1.0, 1e-9), "total {total}");
        }
    }

    #[test]
    fn test_unknown_check_weighs_zero() {
        let weights = CheckWeights::push_up();
        assert_eq!(weights.weight("nonexistent"), 0.0);
        assert!(weights.weight("shoulder_abduction") > 0.0);
    }

    #[test]
    fn test_document_round_trip() {
        let weights = CheckWeights::pull_up();
        let json = weights.to_json().unwrap();
        let reloaded = CheckWeights::from_reader(json.as_bytes()).unwrap();
        assert_eq!(weights, reloaded);
    }

    #[test]
    fn test_empty_document_rejected() {
        assert!(CheckWeights::from_reader("{}".as_bytes()).is_err());
    }

    #[test]
    fn test_from_effect_sizes_normalizes() {
        let weights =
            CheckWeights::from_effect_sizes([("a", 0.5), ("b", -1.0), ("c", 0.5)]);
        assert!(approx_eq(weights.weight("a"), 0.25, 1e-12));
        assert!(approx_eq(weights.weight("b"), 0.5, 1e-12));
        let d = weights.iter().find(|(k, _)| *k == "b").unwrap().1.d;
        assert!(approx_eq(d, -1.0, 1e-12));
    }

    #[test]
    fn test_uniform() {
        let weights = CheckWeights::uniform(["x", "y", "z", "w"]);
        assert!(approx_eq(weights.weight("y"), 0.25, 1e-12));
    }

    #[test]
    fn test_cohens_d_separated_groups() {
        let correct = [1.0, 1.1, 0.9, 1.0, 1.05];
        let incorrect = [2.0, 2.1, 1.9, 2.0, 1.95];
        let d = cohens_d(&correct, &incorrect);
        assert!(d < -5.0, "expected a large negative effect, got {d}");
    }

    #[test]
    fn test_cohens_d_degenerate() {
        assert_eq!(cohens_d(&[1.0], &[2.0, 3.0]), 0.0);
        assert_eq!(cohens_d(&[1.0, 1.0, 1.0], &[1.0, 1.0]), 0.0);
    }
}
