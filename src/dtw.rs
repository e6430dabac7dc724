//! Similarity scoring against an exemplar via dynamic time warping.
//!
//! The scorer collects the frames of each phase into segments (maximal
//! runs of one phase), and at every phase boundary aligns the closed
//! segment against the exemplar's vectors for that phase. Alignment uses
//! a Sakoe-Chiba band to bound cost to `O(N·band)` and prevent
//! pathological warping; the banded distance, normalized by the longer
//! sequence length, is mapped to a bounded similarity through a Gaussian
//! kernel.
//!
//! Only the angle block of the feature vector takes part in alignment —
//! coordinates depend on camera placement and would dominate the cost
//! with information that says nothing about form.

use std::collections::BTreeMap;

use ndarray::Array2;
use tracing::debug;

use crate::features::ANGLE_DIMS;
use crate::phase::Phase;
use crate::reference::ReferenceLibrary;

/// Fraction of the longer sequence used as the derived band half-width.
const BAND_LENGTH_RATIO: f64 = 0.2;

/// Default Gaussian-kernel leniency.
pub const DEFAULT_SIGMA: f64 = 0.25;

/// Banded DTW distance between two sequences of equal-dimension vectors.
///
/// `window` is the Sakoe-Chiba half-width; 0 means unconstrained. The
/// effective band is never narrower than `|n - m|`, which guarantees a
/// feasible alignment path for unequal lengths.
#[must_use]
pub fn dtw_distance(seq1: &[Vec<f32>], seq2: &[Vec<f32>], window: usize) -> f64 {
    let n = seq1.len();
    let m = seq2.len();
    if n == 0 || m == 0 {
        return f64::INFINITY;
    }

    // Pairwise L2 costs up front; the band walk below reads them freely.
    let mut cost = Array2::<f64>::zeros((n, m));
    for (i, a) in seq1.iter().enumerate() {
        for (j, b) in seq2.iter().enumerate() {
            let d: f64 = a
                .iter()
                .zip(b.iter())
                .map(|(&x, &y)| {
                    let diff = f64::from(x) - f64::from(y);
                    diff * diff
                })
                .sum();
            cost[[i, j]] = d.sqrt();
        }
    }

    let w = if window > 0 { window } else { n.max(m) };
    let w = w.max(n.abs_diff(m));

    let mut acc = Array2::<f64>::from_elem((n + 1, m + 1), f64::INFINITY);
    acc[[0, 0]] = 0.0;

    for i in 1..=n {
        let j_lo = i.saturating_sub(w).max(1);
        let j_hi = (i + w).min(m);
        for j in j_lo..=j_hi {
            let best = acc[[i - 1, j]].min(acc[[i, j - 1]]).min(acc[[i - 1, j - 1]]);
            acc[[i, j]] = cost[[i - 1, j - 1]] + best;
        }
    }

    acc[[n, m]]
}

/// Summary returned by [`DtwScorer::finalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct DtwSummary {
    /// Mean similarity over every scored segment, or `None` when the
    /// scorer never had a reference to compare against. The distinction
    /// matters: "no comparison possible" is not "zero similarity".
    pub overall: Option<f64>,
    /// Mean similarity per phase.
    pub per_phase: BTreeMap<Phase, f64>,
    /// Number of scored segments per phase.
    pub segment_counts: BTreeMap<Phase, usize>,
}

impl DtwSummary {
    fn inactive() -> Self {
        Self {
            overall: None,
            per_phase: BTreeMap::new(),
            segment_counts: BTreeMap::new(),
        }
    }
}

/// Per-phase DTW similarity scorer for one session.
///
/// Built from an optional [`ReferenceLibrary`]; without one the scorer
/// is inactive and every call is a no-op.
#[derive(Debug)]
pub struct DtwScorer {
    reference: Option<ReferenceLibrary>,
    sigma: f64,
    window: usize,
    current_phase: Option<Phase>,
    current_segment: Vec<Vec<f32>>,
    phase_scores: BTreeMap<Phase, Vec<f64>>,
}

impl DtwScorer {
    /// Create a scorer.
    ///
    /// `reference` of `None` (or a reference with no phase data) leaves
    /// the scorer inactive. `window` of 0 derives the band from the
    /// segment lengths.
    #[must_use]
    pub fn new(reference: Option<ReferenceLibrary>, sigma: f64, window: usize) -> Self {
        let reference = reference.filter(|r| !r.is_empty());
        Self {
            reference,
            sigma,
            window,
            current_phase: None,
            current_segment: Vec::new(),
            phase_scores: BTreeMap::new(),
        }
    }

    /// Whether a usable reference is loaded.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.reference.is_some()
    }

    /// Feed one frame.
    ///
    /// A phase change closes the open segment (scoring it if it holds at
    /// least two vectors) and opens a new one. Frames without a feature
    /// vector still advance the segmentation but contribute no vector.
    pub fn accumulate(&mut self, feature_vec: Option<Vec<f32>>, phase: Phase) {
        if self.reference.is_none() {
            return;
        }

        if self.current_phase != Some(phase) {
            if let Some(prev) = self.current_phase {
                if self.current_segment.len() >= 2 {
                    self.score_segment(prev);
                }
            }
            self.current_phase = Some(phase);
            self.current_segment.clear();
        }

        if let Some(vec) = feature_vec {
            self.current_segment.push(vec);
        }
    }

    /// Flush the open segment and summarize the session.
    pub fn finalize(&mut self) -> DtwSummary {
        if self.reference.is_none() {
            return DtwSummary::inactive();
        }

        if let Some(phase) = self.current_phase.take() {
            if self.current_segment.len() >= 2 {
                self.score_segment(phase);
            }
        }
        self.current_segment.clear();

        let mut per_phase = BTreeMap::new();
        let mut segment_counts = BTreeMap::new();
        let mut all: Vec<f64> = Vec::new();

        for (&phase, scores) in &self.phase_scores {
            if scores.is_empty() {
                continue;
            }
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            per_phase.insert(phase, round4(mean));
            segment_counts.insert(phase, scores.len());
            all.extend_from_slice(scores);
        }

        let overall = if all.is_empty() {
            Some(0.0)
        } else {
            Some(round4(all.iter().sum::<f64>() / all.len() as f64))
        };

        DtwSummary {
            overall,
            per_phase,
            segment_counts,
        }
    }

    fn score_segment(&mut self, phase: Phase) {
        let Some(reference) = &self.reference else {
            return;
        };
        let Some(ref_angles) = reference.angle_vectors(phase) else {
            return;
        };
        if ref_angles.is_empty() {
            return;
        }

        let user_angles: Vec<Vec<f32>> = self
            .current_segment
            .iter()
            .map(|v| v[..ANGLE_DIMS.min(v.len())].to_vec())
            .collect();

        let n = user_angles.len();
        let m = ref_angles.len();
        let w = if self.window > 0 {
            self.window
        } else {
            n.abs_diff(m)
                .max((n.max(m) as f64 * BAND_LENGTH_RATIO) as usize)
        };

        let distance = dtw_distance(&user_angles, ref_angles, w);
        let avg_distance = distance / n.max(m) as f64;
        let similarity = (-(avg_distance / self.sigma).powi(2)).exp();

        debug!(
            phase = %phase,
            distance,
            avg_distance,
            similarity,
            user_len = n,
            ref_len = m,
            "segment scored"
        );

        self.phase_scores.entry(phase).or_default().push(similarity);
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Exercise;
    use crate::reference::ReferenceDocument;

    fn vec_of(v: f32) -> Vec<f32> {
        vec![v; ANGLE_DIMS]
    }

    /// Sinusoid-ish angle sequence as reference vectors.
    fn reference_segment(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let t = i as f32 / n as f32;
                vec_of(0.5 + 0.3 * (t * std::f32::consts::PI).sin())
            })
            .collect()
    }

    fn library_with(phase: Phase, vectors: Vec<Vec<f32>>) -> ReferenceLibrary {
        let mut doc = ReferenceDocument::new(Exercise::PushUp, 10.0);
        doc.insert_phase(phase, vectors);
        doc.into_library()
    }

    #[test]
    fn test_identical_segment_scores_near_one() {
        let segment = reference_segment(20);
        let library = library_with(Phase::Bottom, segment.clone());
        let mut scorer = DtwScorer::new(Some(library), DEFAULT_SIGMA, 0);

        for v in segment {
            scorer.accumulate(Some(v), Phase::Bottom);
        }
        let summary = scorer.finalize();
        let score = summary.per_phase[&Phase::Bottom];
        assert!(score > 0.999, "self-similarity {score}");
        assert_eq!(summary.segment_counts[&Phase::Bottom], 1);
    }

    #[test]
    fn test_offset_segment_scores_lower() {
        let segment = reference_segment(20);
        let library = library_with(Phase::Bottom, segment.clone());

        let mut same = DtwScorer::new(Some(library), DEFAULT_SIGMA, 0);
        for v in &segment {
            same.accumulate(Some(v.clone()), Phase::Bottom);
        }
        let base = same.finalize().per_phase[&Phase::Bottom];

        let library = library_with(Phase::Bottom, segment.clone());
        let mut shifted = DtwScorer::new(Some(library), DEFAULT_SIGMA, 0);
        for v in &segment {
            let moved: Vec<f32> = v.iter().map(|x| x + 0.4).collect();
            shifted.accumulate(Some(moved), Phase::Bottom);
        }
        let worse = shifted.finalize().per_phase[&Phase::Bottom];

        assert!(worse < base, "shifted {worse} >= identical {base}");
    }

    #[test]
    fn test_segments_close_on_phase_change() {
        let library = library_with(Phase::Bottom, reference_segment(10));
        let mut scorer = DtwScorer::new(Some(library), DEFAULT_SIGMA, 0);

        for v in reference_segment(10) {
            scorer.accumulate(Some(v), Phase::Bottom);
        }
        // Phase flips: bottom segment is scored even though the new
        // ascending phase has no reference data.
        scorer.accumulate(Some(vec_of(0.5)), Phase::Ascending);
        scorer.accumulate(Some(vec_of(0.5)), Phase::Ascending);

        let summary = scorer.finalize();
        assert_eq!(summary.segment_counts.get(&Phase::Bottom), Some(&1));
        assert_eq!(summary.segment_counts.get(&Phase::Ascending), None);
    }

    #[test]
    fn test_single_vector_segment_dropped() {
        let library = library_with(Phase::Bottom, reference_segment(10));
        let mut scorer = DtwScorer::new(Some(library), DEFAULT_SIGMA, 0);
        scorer.accumulate(Some(vec_of(0.5)), Phase::Bottom);
        let summary = scorer.finalize();
        assert!(summary.per_phase.is_empty());
        // Active scorer with nothing scored: zero, not "no reference".
        assert_eq!(summary.overall, Some(0.0));
    }

    #[test]
    fn test_inactive_scorer_reports_none() {
        let mut scorer = DtwScorer::new(None, DEFAULT_SIGMA, 0);
        scorer.accumulate(Some(vec_of(0.1)), Phase::Bottom);
        scorer.accumulate(Some(vec_of(0.2)), Phase::Top);
        let summary = scorer.finalize();
        assert_eq!(summary.overall, None);
        assert!(summary.per_phase.is_empty());
    }

    #[test]
    fn test_dtw_distance_zero_for_identical() {
        let seq = reference_segment(15);
        let d = dtw_distance(&seq, &seq, 0);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn test_dtw_band_still_feasible_for_unequal_lengths() {
        let a = reference_segment(30);
        let b = reference_segment(8);
        // A tight explicit window must be widened to |n - m| internally.
        let d = dtw_distance(&a, &b, 1);
        assert!(d.is_finite());
    }

    #[test]
    fn test_dtw_tolerates_time_warp() {
        let a = reference_segment(20);
        // The same shape sampled twice as densely.
        let b: Vec<Vec<f32>> = (0..40)
            .map(|i| {
                let t = i as f32 / 40.0;
                vec_of(0.5 + 0.3 * (t * std::f32::consts::PI).sin())
            })
            .collect();
        let d_warp = dtw_distance(&a, &b, 0) / 40.0;
        // A constant offset of comparable magnitude costs far more.
        let c: Vec<Vec<f32>> = a.iter().map(|v| v.iter().map(|x| x + 0.3).collect()).collect();
        let d_offset = dtw_distance(&a, &c, 0) / 20.0;
        assert!(d_warp < d_offset);
    }
}
