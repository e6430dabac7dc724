//! Active-segment selection: which frames deserve analysis.
//!
//! A workout video is mostly rest — setup, recovery between sets,
//! walking in and out of frame. The segmenter narrows the sequence to
//! the frames that contain genuine exercise motion through a layered
//! decision pipeline, each layer a function returning a selection plus a
//! diagnostic, composed with early return:
//!
//! 1. classifier scoring with hysteresis, motion-heuristic rescue and a
//!    plausibility guard against false "always active" reads;
//! 2. a percentile-scaled pure-motion rule when the classifier is
//!    unavailable, fails, or keeps implausibly few frames;
//! 3. keep everything when even the rule finds too little.
//!
//! After the motion layers, an exercise-specific state machine over the
//! keypoint sequence refines the selection ([`refine_push_up`],
//! [`refine_pull_up`]), falling back to the upstream choice per frame
//! where it is undecided.

use std::collections::BTreeSet;
use std::fmt;

use ndarray::Array2;
use tracing::{debug, info};

use crate::activity::{build_feature_matrix, extract_base_features, percentile, GrayFrame};
use crate::classifier::ActivityClassifier;
use crate::geometry::joint_angle;
use crate::keypoint::{JointId, KeypointSet};
use crate::phase::Phase;

// Motion-rule tuning.
const RULE_BASE_MOTION_THRESHOLD: f64 = 0.01;
const RULE_PERCENTILE: f64 = 60.0;
const RULE_QUANTILE_SCALE: f64 = 0.45;
const RULE_PADDING_SECONDS: f64 = 2.0;
const RULE_GAP_FILL_SECONDS: f64 = 2.0;
const RULE_MIN_SEGMENT_SECONDS: f64 = 1.0;

// Motion corroboration inside the classifier path.
const ML_MOTION_GAP_FILL_SECONDS: f64 = 0.5;

// Plausibility guard against a classifier that says "always active".
const COVERAGE_LIMIT: f64 = 0.90;
const MIN_PROB_CONTRAST: f64 = 0.15;

// Pull-up refinement: wrist height relative to the shoulder line.
const PULLUP_ON_FRAMES: u32 = 2;
const PULLUP_OFF_FRAMES: u32 = 2;
const PULLUP_ACTIVE_MARGIN: f64 = 0.03;
const PULLUP_REST_MARGIN: f64 = 0.12;

// Push-up refinement: phase-driven with an elbow-stillness detector.
const PUSHUP_ON_FRAMES: u32 = 2;
const PUSHUP_OFF_FRAMES: u32 = 4;
const PUSHUP_HOLD_FRAMES: u32 = 12;
const PUSHUP_STILL_TOP_FRAMES: u32 = 12;
const PUSHUP_MOTION_EPS_DEG: f64 = 1.5;

/// Which layer produced the final selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMethod {
    /// Classifier with motion rescue.
    Ml,
    /// Percentile-scaled motion rule.
    MotionRule,
    /// Push-up rule-first refinement over an upstream selection.
    RuleFirstPushUp,
    /// Pull-up rule-first refinement over an upstream selection.
    RuleFirstPullUp,
    /// Everything kept because no layer produced a usable selection.
    AllFrames,
}

impl SelectionMethod {
    /// Stable label for diagnostics.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            SelectionMethod::Ml => "ml",
            SelectionMethod::MotionRule => "motion_rule",
            SelectionMethod::RuleFirstPushUp => "rule_first_pushup",
            SelectionMethod::RuleFirstPullUp => "rule_first_pullup",
            SelectionMethod::AllFrames => "all_frames",
        }
    }
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Frame tallies from a rule-first refinement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefinementStats {
    /// Frames the state machine judged active.
    pub rule_active_frames: usize,
    /// Frames the state machine judged rest.
    pub rule_rest_frames: usize,
    /// Undecided frames resolved by the upstream selection.
    pub fallback_frames: usize,
}

/// A frame selection plus the diagnostics of how it was made.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selected frame indices, in order.
    pub indices: BTreeSet<usize>,
    /// Layer that produced the selection.
    pub method: SelectionMethod,
    /// Why an upper layer was rejected, when one was.
    pub reason: String,
    /// Present when a rule-first refinement ran.
    pub refinement: Option<RefinementStats>,
}

impl Selection {
    fn new(indices: BTreeSet<usize>, method: SelectionMethod, reason: impl Into<String>) -> Self {
        Self {
            indices,
            method,
            reason: reason.into(),
            refinement: None,
        }
    }

    /// Number of selected frames.
    #[must_use]
    pub fn kept(&self) -> usize {
        self.indices.len()
    }

    /// Whether a frame index was selected.
    #[must_use]
    pub fn contains(&self, idx: usize) -> bool {
        self.indices.contains(&idx)
    }
}

/// Motion-based frame selector for one video.
#[derive(Debug)]
pub struct ActivitySegmenter {
    fps: f64,
    classifier: Option<ActivityClassifier>,
    min_keep_ratio: f64,
}

impl ActivitySegmenter {
    /// Create a segmenter.
    ///
    /// `classifier` is optional equipment; without it selection starts at
    /// the motion rule. `min_keep_ratio` is the plausibility floor on how
    /// much of the video a trusted selection must keep.
    #[must_use]
    pub fn new(fps: f64, classifier: Option<ActivityClassifier>, min_keep_ratio: f64) -> Self {
        Self {
            fps: fps.max(1.0),
            classifier,
            min_keep_ratio: min_keep_ratio.clamp(0.0, 1.0),
        }
    }

    /// Select analyzable frames from grayscale image data.
    #[must_use]
    pub fn select(&self, frames: &[Option<GrayFrame>]) -> Selection {
        let base = extract_base_features(frames);
        self.select_from_features(&base)
    }

    /// Select analyzable frames from precomputed base motion features
    /// (one six-feature row per frame).
    #[must_use]
    pub fn select_from_features(&self, base: &Array2<f32>) -> Selection {
        let n = base.nrows();
        if n == 0 {
            return Selection::new(BTreeSet::new(), SelectionMethod::MotionRule, "no input frames");
        }

        let ml_failure = match &self.classifier {
            Some(classifier) => match self.ml_selection(classifier, base) {
                Ok(indices) => {
                    info!(kept = indices.len(), total = n, "classifier selection accepted");
                    return Selection::new(indices, SelectionMethod::Ml, "");
                }
                Err(reason) => {
                    info!(%reason, "classifier selection rejected, trying motion rule");
                    reason
                }
            },
            None => "classifier unavailable".to_string(),
        };

        self.rule_selection(base, ml_failure)
    }

    /// Classifier layer. `Err` carries the reason it cannot be trusted.
    fn ml_selection(
        &self,
        classifier: &ActivityClassifier,
        base: &Array2<f32>,
    ) -> Result<BTreeSet<usize>, String> {
        let n = base.nrows();
        let matrix = build_feature_matrix(base);
        let probs = classifier
            .predict_proba(&matrix)
            .ok_or_else(|| "feature dimensions do not match the model".to_string())?;
        let probs = smooth_probs(&probs, classifier.smooth_window.max(1));

        // Two-threshold hysteresis over the smoothed probability series.
        let mut ml_flags = Vec::with_capacity(n);
        let mut active = false;
        for &p in &probs {
            if !active && p >= classifier.on_threshold {
                active = true;
            } else if active && p <= classifier.off_threshold {
                active = false;
            }
            ml_flags.push(active);
        }

        // Corroborating motion heuristic rescues frames the classifier
        // marked inactive while the pixels clearly moved.
        let (motion_flags, motion_threshold) = motion_activity_flags(
            base,
            self.fps,
            classifier.motion_percentile,
            classifier.motion_quantile_scale,
            ML_MOTION_GAP_FILL_SECONDS,
        );
        debug!(motion_threshold, "motion corroboration threshold");

        let rescue = classifier.rescue_threshold();
        let mut flags: Vec<bool> = (0..n)
            .map(|i| ml_flags[i] || (motion_flags[i] && probs[i] >= rescue))
            .collect();

        flags = fill_short_gaps(&flags, frames_from_seconds(self.fps, classifier.gap_fill_seconds).max(1));

        let core = flags_to_selected(
            &flags,
            self.fps,
            0.0,
            classifier.min_segment_seconds,
            classifier.merge_gap_seconds,
        );
        let padded = flags_to_selected(
            &flags,
            self.fps,
            classifier.padding_seconds.min(classifier.max_padding_seconds),
            classifier.min_segment_seconds,
            classifier.merge_gap_seconds,
        );

        // Padding tails over rest frames are cheap to pick up and costly
        // to score; keep them only when something corroborates activity.
        let selected: BTreeSet<usize> = padded
            .into_iter()
            .filter(|&idx| {
                core.contains(&idx) || motion_flags[idx] || probs[idx] >= classifier.off_threshold
            })
            .collect();

        let min_keep = min_keep_count(n, self.min_keep_ratio);
        if selected.len() < min_keep {
            return Err("selected frame ratio too small".to_string());
        }

        let coverage = selected.len() as f64 / n as f64;
        if coverage >= COVERAGE_LIMIT {
            let p10 = percentile(&probs, 10.0);
            let p90 = percentile(&probs, 90.0);
            let contrast = p90 - p10;
            if contrast < MIN_PROB_CONTRAST {
                return Err(format!(
                    "low-contrast over-selection (coverage={:.0}%, contrast={:.3})",
                    coverage * 100.0,
                    contrast
                ));
            }
        }

        Ok(selected)
    }

    /// Motion-rule layer; selects everything when it keeps too little.
    fn rule_selection(&self, base: &Array2<f32>, reason: String) -> Selection {
        let n = base.nrows();
        let scores: Vec<f64> = (0..n).map(|i| f64::from(base[[i, 0]])).collect();

        // The first row never has a predecessor; a single-frame video
        // has no motion evidence at all.
        if scores.len() < 2 {
            return Selection::new(
                (0..n).collect(),
                SelectionMethod::AllFrames,
                join_reasons(&reason, "no motion evidence"),
            );
        }

        let dynamic = percentile(&scores[1..], RULE_PERCENTILE) * RULE_QUANTILE_SCALE;
        let threshold = RULE_BASE_MOTION_THRESHOLD.max(dynamic);
        let moving: Vec<bool> = scores.iter().map(|&s| s >= threshold).collect();
        let moving = fill_short_gaps(
            &moving,
            frames_from_seconds(self.fps, RULE_GAP_FILL_SECONDS).max(1),
        );

        let selected = flags_to_selected(
            &moving,
            self.fps,
            RULE_PADDING_SECONDS,
            RULE_MIN_SEGMENT_SECONDS,
            0.0,
        );

        if selected.len() < min_keep_count(n, self.min_keep_ratio) {
            return Selection::new(
                (0..n).collect(),
                SelectionMethod::AllFrames,
                join_reasons(&reason, "motion rule kept too few frames"),
            );
        }

        Selection::new(selected, SelectionMethod::MotionRule, reason)
    }
}

/// Pull-up rule-first refinement.
///
/// A wrist-vs-shoulder state machine classifies clearly active and
/// clearly resting stretches; only the undecided remainder defers to the
/// upstream selection. Reverts wholesale when the refined set is
/// implausibly small.
#[must_use]
pub fn refine_pull_up(
    keypoints: &[Option<KeypointSet>],
    upstream: &BTreeSet<usize>,
    min_keep_ratio: f64,
) -> Selection {
    let n = keypoints.len();
    if n == 0 {
        let mut sel = Selection::new(BTreeSet::new(), SelectionMethod::RuleFirstPullUp, "no input frames");
        sel.refinement = Some(RefinementStats::default());
        return sel;
    }

    let mut selected = BTreeSet::new();
    let mut stats = RefinementStats::default();

    let mut state = RefineState::Unknown;
    let mut on_streak = 0u32;
    let mut off_streak = 0u32;

    for (idx, pts) in keypoints.iter().enumerate() {
        let (active_signal, rest_signal) = match pts {
            None => (false, true),
            Some(pts) => {
                let wrist_y = pts.pair_y(JointId::LeftWrist, JointId::RightWrist);
                let shoulder_y = pts.pair_y(JointId::LeftShoulder, JointId::RightShoulder);
                (
                    wrist_y <= shoulder_y + PULLUP_ACTIVE_MARGIN,
                    wrist_y >= shoulder_y + PULLUP_REST_MARGIN,
                )
            }
        };

        step_streaks(&mut on_streak, &mut off_streak, active_signal, rest_signal);
        advance_state(&mut state, on_streak, off_streak, PULLUP_ON_FRAMES, PULLUP_OFF_FRAMES);

        tally(&mut selected, &mut stats, state, idx, upstream);
    }

    finish_refinement(
        selected,
        stats,
        upstream,
        n,
        min_keep_ratio,
        SelectionMethod::RuleFirstPullUp,
    )
}

/// Push-up rule-first refinement.
///
/// Unlike the pull-up variant this consults the detected phase: motion
/// phases arm a hold that carries across brief top pauses, and a long
/// stretch of motionless top (locked-out plank, elbow angle static) reads
/// as rest. The asymmetry with the pull-up refinement is deliberate —
/// the wrist-height signal is reliable when hanging from a bar, while
/// prone posture needs the phase context.
#[must_use]
pub fn refine_push_up(
    keypoints: &[Option<KeypointSet>],
    phases: &[Phase],
    upstream: &BTreeSet<usize>,
    min_keep_ratio: f64,
) -> Selection {
    let n = keypoints.len();
    if n == 0 {
        let mut sel = Selection::new(BTreeSet::new(), SelectionMethod::RuleFirstPushUp, "no input frames");
        sel.refinement = Some(RefinementStats::default());
        return sel;
    }

    let mut selected = BTreeSet::new();
    let mut stats = RefinementStats::default();

    let mut state = RefineState::Unknown;
    let mut on_streak = 0u32;
    let mut off_streak = 0u32;
    let mut active_hold = 0u32;
    let mut still_top_streak = 0u32;
    let mut prev_elbow: Option<f64> = None;

    for (idx, pts) in keypoints.iter().enumerate() {
        let phase = phases.get(idx).copied().unwrap_or(Phase::Ready);

        let (active_signal, rest_signal) = match pts {
            None => {
                prev_elbow = None;
                active_hold = active_hold.saturating_sub(1);
                still_top_streak = 0;
                (false, true)
            }
            Some(pts) => {
                let elbow = mean_elbow_angle(pts);
                let elbow_delta = prev_elbow.map_or(0.0, |prev| (elbow - prev).abs());
                prev_elbow = Some(elbow);

                let moving_phase =
                    matches!(phase, Phase::Descending | Phase::Ascending | Phase::Bottom);
                if moving_phase {
                    active_hold = PUSHUP_HOLD_FRAMES;
                } else {
                    active_hold = active_hold.saturating_sub(1);
                }

                if phase == Phase::Top && elbow_delta <= PUSHUP_MOTION_EPS_DEG {
                    still_top_streak += 1;
                } else {
                    still_top_streak = 0;
                }

                let active = moving_phase || (active_hold > 0 && phase != Phase::Ready);
                let rest = phase == Phase::Ready
                    || (phase == Phase::Top
                        && still_top_streak >= PUSHUP_STILL_TOP_FRAMES
                        && active_hold == 0);
                (active, rest)
            }
        };

        step_streaks(&mut on_streak, &mut off_streak, active_signal, rest_signal);
        advance_state(&mut state, on_streak, off_streak, PUSHUP_ON_FRAMES, PUSHUP_OFF_FRAMES);

        tally(&mut selected, &mut stats, state, idx, upstream);
    }

    finish_refinement(
        selected,
        stats,
        upstream,
        n,
        min_keep_ratio,
        SelectionMethod::RuleFirstPushUp,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefineState {
    Unknown,
    Active,
    Rest,
}

fn step_streaks(on: &mut u32, off: &mut u32, active_signal: bool, rest_signal: bool) {
    if active_signal && !rest_signal {
        *on += 1;
        *off = 0;
    } else if rest_signal && !active_signal {
        *off += 1;
        *on = 0;
    } else {
        // Ambiguous frame: bleed both streaks instead of resetting, so a
        // single noisy frame cannot erase accumulated evidence.
        *on = on.saturating_sub(1);
        *off = off.saturating_sub(1);
    }
}

fn advance_state(state: &mut RefineState, on: u32, off: u32, on_frames: u32, off_frames: u32) {
    if off >= off_frames {
        *state = RefineState::Rest;
    } else if on >= on_frames {
        *state = RefineState::Active;
    }
}

fn tally(
    selected: &mut BTreeSet<usize>,
    stats: &mut RefinementStats,
    state: RefineState,
    idx: usize,
    upstream: &BTreeSet<usize>,
) {
    match state {
        RefineState::Active => {
            selected.insert(idx);
            stats.rule_active_frames += 1;
        }
        RefineState::Rest => stats.rule_rest_frames += 1,
        RefineState::Unknown => {
            if upstream.contains(&idx) {
                selected.insert(idx);
                stats.fallback_frames += 1;
            }
        }
    }
}

fn finish_refinement(
    selected: BTreeSet<usize>,
    stats: RefinementStats,
    upstream: &BTreeSet<usize>,
    n: usize,
    min_keep_ratio: f64,
    method: SelectionMethod,
) -> Selection {
    let mut selection = if selected.len() < min_keep_count(n, min_keep_ratio) {
        Selection::new(
            upstream.clone(),
            method,
            "refinement too strict; reverted to upstream selection",
        )
    } else {
        Selection::new(selected, method, "")
    };
    selection.refinement = Some(stats);
    selection
}

fn mean_elbow_angle(pts: &KeypointSet) -> f64 {
    let left = joint_angle(
        pts.get(JointId::LeftShoulder),
        pts.get(JointId::LeftElbow),
        pts.get(JointId::LeftWrist),
    );
    let right = joint_angle(
        pts.get(JointId::RightShoulder),
        pts.get(JointId::RightElbow),
        pts.get(JointId::RightWrist),
    );
    (left + right) / 2.0
}

/// Percentile-scaled motion flags over the mean-difference score.
fn motion_activity_flags(
    base: &Array2<f32>,
    fps: f64,
    motion_percentile: f64,
    quantile_scale: f64,
    gap_fill_seconds: f64,
) -> (Vec<bool>, f64) {
    let n = base.nrows();
    if n == 0 {
        return (Vec::new(), 0.0);
    }

    let scores: Vec<f64> = (0..n).map(|i| f64::from(base[[i, 0]])).collect();
    if scores.len() < 2 {
        return (vec![true; n], 0.0);
    }

    let dynamic = percentile(&scores[1..], motion_percentile) * quantile_scale;
    let threshold = RULE_BASE_MOTION_THRESHOLD.max(dynamic);
    let moving: Vec<bool> = scores.iter().map(|&s| s >= threshold).collect();
    let moving = fill_short_gaps(&moving, frames_from_seconds(fps, gap_fill_seconds).max(1));
    (moving, threshold)
}

/// Moving-average smoothing with zero-padded edges (damped boundaries).
fn smooth_probs(probs: &[f64], window: usize) -> Vec<f64> {
    if probs.is_empty() || window <= 1 {
        return probs.to_vec();
    }
    let n = probs.len();
    let offset = (window - 1) / 2;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut sum = 0.0;
        for k in 0..window {
            let j = i as isize + k as isize - offset as isize;
            if j >= 0 && (j as usize) < n {
                sum += probs[j as usize];
            }
        }
        out.push(sum / window as f64);
    }
    out
}

/// Fill inactive gaps no longer than `max_gap` that sit between active runs.
fn fill_short_gaps(flags: &[bool], max_gap: usize) -> Vec<bool> {
    let n = flags.len();
    let mut filled = flags.to_vec();
    let mut i = 0;
    while i < n {
        if flags[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && !flags[i] {
            i += 1;
        }
        let left_active = start > 0 && flags[start - 1];
        let right_active = i < n && flags[i];
        if left_active && right_active && (i - start) <= max_gap {
            for f in &mut filled[start..i] {
                *f = true;
            }
        }
    }
    filled
}

/// Maximal runs of `true`, as inclusive `(start, end)` pairs.
fn active_segments(flags: &[bool]) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut seg_start = None;
    for (idx, &active) in flags.iter().enumerate() {
        match (active, seg_start) {
            (true, None) => seg_start = Some(idx),
            (false, Some(start)) => {
                segments.push((start, idx - 1));
                seg_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = seg_start {
        segments.push((start, flags.len() - 1));
    }
    segments
}

fn merge_nearby_segments(segments: Vec<(usize, usize)>, max_gap: usize) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(segments.len());
    for (start, end) in segments {
        if let Some(last) = merged.last_mut() {
            if start - last.1 - 1 <= max_gap {
                last.1 = end;
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

/// Turn an active-flag series into padded, length-filtered frame indices.
fn flags_to_selected(
    flags: &[bool],
    fps: f64,
    padding_seconds: f64,
    min_segment_seconds: f64,
    merge_gap_seconds: f64,
) -> BTreeSet<usize> {
    let n = flags.len();
    if n == 0 {
        return BTreeSet::new();
    }

    let min_seg = frames_from_seconds(fps, min_segment_seconds).max(1);
    let pad = frames_from_seconds(fps, padding_seconds);
    let merge_gap = frames_from_seconds(fps, merge_gap_seconds);

    let mut segments: Vec<(usize, usize)> = active_segments(flags)
        .into_iter()
        .filter(|(start, end)| end - start + 1 >= min_seg)
        .collect();
    if merge_gap > 0 {
        segments = merge_nearby_segments(segments, merge_gap);
    }

    let mut selected = BTreeSet::new();
    for (start, end) in segments {
        let left = start.saturating_sub(pad);
        let right = (end + pad).min(n - 1);
        selected.extend(left..=right);
    }
    selected
}

fn frames_from_seconds(fps: f64, seconds: f64) -> usize {
    (fps * seconds).round().max(0.0) as usize
}

fn min_keep_count(n: usize, ratio: f64) -> usize {
    ((n as f64 * ratio).ceil() as usize).max(1)
}

fn join_reasons(first: &str, second: &str) -> String {
    if first.is_empty() {
        second.to_string()
    } else {
        format!("{first}; {second}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{BASE_FEATURES, MATRIX_FEATURES};

    /// Base features where only the mean-difference column is set.
    fn base_with_motion(scores: &[f32]) -> Array2<f32> {
        let mut base = Array2::<f32>::zeros((scores.len(), BASE_FEATURES));
        for (i, &s) in scores.iter().enumerate() {
            base[[i, 0]] = s;
        }
        base
    }

    #[test]
    fn test_fill_short_gaps() {
        let flags = vec![true, false, false, true, false, false, false, true];
        let filled = fill_short_gaps(&flags, 2);
        assert_eq!(filled, vec![true, true, true, true, false, false, false, true]);
    }

    #[test]
    fn test_gap_at_edges_not_filled() {
        let flags = vec![false, true, false];
        let filled = fill_short_gaps(&flags, 5);
        // Leading and trailing gaps have only one active neighbor.
        assert_eq!(filled, vec![false, true, false]);
    }

    #[test]
    fn test_active_segments() {
        let flags = vec![false, true, true, false, true];
        assert_eq!(active_segments(&flags), vec![(1, 2), (4, 4)]);
    }

    #[test]
    fn test_merge_nearby() {
        let merged = merge_nearby_segments(vec![(0, 2), (4, 6), (10, 12)], 1);
        assert_eq!(merged, vec![(0, 6), (10, 12)]);
    }

    #[test]
    fn test_flags_to_selected_pads_and_filters() {
        // 10 FPS, min segment 1 s: the lone single-frame run disappears.
        let mut flags = vec![false; 40];
        for f in &mut flags[10..25] {
            *f = true;
        }
        flags[35] = true;
        let selected = flags_to_selected(&flags, 10.0, 0.5, 1.0, 0.0);
        assert!(selected.contains(&5)); // 5 frames of padding
        assert!(selected.contains(&29));
        assert!(!selected.contains(&35));
        assert!(!selected.contains(&4));
    }

    #[test]
    fn test_smooth_probs_damps_edges() {
        let probs = vec![1.0; 5];
        let smoothed = smooth_probs(&probs, 5);
        assert!((smoothed[2] - 1.0).abs() < 1e-12);
        assert!(smoothed[0] < 1.0);
    }

    #[test]
    fn test_zero_motion_never_crashes() {
        let segmenter = ActivitySegmenter::new(10.0, None, 0.35);
        let base = base_with_motion(&[0.0; 30]);
        let selection = segmenter.select_from_features(&base);
        // Zero motion: the rule keeps nothing, so everything is kept.
        assert_eq!(selection.method, SelectionMethod::AllFrames);
        assert_eq!(selection.kept(), 30);
        assert!(selection.reason.contains("classifier unavailable"));
    }

    #[test]
    fn test_motion_rule_selects_the_active_stretch() {
        let mut scores = vec![0.001f32; 120];
        for s in &mut scores[40..70] {
            *s = 0.2;
        }
        let segmenter = ActivitySegmenter::new(10.0, None, 0.35);
        let selection = segmenter.select_from_features(&base_with_motion(&scores));
        assert_eq!(selection.method, SelectionMethod::MotionRule);
        assert!(selection.contains(50));
        // 2 s of padding at 10 FPS reaches back 20 frames from the run.
        assert!(selection.contains(25));
        assert!(!selection.contains(10));
        assert!(selection.kept() < 120);
    }

    #[test]
    fn test_empty_input() {
        let segmenter = ActivitySegmenter::new(10.0, None, 0.35);
        let selection = segmenter.select_from_features(&Array2::zeros((0, BASE_FEATURES)));
        assert!(selection.indices.is_empty());
        assert_eq!(selection.reason, "no input frames");
    }

    fn always_on_classifier() -> ActivityClassifier {
        let json = serde_json::json!({
            // Zero weights + large bias: p ≈ 1 everywhere, no contrast.
            "weights": vec![0.0; MATRIX_FEATURES],
            "bias": 5.0,
        });
        ActivityClassifier::from_reader(json.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_always_active_classifier_rejected() {
        let mut scores = vec![0.001f32; 50];
        for s in &mut scores[10..40] {
            *s = 0.2;
        }
        let segmenter = ActivitySegmenter::new(10.0, Some(always_on_classifier()), 0.35);
        let selection = segmenter.select_from_features(&base_with_motion(&scores));
        // The flat probability series trips the contrast guard and the
        // motion rule takes over.
        assert_eq!(selection.method, SelectionMethod::MotionRule);
        assert!(selection.reason.contains("low-contrast"));
    }

    fn motion_following_classifier() -> ActivityClassifier {
        // Strong weight on the mean-difference column only.
        let mut weights = vec![0.0; MATRIX_FEATURES];
        weights[0] = 60.0;
        let json = serde_json::json!({
            "weights": weights,
            "bias": -3.0,
        });
        ActivityClassifier::from_reader(json.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_ml_selection_follows_probabilities() {
        let mut scores = vec![0.001f32; 60];
        for s in &mut scores[15..45] {
            *s = 0.2;
        }
        let segmenter = ActivitySegmenter::new(10.0, Some(motion_following_classifier()), 0.35);
        let selection = segmenter.select_from_features(&base_with_motion(&scores));
        assert_eq!(selection.method, SelectionMethod::Ml);
        assert!(selection.contains(30));
        assert!(!selection.contains(2));
    }

    // ── refinements ─────────────────────────────────────────────────────

    fn hanging_pose(wrist_above: bool) -> KeypointSet {
        let mut c = [[0.5, 0.5]; crate::keypoint::JointId::COUNT];
        let wrist_y = if wrist_above { 0.2 } else { 0.8 };
        c[JointId::LeftWrist as usize] = [0.45, wrist_y];
        c[JointId::RightWrist as usize] = [0.55, wrist_y];
        c[JointId::LeftShoulder as usize] = [0.45, 0.4];
        c[JointId::RightShoulder as usize] = [0.55, 0.4];
        KeypointSet::from_coords(c)
    }

    #[test]
    fn test_pullup_refinement_splits_active_and_rest() {
        let mut keypoints: Vec<Option<KeypointSet>> = Vec::new();
        for _ in 0..10 {
            keypoints.push(Some(hanging_pose(true)));
        }
        for _ in 0..10 {
            keypoints.push(Some(hanging_pose(false)));
        }
        let upstream: BTreeSet<usize> = (0..20).collect();

        let selection = refine_pull_up(&keypoints, &upstream, 0.05);
        assert_eq!(selection.method, SelectionMethod::RuleFirstPullUp);
        let stats = selection.refinement.unwrap();
        assert!(stats.rule_active_frames >= 8);
        assert!(stats.rule_rest_frames >= 8);
        assert!(selection.contains(5));
        assert!(!selection.contains(15));
    }

    #[test]
    fn test_pullup_refinement_reverts_when_too_strict() {
        // Everything reads as rest: the refined set would be empty.
        let keypoints: Vec<Option<KeypointSet>> =
            (0..20).map(|_| Some(hanging_pose(false))).collect();
        let upstream: BTreeSet<usize> = [10usize, 11, 12].into_iter().collect();

        let selection = refine_pull_up(&keypoints, &upstream, 0.05);
        assert_eq!(selection.indices, upstream);
        assert!(selection.reason.contains("reverted"));
    }

    #[test]
    fn test_pushup_refinement_uses_phases() {
        let pose = Some(hanging_pose(false));
        let keypoints: Vec<Option<KeypointSet>> = vec![pose; 30];
        // Motion phases first, then a long ready tail.
        let mut phases = Vec::new();
        for _ in 0..12 {
            phases.push(Phase::Descending);
        }
        for _ in 0..18 {
            phases.push(Phase::Ready);
        }
        let upstream = BTreeSet::new();

        let selection = refine_push_up(&keypoints, &phases, &upstream, 0.05);
        assert_eq!(selection.method, SelectionMethod::RuleFirstPushUp);
        assert!(selection.contains(5));
        // Deep in the ready tail the hold has expired.
        assert!(!selection.contains(29));
    }

    #[test]
    fn test_pushup_refinement_undecided_falls_back() {
        // No keypoints at all: the machine goes rest after the off
        // streak, but the first frames are undecided and consult
        // the upstream set.
        let keypoints: Vec<Option<KeypointSet>> = vec![None; 10];
        let phases = vec![Phase::Ready; 10];
        let upstream: BTreeSet<usize> = [0usize, 1, 2].into_iter().collect();

        let selection = refine_push_up(&keypoints, &phases, &upstream, 0.0);
        let stats = selection.refinement.unwrap();
        assert!(stats.fallback_frames >= 1);
    }
}
