//! Rule-based posture evaluation, phase by phase.
//!
//! Each exercise carries a fixed catalog of boolean checks with
//! literature- or data-derived cutoffs, organized per phase: a static
//! hold at the top is judged on different criteria than the descent.
//! The frame score is the weighted fraction of passed checks, with the
//! weights coming from the effect-size table in [`crate::weights`];
//! bilateral-symmetry failures apply a flat penalty outside the weighted
//! sum.
//!
//! Threshold sources, where not derived from the labeled dataset:
//! - Elbow extension/flexion: NSCA Essentials of Strength Training
//!   (4th ed.), ch. 15 — full extension > 160°, bottom near 90° (a
//!   lenient < 120° is used here).
//! - Trunk line: ACSM Guidelines (11th ed.) — neutral spine ≥ 160°
//!   (lenient 150° here).
//! - Shoulder abduction: Escamilla et al. (2010), J Strength Cond Res —
//!   recommended 45°–75° during the push-up.
//! - Head position: Ronai & Scibek (2014), Strength & Cond J — neutral
//!   cervical position during the pull-up.
//! - Scapular packing: Youdas et al. (2010), J Strength Cond Res;
//!   Prinold & Bull (2016), J Sci Med Sport.
//! - Kipping/sway: Dinunzio et al. (2019), Sports Biomechanics.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::{Exercise, GripStyle};
use crate::geometry::{joint_angle, point_distance};
use crate::keypoint::{JointId, KeypointSet};
use crate::phase::Phase;
use crate::weights::CheckWeights;

// Push-up cutoffs.
const ARM_EXTENDED: f64 = 160.0;
const ARM_BENT: f64 = 120.0;
const BACK_STRAIGHT: f64 = 150.0;
const HAND_OFFSET_LIMIT: f64 = 0.09;
const PUSHUP_HEAD_TILT_LIMIT: f64 = 0.06;
const SHOULDER_ABD_MIN: f64 = 30.0;
const SHOULDER_ABD_MAX: f64 = 80.0;
const CHEST_MOVEMENT_MIN_VAR: f64 = 1.0e-4;

// Pull-up cutoffs.
const PULLUP_HEAD_TILT_LIMIT: f64 = 0.04;
const SHOULDER_PACKING_LIMIT: f64 = 0.015;
const BODY_SWAY_MAX_VAR: f64 = 3.0e-3;

// Bilateral symmetry tolerances.
const ARM_SYMMETRY_LIMIT: f64 = 15.0;
const ABD_SYMMETRY_LIMIT: f64 = 15.0;
const SHOULDER_HEIGHT_SYMMETRY_LIMIT: f64 = 0.03;

/// Flat penalty per failed symmetry check, applied outside the weighted sum.
const SYMMETRY_PENALTY: f64 = 0.05;

/// Flat penalty for insufficient chest travel at the push-up bottom.
const CHEST_MOVEMENT_PENALTY: f64 = 0.1;

/// Minimum variance-window fill before the variance checks judge anything.
const VARIANCE_MIN_SAMPLES: usize = 3;

/// Sentinel error reported when keypoints are absent.
pub const MISSING_KEYPOINTS_ERROR: &str = "keypoints missing";

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Check passed.
    Ok,
    /// Check failed softly (symmetry, range-of-motion hints).
    Warning,
    /// Check failed.
    Error,
}

/// Measured value, status and feedback for one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDetail {
    /// The measured quantity (angle in degrees, offset or variance in
    /// normalized units).
    pub value: f64,
    /// Pass/fail status.
    pub status: CheckStatus,
    /// Human-readable coaching feedback.
    pub feedback: String,
}

/// Weight applied to one check and whether it passed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckUsage {
    /// Weight drawn from the effect-size table.
    pub weight: f64,
    /// Whether the check passed.
    pub passed: bool,
}

/// Evaluation outcome for one frame.
///
/// `Serialize` only: the `&'static str` map keys in `details` /
/// `weights_used` cannot satisfy a derived `Deserialize<'de>` for all
/// `'de`, and nothing in the crate deserializes this type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    /// Weighted posture score in `[0, 1]`.
    pub score: f64,
    /// Feedback lines for every failed check, in check order.
    pub errors: Vec<String>,
    /// Per-check measurements.
    pub details: BTreeMap<&'static str, CheckDetail>,
    /// Per-check weights actually applied this frame.
    pub weights_used: BTreeMap<&'static str, CheckUsage>,
}

impl EvaluationResult {
    /// Result for a frame without keypoints: zero score, one sentinel
    /// error, no details.
    #[must_use]
    pub fn missing_keypoints() -> Self {
        Self {
            score: 0.0,
            errors: vec![MISSING_KEYPOINTS_ERROR.to_string()],
            details: BTreeMap::new(),
            weights_used: BTreeMap::new(),
        }
    }

    /// Result for the ready phase: nothing is evaluated while the
    /// subject is not performing the movement.
    #[must_use]
    pub fn ready() -> Self {
        Self {
            score: 1.0,
            errors: Vec::new(),
            details: BTreeMap::new(),
            weights_used: BTreeMap::new(),
        }
    }
}

/// Scratch space shared by the per-phase evaluations of one frame.
#[derive(Default)]
struct FrameChecks {
    errors: Vec<String>,
    details: BTreeMap<&'static str, CheckDetail>,
    checks: Vec<(&'static str, bool)>,
}

impl FrameChecks {
    fn record(
        &mut self,
        detail_key: &'static str,
        value: f64,
        passed: bool,
        status_on_fail: CheckStatus,
        ok_feedback: impl Into<String>,
        fail_feedback: impl Into<String>,
    ) -> bool {
        if passed {
            self.details.insert(
                detail_key,
                CheckDetail {
                    value,
                    status: CheckStatus::Ok,
                    feedback: ok_feedback.into(),
                },
            );
        } else {
            let feedback = fail_feedback.into();
            self.details.insert(
                detail_key,
                CheckDetail {
                    value,
                    status: status_on_fail,
                    feedback: feedback.clone(),
                },
            );
            self.errors.push(feedback);
        }
        passed
    }

    fn weighted(&mut self, weight_key: &'static str, passed: bool) {
        self.checks.push((weight_key, passed));
    }
}

/// Posture evaluator for one exercise session.
///
/// Holds only a small rolling history (waist position) for the variance
/// checks; everything else is a pure function of the current frame.
#[derive(Debug)]
pub struct PostureEvaluator {
    exercise: Exercise,
    grip: GripStyle,
    weights: CheckWeights,
    waist_history: VecDeque<f64>,
    history_size: usize,
}

impl PostureEvaluator {
    /// Create an evaluator with an injected weight table.
    #[must_use]
    pub fn new(exercise: Exercise, grip: GripStyle, weights: CheckWeights, history_size: usize) -> Self {
        let history_size = history_size.max(VARIANCE_MIN_SAMPLES);
        Self {
            exercise,
            grip,
            weights,
            waist_history: VecDeque::with_capacity(history_size),
            history_size,
        }
    }

    /// Create an evaluator with the built-in weight table.
    #[must_use]
    pub fn with_default_weights(exercise: Exercise, grip: GripStyle) -> Self {
        Self::new(exercise, grip, CheckWeights::for_exercise(exercise), 30)
    }

    /// Clear the rolling history for a new video.
    pub fn reset(&mut self) {
        self.waist_history.clear();
    }

    /// Evaluate one frame.
    ///
    /// Absent keypoints yield the sentinel result; the `Ready` phase
    /// always scores 1.0.
    pub fn evaluate(&mut self, pts: Option<&KeypointSet>, phase: Phase) -> EvaluationResult {
        let Some(pts) = pts else {
            return EvaluationResult::missing_keypoints();
        };
        if phase == Phase::Ready {
            return EvaluationResult::ready();
        }

        match self.exercise {
            Exercise::PushUp => self.evaluate_pushup(pts, phase),
            Exercise::PullUp => self.evaluate_pullup(pts, phase),
        }
    }

    // ── Push-up ─────────────────────────────────────────────────────────

    fn evaluate_pushup(&mut self, pts: &KeypointSet, phase: Phase) -> EvaluationResult {
        let mut fc = FrameChecks::default();
        let mut penalty = 0.0;

        match phase {
            Phase::Top | Phase::Bottom => {
                let elbow = mean_elbow_angle(pts);
                if phase == Phase::Top {
                    let passed = fc.record(
                        "arm_extended",
                        round_to(elbow, 1),
                        elbow > ARM_EXTENDED,
                        CheckStatus::Error,
                        "arms fully extended",
                        "extend your arms fully",
                    );
                    fc.weighted("elbow_angle", passed);
                } else {
                    let passed = fc.record(
                        "arm_bent",
                        round_to(elbow, 1),
                        elbow < ARM_BENT,
                        CheckStatus::Error,
                        "arms bent enough",
                        "lower yourself deeper",
                    );
                    fc.weighted("elbow_angle", passed);
                }

                self.check_back(pts, &mut fc);
                self.check_hand(pts, &mut fc, false);
                self.check_head_tilt(pts, &mut fc);
                self.check_shoulder_abduction(pts, &mut fc);

                if !self.check_arm_symmetry(pts, &mut fc) {
                    penalty += SYMMETRY_PENALTY;
                }
                if !self.check_abduction_symmetry(pts, &mut fc) {
                    penalty += SYMMETRY_PENALTY;
                }

                if phase == Phase::Bottom && !self.check_chest_movement(pts, &mut fc) {
                    penalty += CHEST_MOVEMENT_PENALTY;
                }
            }
            _ => {
                // Transitions: the arm angle is changing by definition, so
                // only the posture-holding checks apply.
                self.check_back(pts, &mut fc);
                self.check_hand(pts, &mut fc, true);
                self.check_shoulder_abduction(pts, &mut fc);
            }
        }

        self.finish(fc, penalty)
    }

    fn check_back(&self, pts: &KeypointSet, fc: &mut FrameChecks) {
        let angle = joint_angle(
            pts.get(JointId::Neck),
            pts.get(JointId::Waist),
            pts.get(JointId::AnkleCenter),
        );
        let passed = fc.record(
            "back_straight",
            round_to(angle, 1),
            angle >= BACK_STRAIGHT,
            CheckStatus::Error,
            "back posture good",
            "keep your back straight",
        );
        fc.weighted("back_angle", passed);
    }

    fn check_hand(&self, pts: &KeypointSet, fc: &mut FrameChecks, moving: bool) {
        let offset = (pts.x(JointId::Waist)
            - pts.pair_x(JointId::LeftWrist, JointId::RightWrist))
        .abs();
        let (ok_fb, err_fb) = if moving {
            ("hands holding steady", "keep your hands placed evenly")
        } else {
            ("hand position good", "place your hands evenly")
        };
        let passed = fc.record(
            "hand_position",
            round_to(offset, 4),
            offset <= HAND_OFFSET_LIMIT,
            CheckStatus::Error,
            ok_fb,
            err_fb,
        );
        fc.weighted("hand_offset", passed);
    }

    fn check_head_tilt(&self, pts: &KeypointSet, fc: &mut FrameChecks) {
        let tilt = head_tilt(pts);
        let passed = tilt.abs() <= PUSHUP_HEAD_TILT_LIMIT;
        let fail_fb = if tilt > 0.0 {
            "don't drop your head"
        } else {
            "don't lift your head"
        };
        let passed = fc.record(
            "head_tilt",
            round_to(tilt, 4),
            passed,
            CheckStatus::Error,
            "head posture good",
            fail_fb,
        );
        fc.weighted("head_tilt", passed);
    }

    fn check_shoulder_abduction(&self, pts: &KeypointSet, fc: &mut FrameChecks) {
        let (left, right) = abduction_angles(pts);
        let avg = (left + right) / 2.0;
        let passed = (SHOULDER_ABD_MIN..=SHOULDER_ABD_MAX).contains(&avg);
        let fail_fb = if avg > SHOULDER_ABD_MAX {
            "tuck your elbows toward your body"
        } else {
            "let your elbows out slightly"
        };
        let passed = fc.record(
            "shoulder_abduction",
            round_to(avg, 1),
            passed,
            CheckStatus::Error,
            "shoulder abduction good",
            fail_fb,
        );
        fc.weighted("shoulder_abduction", passed);
    }

    fn check_chest_movement(&mut self, pts: &KeypointSet, fc: &mut FrameChecks) -> bool {
        self.push_history(pts.y(JointId::Waist));
        // Too little history to judge range of motion: pass.
        let var = if self.waist_history.len() >= VARIANCE_MIN_SAMPLES {
            variance(&self.waist_history)
        } else {
            CHEST_MOVEMENT_MIN_VAR
        };
        fc.record(
            "chest_movement",
            round_to(var, 6),
            var >= CHEST_MOVEMENT_MIN_VAR,
            CheckStatus::Warning,
            "chest travel sufficient",
            "lower your chest further",
        )
    }

    // ── Pull-up ─────────────────────────────────────────────────────────

    fn evaluate_pullup(&mut self, pts: &KeypointSet, phase: Phase) -> EvaluationResult {
        let mut fc = FrameChecks::default();
        let mut penalty = 0.0;

        match phase {
            Phase::Top => {
                self.check_gaze(pts, &mut fc);
                self.check_shoulder_packing(pts, &mut fc);
                self.check_elbow_flare(pts, &mut fc);
                self.check_body_sway(pts, &mut fc);
            }
            Phase::Ascending => {
                self.check_shoulder_packing(pts, &mut fc);
                self.check_elbow_flare(pts, &mut fc);
                self.check_body_sway(pts, &mut fc);
            }
            _ => {
                // Bottom and descent: only the hang posture is judged.
                self.check_shoulder_packing(pts, &mut fc);
                self.check_body_sway(pts, &mut fc);
            }
        }

        if !self.check_arm_symmetry(pts, &mut fc) {
            penalty += SYMMETRY_PENALTY;
        }
        if !self.check_shoulder_height_symmetry(pts, &mut fc) {
            penalty += SYMMETRY_PENALTY;
        }

        self.finish(fc, penalty)
    }

    fn check_gaze(&self, pts: &KeypointSet, fc: &mut FrameChecks) {
        let tilt = head_tilt(pts);
        let passed = fc.record(
            "head_tilt",
            round_to(tilt, 4),
            tilt <= PULLUP_HEAD_TILT_LIMIT,
            CheckStatus::Error,
            "gaze held up",
            "keep your gaze upward",
        );
        fc.weighted("head_tilt", passed);
    }

    fn check_shoulder_packing(&self, pts: &KeypointSet, fc: &mut FrameChecks) {
        let diff = pts.pair_y(JointId::LeftShoulder, JointId::RightShoulder)
            - pts.y(JointId::Neck);
        let passed = fc.record(
            "shoulder_packing",
            round_to(diff, 4),
            diff >= -SHOULDER_PACKING_LIMIT,
            CheckStatus::Error,
            "shoulders packed",
            "draw your shoulders down",
        );
        fc.weighted("shoulder_packing", passed);
    }

    fn check_elbow_flare(&self, pts: &KeypointSet, fc: &mut FrameChecks) {
        let elbow_dist = point_distance(pts.get(JointId::LeftElbow), pts.get(JointId::RightElbow));
        let shoulder_dist =
            point_distance(pts.get(JointId::LeftShoulder), pts.get(JointId::RightShoulder));
        // Degenerate shoulder span: skip the ratio rather than divide.
        if shoulder_dist < 1e-6 {
            fc.details.insert(
                "elbow_flare",
                CheckDetail {
                    value: 0.0,
                    status: CheckStatus::Ok,
                    feedback: "not measurable this frame".to_string(),
                },
            );
            fc.weighted("elbow_flare", true);
            return;
        }
        let ratio = elbow_dist / shoulder_dist;
        let limit = self.grip.elbow_flare_limit();
        let passed = fc.record(
            "elbow_flare",
            round_to(ratio, 2),
            ratio <= limit,
            CheckStatus::Error,
            "elbow line good",
            "pull your elbows toward your body",
        );
        fc.weighted("elbow_flare", passed);
    }

    fn check_body_sway(&mut self, pts: &KeypointSet, fc: &mut FrameChecks) {
        self.push_history(pts.x(JointId::Waist));
        let var = if self.waist_history.len() >= VARIANCE_MIN_SAMPLES {
            variance(&self.waist_history)
        } else {
            0.0
        };
        let passed = fc.record(
            "body_sway",
            round_to(var, 6),
            var <= BODY_SWAY_MAX_VAR,
            CheckStatus::Error,
            "body stable",
            "keep your body from swinging",
        );
        fc.weighted("body_sway", passed);
    }

    // ── Symmetry (both exercises) ───────────────────────────────────────

    fn check_arm_symmetry(&self, pts: &KeypointSet, fc: &mut FrameChecks) -> bool {
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
        let diff = (left - right).abs();
        let side = if left < right { "left" } else { "right" };
        fc.record(
            "arm_symmetry",
            round_to(diff, 1),
            diff <= ARM_SYMMETRY_LIMIT,
            CheckStatus::Warning,
            format!("arm balance good ({diff:.1}° apart)"),
            format!("arm imbalance — the {side} arm is bent further ({diff:.1}° apart)"),
        )
    }

    fn check_abduction_symmetry(&self, pts: &KeypointSet, fc: &mut FrameChecks) -> bool {
        let (left, right) = abduction_angles(pts);
        let diff = (left - right).abs();
        let side = if left > right { "left" } else { "right" };
        fc.record(
            "abduction_symmetry",
            round_to(diff, 1),
            diff <= ABD_SYMMETRY_LIMIT,
            CheckStatus::Warning,
            format!("shoulder balance good ({diff:.1}° apart)"),
            format!("shoulder imbalance — the {side} elbow flares further ({diff:.1}° apart)"),
        )
    }

    fn check_shoulder_height_symmetry(&self, pts: &KeypointSet, fc: &mut FrameChecks) -> bool {
        let left = pts.y(JointId::LeftShoulder);
        let right = pts.y(JointId::RightShoulder);
        let diff = (left - right).abs();
        let side = if left > right { "left" } else { "right" };
        fc.record(
            "shoulder_symmetry",
            round_to(diff, 4),
            diff <= SHOULDER_HEIGHT_SYMMETRY_LIMIT,
            CheckStatus::Warning,
            "shoulder height balanced",
            format!("shoulder imbalance — the {side} shoulder hangs lower"),
        )
    }

    // ── Scoring ─────────────────────────────────────────────────────────

    fn finish(&self, fc: FrameChecks, penalty: f64) -> EvaluationResult {
        let total: f64 = fc.checks.iter().map(|(key, _)| self.weights.weight(key)).sum();
        let score = if total < 1e-12 {
            0.0
        } else {
            let earned: f64 = fc
                .checks
                .iter()
                .filter(|(_, passed)| *passed)
                .map(|(key, _)| self.weights.weight(key))
                .sum();
            earned / total
        };
        let score = round_to((score - penalty).max(0.0), 2);

        let weights_used = fc
            .checks
            .iter()
            .map(|&(key, passed)| {
                (
                    key,
                    CheckUsage {
                        weight: round_to(self.weights.weight(key), 4),
                        passed,
                    },
                )
            })
            .collect();

        EvaluationResult {
            score,
            errors: fc.errors,
            details: fc.details,
            weights_used,
        }
    }

    fn push_history(&mut self, value: f64) {
        if self.waist_history.len() == self.history_size {
            self.waist_history.pop_front();
        }
        self.waist_history.push_back(value);
    }
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

fn abduction_angles(pts: &KeypointSet) -> (f64, f64) {
    let left = joint_angle(
        pts.get(JointId::LeftElbow),
        pts.get(JointId::LeftShoulder),
        pts.get(JointId::LeftHip),
    );
    let right = joint_angle(
        pts.get(JointId::RightElbow),
        pts.get(JointId::RightShoulder),
        pts.get(JointId::RightHip),
    );
    (left, right)
}

/// Downward head tilt: eye/nose midline relative to the ear line, in
/// normalized units (positive = face dropped below the ears).
fn head_tilt(pts: &KeypointSet) -> f64 {
    let eye_nose_y =
        (pts.pair_y(JointId::LeftEye, JointId::RightEye) + pts.y(JointId::Nose)) / 2.0;
    let ear_y = pts.pair_y(JointId::LeftEar, JointId::RightEar);
    eye_nose_y - ear_y
}

fn variance(values: &VecDeque<f64>) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
