//! Repetition counting with an activation state machine.
//!
//! The counter is independent of the phase detector's internals: it
//! consumes the detector's output phase plus the normalized keypoints.
//! While inactive it waits for a sustained "ready posture"; while active
//! it counts one repetition per visit of the required {top, bottom} pair,
//! gated so that lingering in the count phase cannot double-count, and it
//! deactivates after a sustained loss of exercise posture or keypoints.

use tracing::debug;

use crate::config::Exercise;
use crate::geometry::joint_angle;
use crate::keypoint::{JointId, KeypointSet};
use crate::phase::{Phase, BASE_FPS};

/// Frames of sustained ready posture required to activate, at [`BASE_FPS`].
const BASE_ACTIVE_FRAMES: f64 = 4.0; // 0.4 s

/// Frames of lost posture tolerated before deactivating, at [`BASE_FPS`].
const BASE_INACTIVE_FRAMES: f64 = 10.0; // 1.0 s

/// Push-up ready posture: elbow angle must exceed this.
const PUSHUP_READY_ELBOW: f64 = 140.0;

/// Push-up "still exercising" slack on the wrist-vs-knee comparison.
const PUSHUP_HOLD_MARGIN: f64 = 0.08;

/// Pull-up ready posture: wrist may sit this far below the shoulder line.
const PULLUP_READY_MARGIN: f64 = 0.05;

/// Pull-up "still exercising" slack, laxer than the ready margin.
const PULLUP_HOLD_MARGIN: f64 = 0.12;

/// Repetition counter for one exercise session.
#[derive(Debug)]
pub struct RepCounter {
    exercise: Exercise,
    count: u32,
    is_active: bool,
    ready_frames: u32,
    inactive_frames: u32,
    visited_top: bool,
    visited_bottom: bool,
    gate_phase: Option<Phase>,
    active_threshold: u32,
    inactive_threshold: u32,
}

impl RepCounter {
    /// Create a counter for `exercise` at the given extraction rate.
    #[must_use]
    pub fn new(exercise: Exercise, fps: f64) -> Self {
        let ratio = fps.max(1.0) / BASE_FPS;
        Self {
            exercise,
            count: 0,
            is_active: false,
            ready_frames: 0,
            inactive_frames: 0,
            visited_top: false,
            visited_bottom: false,
            gate_phase: None,
            active_threshold: ((BASE_ACTIVE_FRAMES * ratio).round() as u32).max(1),
            inactive_threshold: ((BASE_INACTIVE_FRAMES * ratio).round() as u32).max(1),
        }
    }

    /// Repetitions counted so far. Monotonically non-decreasing within a
    /// session.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Whether the subject is currently judged to be exercising.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Reset all state for a new video.
    pub fn reset(&mut self) {
        self.count = 0;
        self.is_active = false;
        self.ready_frames = 0;
        self.inactive_frames = 0;
        self.clear_visited();
        self.gate_phase = None;
    }

    /// Advance the counter with one frame and return the running count.
    ///
    /// `pts` must be normalized keypoints, or `None` when detection
    /// failed; absent keypoints count toward the inactivity timeout while
    /// active and are ignored while inactive.
    pub fn update(&mut self, pts: Option<&KeypointSet>, phase: Phase) -> u32 {
        let Some(pts) = pts else {
            if self.is_active {
                self.inactive_frames += 1;
                if self.inactive_frames > self.inactive_threshold {
                    self.deactivate("keypoints lost");
                }
            }
            return self.count;
        };

        if !self.is_active {
            if self.ready_posture(pts) {
                self.ready_frames += 1;
            } else {
                self.ready_frames = self.ready_frames.saturating_sub(1);
            }

            if self.ready_frames > self.active_threshold {
                self.is_active = true;
                self.inactive_frames = 0;
                self.clear_visited();
                self.gate_phase = None;
                debug!(exercise = %self.exercise, "counter activated");
            }
            return self.count;
        }

        if self.holding_exercise_posture(pts) {
            self.inactive_frames = 0;
        } else {
            self.inactive_frames += 1;
            if self.inactive_frames > self.inactive_threshold {
                self.deactivate("posture lost");
                return self.count;
            }
        }

        match phase {
            Phase::Top => self.visited_top = true,
            Phase::Bottom => self.visited_bottom = true,
            _ => {}
        }

        let count_phase = self.exercise.count_phase();
        if phase == count_phase {
            if self.visited_top && self.visited_bottom && self.gate_phase != Some(count_phase) {
                self.count += 1;
                self.clear_visited();
                self.gate_phase = Some(count_phase);
                debug!(exercise = %self.exercise, count = self.count, "repetition counted");
            }
        } else {
            self.gate_phase = None;
        }

        self.count
    }

    /// Close the session: credit one final repetition if the required
    /// pair was visited while still active, then deactivate.
    pub fn finalize(&mut self) -> u32 {
        if self.is_active {
            if self.visited_top && self.visited_bottom {
                self.count += 1;
                debug!(exercise = %self.exercise, count = self.count, "final repetition credited");
            }
            self.is_active = false;
        }
        self.count
    }

    fn clear_visited(&mut self) {
        self.visited_top = false;
        self.visited_bottom = false;
    }

    fn deactivate(&mut self, reason: &str) {
        self.is_active = false;
        self.ready_frames = 0;
        self.inactive_frames = 0;
        self.clear_visited();
        self.gate_phase = None;
        debug!(exercise = %self.exercise, reason, "counter deactivated");
    }

    /// Strict posture test used to arm the counter.
    fn ready_posture(&self, pts: &KeypointSet) -> bool {
        match self.exercise {
            Exercise::PushUp => {
                let elbow = mean_elbow_angle(pts);
                let wrist_y = pts.pair_y(JointId::LeftWrist, JointId::RightWrist);
                let knee_y = pts.pair_y(JointId::LeftKnee, JointId::RightKnee);
                wrist_y > knee_y && elbow > PUSHUP_READY_ELBOW
            }
            Exercise::PullUp => {
                let wrist_y = pts.pair_y(JointId::LeftWrist, JointId::RightWrist);
                let shoulder_y = pts.pair_y(JointId::LeftShoulder, JointId::RightShoulder);
                wrist_y < shoulder_y + PULLUP_READY_MARGIN
            }
        }
    }

    /// Laxer posture test that keeps the counter active mid-movement.
    fn holding_exercise_posture(&self, pts: &KeypointSet) -> bool {
        match self.exercise {
            Exercise::PushUp => {
                let wrist_y = pts.pair_y(JointId::LeftWrist, JointId::RightWrist);
                let knee_y = pts.pair_y(JointId::LeftKnee, JointId::RightKnee);
                wrist_y > knee_y - PUSHUP_HOLD_MARGIN
            }
            Exercise::PullUp => {
                let wrist_y = pts.pair_y(JointId::LeftWrist, JointId::RightWrist);
                let shoulder_y = pts.pair_y(JointId::LeftShoulder, JointId::RightShoulder);
                wrist_y < shoulder_y + PULLUP_HOLD_MARGIN
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoint::KeypointSet;

    /// Normalized push-up posture: prone, wrists below knees, arms
    /// extended enough to satisfy the ready test.
    fn pushup_pose() -> KeypointSet {
        let mut coords = [[0.5, 0.5]; JointId::COUNT];
        coords[JointId::LeftShoulder as usize] = [0.30, 0.50];
        coords[JointId::RightShoulder as usize] = [0.32, 0.50];
        coords[JointId::LeftElbow as usize] = [0.30, 0.62];
        coords[JointId::RightElbow as usize] = [0.32, 0.62];
        coords[JointId::LeftWrist as usize] = [0.30, 0.74];
        coords[JointId::RightWrist as usize] = [0.32, 0.74];
        coords[JointId::LeftKnee as usize] = [0.60, 0.60];
        coords[JointId::RightKnee as usize] = [0.62, 0.60];
        KeypointSet::from_coords(coords)
    }

    /// Normalized pull-up posture: hanging, wrists above shoulders.
    fn pullup_pose() -> KeypointSet {
        let mut coords = [[0.5, 0.5]; JointId::COUNT];
        coords[JointId::LeftWrist as usize] = [0.45, 0.20];
        coords[JointId::RightWrist as usize] = [0.55, 0.20];
        coords[JointId::LeftShoulder as usize] = [0.45, 0.40];
        coords[JointId::RightShoulder as usize] = [0.55, 0.40];
        KeypointSet::from_coords(coords)
    }

    fn activate(counter: &mut RepCounter, pose: &KeypointSet) {
        for _ in 0..=counter.active_threshold {
            counter.update(Some(pose), Phase::Ready);
        }
        assert!(counter.is_active());
    }

    #[test]
    fn test_activation_requires_sustained_ready() {
        let mut counter = RepCounter::new(Exercise::PushUp, 10.0);
        let pose = pushup_pose();
        for _ in 0..3 {
            counter.update(Some(&pose), Phase::Ready);
        }
        assert!(!counter.is_active());
        counter.update(Some(&pose), Phase::Ready);
        counter.update(Some(&pose), Phase::Ready);
        assert!(counter.is_active());
    }

    #[test]
    fn test_two_reps_counted_once_each() {
        let mut counter = RepCounter::new(Exercise::PushUp, 10.0);
        let pose = pushup_pose();
        activate(&mut counter, &pose);

        for &phase in &[
            Phase::Bottom,
            Phase::Top,
            Phase::Top, // lingering in top must not double-count
            Phase::Bottom,
            Phase::Top,
        ] {
            counter.update(Some(&pose), phase);
        }
        assert_eq!(counter.finalize(), 2);
    }

    #[test]
    fn test_top_without_bottom_does_not_count() {
        let mut counter = RepCounter::new(Exercise::PushUp, 10.0);
        let pose = pushup_pose();
        activate(&mut counter, &pose);

        for &phase in &[Phase::Top, Phase::Descending, Phase::Top] {
            counter.update(Some(&pose), phase);
        }
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_pullup_counts_at_bottom() {
        let mut counter = RepCounter::new(Exercise::PullUp, 10.0);
        let pose = pullup_pose();
        activate(&mut counter, &pose);

        for &phase in &[Phase::Bottom, Phase::Ascending, Phase::Top, Phase::Descending] {
            counter.update(Some(&pose), phase);
        }
        assert_eq!(counter.count(), 0);
        counter.update(Some(&pose), Phase::Bottom);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn test_finalize_credits_open_rep() {
        let mut counter = RepCounter::new(Exercise::PushUp, 10.0);
        let pose = pushup_pose();
        activate(&mut counter, &pose);

        // Session ends mid-rep with both phases visited but no count yet:
        // bottom was visited, then top arrives only after the gate reset.
        counter.update(Some(&pose), Phase::Bottom);
        counter.update(Some(&pose), Phase::Ascending);
        assert_eq!(counter.count(), 0);
        counter.update(Some(&pose), Phase::Top);
        assert_eq!(counter.count(), 1);

        // New cycle left open at session end.
        counter.update(Some(&pose), Phase::Bottom);
        counter.update(Some(&pose), Phase::Top);
        assert_eq!(counter.count(), 2);
        assert_eq!(counter.finalize(), 2);
    }

    #[test]
    fn test_finalize_without_pair_adds_nothing() {
        let mut counter = RepCounter::new(Exercise::PushUp, 10.0);
        let pose = pushup_pose();
        activate(&mut counter, &pose);
        counter.update(Some(&pose), Phase::Descending);
        assert_eq!(counter.finalize(), 0);
        assert!(!counter.is_active());
    }

    #[test]
    fn test_lost_keypoints_deactivate() {
        let mut counter = RepCounter::new(Exercise::PushUp, 10.0);
        let pose = pushup_pose();
        activate(&mut counter, &pose);
        counter.update(Some(&pose), Phase::Bottom);

        for _ in 0..=counter.inactive_threshold {
            counter.update(None, Phase::Ready);
        }
        assert!(!counter.is_active());
        // The interrupted cycle is discarded.
        assert_eq!(counter.finalize(), 0);
    }

    #[test]
    fn test_count_is_monotonic() {
        let mut counter = RepCounter::new(Exercise::PushUp, 10.0);
        let pose = pushup_pose();
        activate(&mut counter, &pose);

        let mut last = 0;
        for &phase in &[
            Phase::Bottom,
            Phase::Top,
            Phase::Descending,
            Phase::Bottom,
            Phase::Ascending,
            Phase::Top,
            Phase::Top,
        ] {
            let c = counter.update(Some(&pose), phase);
            assert!(c >= last);
            last = c;
        }
        assert_eq!(last, 2);
    }
}
