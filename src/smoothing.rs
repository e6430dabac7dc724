//! Temporal smoothing of keypoint coordinates.
//!
//! Per-joint moving average over a short window, with an outlier guard:
//! a sample that jumps away from the running window average is blended
//! back toward it before entering the window. This removes frame-to-frame
//! estimator jitter without the lag a longer window would introduce.

use std::collections::VecDeque;

use crate::keypoint::{JointId, KeypointSet};

/// Default window length in frames.
pub const DEFAULT_WINDOW: usize = 3;

/// Default jump threshold, in unit-range coordinates.
pub const DEFAULT_JUMP_THRESHOLD: f64 = 0.15;

/// Blend factor applied to the previous window average when a jump is
/// detected; the new sample contributes the remainder.
const OUTLIER_BLEND: f64 = 0.7;

/// Moving-average keypoint smoother with outlier damping.
///
/// Owns one bounded coordinate history per joint. State is scoped to a
/// single analysis session; call [`KeypointSmoother::reset`] when a new
/// video starts.
#[derive(Debug)]
pub struct KeypointSmoother {
    window: usize,
    jump_threshold: f64,
    history: [VecDeque<[f64; 2]>; JointId::COUNT],
}

impl KeypointSmoother {
    /// Create a smoother with an explicit window and jump threshold.
    #[must_use]
    pub fn new(window: usize, jump_threshold: f64) -> Self {
        Self {
            window: window.max(1),
            jump_threshold,
            history: std::array::from_fn(|_| VecDeque::with_capacity(window.max(1))),
        }
    }

    /// Clear all per-joint history.
    pub fn reset(&mut self) {
        for buf in &mut self.history {
            buf.clear();
        }
    }

    /// Smooth one frame's keypoints.
    ///
    /// `None` propagates unchanged and leaves the history untouched, so a
    /// dropped detection does not poison the window. Otherwise each joint
    /// is outlier-blended, pushed into its window, and replaced by the
    /// window average.
    pub fn smooth(&mut self, pts: Option<KeypointSet>) -> Option<KeypointSet> {
        let pts = pts?;

        let mut coords = *pts.coords();
        for (joint, coord) in coords.iter_mut().enumerate() {
            let buf = &mut self.history[joint];

            if !buf.is_empty() {
                let (avg_x, avg_y) = window_average(buf);
                let dx = (coord[0] - avg_x).abs();
                let dy = (coord[1] - avg_y).abs();
                if dx > self.jump_threshold || dy > self.jump_threshold {
                    coord[0] = avg_x * OUTLIER_BLEND + coord[0] * (1.0 - OUTLIER_BLEND);
                    coord[1] = avg_y * OUTLIER_BLEND + coord[1] * (1.0 - OUTLIER_BLEND);
                }
            }

            if buf.len() == self.window {
                buf.pop_front();
            }
            buf.push_back(*coord);

            let (avg_x, avg_y) = window_average(buf);
            *coord = [avg_x, avg_y];
        }

        Some(KeypointSet::from_coords(coords))
    }
}

impl Default for KeypointSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_JUMP_THRESHOLD)
    }
}

fn window_average(buf: &VecDeque<[f64; 2]>) -> (f64, f64) {
    let n = buf.len() as f64;
    let sum_x: f64 = buf.iter().map(|c| c[0]).sum();
    let sum_y: f64 = buf.iter().map(|c| c[1]).sum();
    (sum_x / n, sum_y / n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_set(v: f64) -> KeypointSet {
        KeypointSet::from_coords([[v, v]; JointId::COUNT])
    }

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_none_propagates() {
        let mut smoother = KeypointSmoother::default();
        assert!(smoother.smooth(None).is_none());
        // History stays empty: the next sample passes through unchanged.
        let out = smoother.smooth(Some(uniform_set(0.4))).unwrap();
        assert!(approx_eq(out.x(JointId::Nose), 0.4, 1e-12));
    }

    #[test]
    fn test_first_frame_passthrough() {
        let mut smoother = KeypointSmoother::default();
        let out = smoother.smooth(Some(uniform_set(0.5))).unwrap();
        assert!(approx_eq(out.y(JointId::Waist), 0.5, 1e-12));
    }

    #[test]
    fn test_window_average() {
        let mut smoother = KeypointSmoother::new(3, 10.0); // threshold high: no blending
        smoother.smooth(Some(uniform_set(0.1)));
        smoother.smooth(Some(uniform_set(0.2)));
        let out = smoother.smooth(Some(uniform_set(0.3))).unwrap();
        assert!(approx_eq(out.x(JointId::Nose), 0.2, 1e-12));
    }

    #[test]
    fn test_jump_is_blended() {
        let mut smoother = KeypointSmoother::new(3, 0.15);
        smoother.smooth(Some(uniform_set(0.1)));
        // 0.1 -> 0.9 jumps by 0.8 > 0.15: blended to 0.7*0.1 + 0.3*0.9 = 0.34,
        // then averaged with the 0.1 already in the window.
        let out = smoother.smooth(Some(uniform_set(0.9))).unwrap();
        assert!(approx_eq(out.x(JointId::Nose), (0.1 + 0.34) / 2.0, 1e-12));
    }

    #[test]
    fn test_small_step_not_blended() {
        let mut smoother = KeypointSmoother::new(3, 0.15);
        smoother.smooth(Some(uniform_set(0.1)));
        let out = smoother.smooth(Some(uniform_set(0.2))).unwrap();
        assert!(approx_eq(out.x(JointId::Nose), 0.15, 1e-12));
    }

    #[test]
    fn test_reset() {
        let mut smoother = KeypointSmoother::new(3, 10.0);
        smoother.smooth(Some(uniform_set(0.1)));
        smoother.reset();
        let out = smoother.smooth(Some(uniform_set(0.9))).unwrap();
        assert!(approx_eq(out.x(JointId::Nose), 0.9, 1e-12));
    }

    #[test]
    fn test_window_is_bounded() {
        let mut smoother = KeypointSmoother::new(2, 10.0);
        smoother.smooth(Some(uniform_set(0.0)));
        smoother.smooth(Some(uniform_set(0.2)));
        // Window holds [0.2, 0.4] after this push; 0.0 has been evicted.
        let out = smoother.smooth(Some(uniform_set(0.4))).unwrap();
        assert!(approx_eq(out.x(JointId::Nose), 0.3, 1e-12));
    }
}
