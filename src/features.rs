//! Per-frame feature vectors for similarity scoring.
//!
//! A frame's feature vector concatenates a small block of joint-angle
//! features (normalized to unit range) with the raw normalized
//! coordinates of all 20 joints. The angle block leads the vector so the
//! similarity scorer can slice it off: angles describe form, while
//! coordinates depend on where the camera stood and are excluded from
//! sequence alignment.

use crate::config::Exercise;
use crate::geometry::{joint_angle, point_distance};
use crate::keypoint::{JointId, KeypointSet};

/// Number of angle features leading the vector, for both exercises.
pub const ANGLE_DIMS: usize = 7;

/// Number of coordinate features (20 joints × x, y).
pub const COORD_DIMS: usize = JointId::COUNT * 2;

/// Total feature dimensionality.
pub const FEATURE_DIMS: usize = ANGLE_DIMS + COORD_DIMS;

/// Extract the full feature vector for one frame.
///
/// Returns `None` when keypoints are absent. The angle block occupies
/// `[0, ANGLE_DIMS)` and the coordinate block the remainder.
#[must_use]
pub fn extract_feature_vector(pts: Option<&KeypointSet>, exercise: Exercise) -> Option<Vec<f32>> {
    let pts = pts?;

    let mut features = Vec::with_capacity(FEATURE_DIMS);
    match exercise {
        Exercise::PushUp => push_up_angles(pts, &mut features),
        Exercise::PullUp => pull_up_angles(pts, &mut features),
    }
    debug_assert_eq!(features.len(), ANGLE_DIMS);

    for &[x, y] in pts.coords() {
        features.push(x as f32);
        features.push(y as f32);
    }

    Some(features)
}

/// Push-up angle block: left/right elbow, back line, left/right shoulder
/// abduction (each ÷180), head tilt, and hand offset from the waist line.
fn push_up_angles(pts: &KeypointSet, out: &mut Vec<f32>) {
    let elbow_l = joint_angle(
        pts.get(JointId::LeftShoulder),
        pts.get(JointId::LeftElbow),
        pts.get(JointId::LeftWrist),
    );
    let elbow_r = joint_angle(
        pts.get(JointId::RightShoulder),
        pts.get(JointId::RightElbow),
        pts.get(JointId::RightWrist),
    );
    let back = joint_angle(
        pts.get(JointId::Neck),
        pts.get(JointId::Waist),
        pts.get(JointId::AnkleCenter),
    );
    let abd_l = joint_angle(
        pts.get(JointId::LeftElbow),
        pts.get(JointId::LeftShoulder),
        pts.get(JointId::LeftHip),
    );
    let abd_r = joint_angle(
        pts.get(JointId::RightElbow),
        pts.get(JointId::RightShoulder),
        pts.get(JointId::RightHip),
    );

    let head_tilt = head_tilt(pts);
    let hand_offset =
        (pts.x(JointId::Waist) - pts.pair_x(JointId::LeftWrist, JointId::RightWrist)).abs();

    out.push((elbow_l / 180.0) as f32);
    out.push((elbow_r / 180.0) as f32);
    out.push((back / 180.0) as f32);
    out.push((abd_l / 180.0) as f32);
    out.push((abd_r / 180.0) as f32);
    out.push(head_tilt as f32);
    out.push(hand_offset as f32);
}

/// Pull-up angle block: left/right elbow and back line (÷180), head
/// tilt, shoulder packing, elbow-flare ratio (÷3, capped), and waist x
/// for sway tracking.
fn pull_up_angles(pts: &KeypointSet, out: &mut Vec<f32>) {
    let elbow_l = joint_angle(
        pts.get(JointId::LeftShoulder),
        pts.get(JointId::LeftElbow),
        pts.get(JointId::LeftWrist),
    );
    let elbow_r = joint_angle(
        pts.get(JointId::RightShoulder),
        pts.get(JointId::RightElbow),
        pts.get(JointId::RightWrist),
    );
    let back = joint_angle(
        pts.get(JointId::Neck),
        pts.get(JointId::Waist),
        pts.get(JointId::AnkleCenter),
    );

    let head_tilt = head_tilt(pts);
    let shoulder_packing =
        pts.pair_y(JointId::LeftShoulder, JointId::RightShoulder) - pts.y(JointId::Neck);

    let elbow_dist = point_distance(pts.get(JointId::LeftElbow), pts.get(JointId::RightElbow));
    let shoulder_dist =
        point_distance(pts.get(JointId::LeftShoulder), pts.get(JointId::RightShoulder));
    let elbow_flare = if shoulder_dist > 1e-6 {
        (elbow_dist / shoulder_dist / 3.0).min(1.0)
    } else {
        0.0
    };

    let body_sway = pts.x(JointId::Waist);

    out.push((elbow_l / 180.0) as f32);
    out.push((elbow_r / 180.0) as f32);
    out.push((back / 180.0) as f32);
    out.push(head_tilt as f32);
    out.push(shoulder_packing as f32);
    out.push(elbow_flare as f32);
    out.push(body_sway as f32);
}

fn head_tilt(pts: &KeypointSet) -> f64 {
    let eye_nose_y =
        (pts.pair_y(JointId::LeftEye, JointId::RightEye) + pts.y(JointId::Nose)) / 2.0;
    let ear_y = pts.pair_y(JointId::LeftEar, JointId::RightEar);
    eye_nose_y - ear_y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sloped_pose() -> KeypointSet {
        let mut c = [[0.0, 0.0]; JointId::COUNT];
        for (i, coord) in c.iter_mut().enumerate() {
            *coord = [i as f64 * 0.01, 0.5 - i as f64 * 0.005];
        }
        KeypointSet::from_coords(c)
    }

    #[test]
    fn test_none_propagates() {
        assert!(extract_feature_vector(None, Exercise::PushUp).is_none());
    }

    #[test]
    fn test_dimensions() {
        let pts = sloped_pose();
        for exercise in [Exercise::PushUp, Exercise::PullUp] {
            let vec = extract_feature_vector(Some(&pts), exercise).unwrap();
            assert_eq!(vec.len(), FEATURE_DIMS);
        }
    }

    #[test]
    fn test_coordinates_follow_joint_order() {
        let pts = sloped_pose();
        let vec = extract_feature_vector(Some(&pts), Exercise::PushUp).unwrap();
        for (i, &[x, y]) in pts.coords().iter().enumerate() {
            assert_eq!(vec[ANGLE_DIMS + 2 * i], x as f32);
            assert_eq!(vec[ANGLE_DIMS + 2 * i + 1], y as f32);
        }
    }

    #[test]
    fn test_angle_block_is_unit_scaled() {
        let pts = sloped_pose();
        let vec = extract_feature_vector(Some(&pts), Exercise::PushUp).unwrap();
        // Angles ÷180 land in [0, 1]; tilt/offset are small normalized
        // quantities well inside [-1, 1].
        for &v in &vec[..ANGLE_DIMS] {
            assert!((-1.0..=1.0).contains(&v), "angle feature {v} out of range");
        }
    }

    #[test]
    fn test_degenerate_flare_is_zero() {
        // All joints at the same place: zero shoulder span.
        let pts = KeypointSet::from_coords([[0.3, 0.3]; JointId::COUNT]);
        let vec = extract_feature_vector(Some(&pts), Exercise::PullUp).unwrap();
        assert_eq!(vec[5], 0.0);
    }
}
