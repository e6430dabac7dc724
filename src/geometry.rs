//! Planar geometry primitives for joint measurements.
//!
//! All downstream checks reduce to two operations: the angle subtended at
//! a middle joint and the Euclidean distance between two joints. Both are
//! guarded against degenerate inputs so that a collapsed limb never
//! propagates a division fault.

use nalgebra::Vector2;

/// Legs shorter than this are treated as degenerate.
const DEGENERATE_NORM: f64 = 1e-8;

/// Angle ∠ABC at vertex `b`, in degrees, via the law of cosines.
///
/// Returns 180.0 when either leg is degenerate (near-zero length), which
/// reads as "fully extended" everywhere the angle is consumed.
#[must_use]
pub fn joint_angle(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    let ba = Vector2::new(a[0] - b[0], a[1] - b[1]);
    let bc = Vector2::new(c[0] - b[0], c[1] - b[1]);

    let norm_ba = ba.norm();
    let norm_bc = bc.norm();
    if norm_ba < DEGENERATE_NORM || norm_bc < DEGENERATE_NORM {
        return 180.0;
    }

    let cos = (ba.dot(&bc) / (norm_ba * norm_bc)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Euclidean distance between two points.
#[must_use]
pub fn point_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    Vector2::new(a[0] - b[0], a[1] - b[1]).norm()
}

/// Midpoint of two points.
#[must_use]
pub fn midpoint(a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_right_angle() {
        let angle = joint_angle([1.0, 0.0], [0.0, 0.0], [0.0, 1.0]);
        assert!(approx_eq(angle, 90.0, 1e-9));
    }

    #[test]
    fn test_straight_line() {
        let angle = joint_angle([-1.0, 0.0], [0.0, 0.0], [1.0, 0.0]);
        assert!(approx_eq(angle, 180.0, 1e-9));
    }

    #[test]
    fn test_degenerate_leg_defaults_to_extended() {
        let angle = joint_angle([0.0, 0.0], [0.0, 0.0], [1.0, 1.0]);
        assert!(approx_eq(angle, 180.0, 1e-12));
    }

    #[test]
    fn test_distance() {
        assert!(approx_eq(point_distance([0.0, 0.0], [3.0, 4.0]), 5.0, 1e-12));
    }

    #[test]
    fn test_midpoint() {
        let m = midpoint([0.0, 2.0], [2.0, 4.0]);
        assert!(approx_eq(m[0], 1.0, 1e-12));
        assert!(approx_eq(m[1], 3.0, 1e-12));
    }
}
