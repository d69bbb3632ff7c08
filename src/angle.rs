//! Joint angle computation.

use nalgebra::Point2;

/// Angle reported for degenerate joint configurations (coincident landmark points).
///
/// A fully extended arm reads close to 180°, so treating a degenerate triple as "extended" keeps
/// the counting state machine from reacting to a single glitched frame.
pub const DEGENERATE_ANGLE: f32 = 180.0;

/// Computes the angle at `b` between the segments `b`→`a` and `b`→`c`, in degrees.
///
/// For the elbow angle, `a` is the shoulder, `b` the elbow and `c` the wrist. The result is always
/// in `[0, 180]` and symmetric in `a` and `c`. If either segment has near-zero length, the
/// [`DEGENERATE_ANGLE`] sentinel is returned instead of NaN.
pub fn joint_angle(a: Point2<f32>, b: Point2<f32>, c: Point2<f32>) -> f32 {
    let ba = a - b;
    let bc = c - b;
    let len = ba.norm() * bc.norm();
    if len <= f32::EPSILON {
        return DEGENERATE_ANGLE;
    }

    // Floating point can push the quotient slightly past ±1, which would make `acos` return NaN.
    let cos = (ba.dot(&bc) / len).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// The elbow angles of both arms, derived from a single frame's landmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnglePair {
    /// Right arm shoulder–elbow–wrist angle in degrees.
    pub right: f32,
    /// Left arm shoulder–elbow–wrist angle in degrees.
    pub left: f32,
}

impl AnglePair {
    pub fn new(right: f32, left: f32) -> Self {
        Self { right, left }
    }

    /// Returns whether *both* arms are contracted below `threshold`.
    pub fn both_below(&self, threshold: f32) -> bool {
        self.right < threshold && self.left < threshold
    }

    /// Returns whether *both* arms are extended above `threshold`.
    pub fn both_above(&self, threshold: f32) -> bool {
        self.right > threshold && self.left > threshold
    }
}
