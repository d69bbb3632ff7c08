//! Body landmark data model.
//!
//! Landmarks are produced once per frame by a [`PoseEstimator`] and are not persisted beyond the
//! processing of that frame.
//!
//! [`PoseEstimator`]: crate::detector::PoseEstimator

use nalgebra::{point, Point2};

use crate::angle::{joint_angle, AnglePair};

type Position = [f32; 2];

/// A collection of 2D body landmarks, one per tracked joint.
#[derive(Debug, Clone)]
pub struct Landmarks {
    positions: Box<[Position]>,
}

impl Landmarks {
    /// Creates a new [`Landmarks`] collection containing `len` preallocated landmarks.
    ///
    /// All landmarks will start with all coordinates at `0.0`.
    pub fn new(len: usize) -> Self {
        Self {
            positions: vec![[0.0, 0.0]; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Landmark> + Clone + '_ {
        (0..self.positions.len()).map(|i| self.get(i))
    }

    pub fn get(&self, index: usize) -> Landmark {
        Landmark::new(self.positions[index])
    }

    pub fn set(&mut self, index: usize, landmark: Landmark) {
        self.positions[index] = landmark.pos;
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Position] {
        &mut self.positions
    }

    /// Applies `f` to every landmark position, in place.
    ///
    /// Used to map normalized network outputs back into frame pixel coordinates.
    pub fn map_positions(&mut self, mut f: impl FnMut(Position) -> Position) {
        for pos in self.positions_mut() {
            *pos = f(*pos);
        }
    }
}

/// A single body landmark in image pixel space.
#[derive(Debug, PartialEq, PartialOrd, Clone, Copy)]
pub struct Landmark {
    pos: Position,
}

impl Landmark {
    pub fn new(position: Position) -> Self {
        Self { pos: position }
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.pos
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.pos[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.pos[1]
    }

    pub fn point(&self) -> Point2<f32> {
        point![self.pos[0], self.pos[1]]
    }
}

/// Assigns a name to the landmark indices produced by MediaPipe-style pose networks.
///
/// "Left" and "Right" are from the PoV of the depicted person, not of the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointIdx {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

/// Number of landmarks a pose network predicts ([`JointIdx`] indexes into this set).
pub const NUM_JOINTS: usize = 33;

/// Computes the shoulder–elbow–wrist angle of both arms.
///
/// Returns [`None`] if `landmarks` does not cover the arm joints (a detector producing a partial
/// landmark set is treated the same as a frame without a detection).
pub fn arm_angles(landmarks: &Landmarks) -> Option<AnglePair> {
    use JointIdx::*;

    if landmarks.len() <= RightWrist as usize {
        return None;
    }

    let arm = |shoulder: JointIdx, elbow: JointIdx, wrist: JointIdx| {
        joint_angle(
            landmarks.get(shoulder as usize).point(),
            landmarks.get(elbow as usize).point(),
            landmarks.get(wrist as usize).point(),
        )
    };

    Some(AnglePair::new(
        arm(RightShoulder, RightElbow, RightWrist),
        arm(LeftShoulder, LeftElbow, LeftWrist),
    ))
}


#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn synthetic_arm_angles() {
        for expected in [30.0, 85.0, 120.0, 170.0] {
            let pair = arm_angles(&test_support::arms_at(expected)).unwrap();
            assert_relative_eq!(pair.right, expected, epsilon = 0.1);
            assert_relative_eq!(pair.left, expected, epsilon = 0.1);
        }
    }

    #[test]
    fn partial_landmark_set_is_no_detection() {
        let lms = Landmarks::new(5);
        assert!(arm_angles(&lms).is_none());
    }
}
