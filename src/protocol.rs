//! The counting service's wire format.
//!
//! Live sessions speak newline-delimited JSON over a persistent duplex TCP connection ("JSON
//! Lines", UTF-8). The client sends one message per captured frame, plus occasional control
//! messages; the service answers every frame message with a [`PoseUpdate`], in the order the
//! frames arrived. JSON keeps the stream trivial to produce from a mobile client and to inspect
//! with tooling like `jq`.
//!
//! # Messages
//!
//! Inbound (client → service), one JSON object per line:
//!
//! * `{"frame": "data:image/jpeg;base64,…"}` — a captured frame.
//! * `{"control": "reset"}` — clears the session's repetition count. Always acknowledged with a
//!   success update, even when nothing has been counted yet.
//!
//! Outbound (service → client), one [`PoseUpdate`] JSON object per line. The `landmarks` field
//! is omitted entirely when no pose was detected in the frame, so consumers can distinguish
//! "no detection" from "detection with these joints".

use serde::{Deserialize, Serialize};

use crate::angle::AnglePair;
use crate::counter::RepState;
use crate::landmark::{JointIdx, Landmarks};

/// A message received from a capture client.
///
/// Decoded into a tagged variant up front; nothing downstream of this type inspects raw message
/// content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// One captured frame, encoded as a base64 JPEG data URI.
    Frame {
        frame: String,
    },
    Control {
        control: ControlCommand,
    },
}

/// Session control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Reset the repetition count to zero. Idempotent.
    Reset,
}

/// Per-frame result streamed back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseUpdate {
    pub count: u32,
    pub state: RepState,
    /// Omitted when the detector found no pose in the frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub landmarks: Option<LandmarkSet>,
}

/// The arm joints and derived angles shipped with a [`PoseUpdate`].
///
/// Positions are `[x, y]` pairs in the coordinate space of the frame the client sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub right_shoulder: [f32; 2],
    pub right_elbow: [f32; 2],
    pub right_wrist: [f32; 2],
    pub left_shoulder: [f32; 2],
    pub left_elbow: [f32; 2],
    pub left_wrist: [f32; 2],
    pub angle_r: f32,
    pub angle_l: f32,
}

impl LandmarkSet {
    /// Extracts the arm joints from a full landmark set.
    pub fn new(landmarks: &Landmarks, angles: AnglePair) -> Self {
        let pos = |idx: JointIdx| landmarks.get(idx as usize).position();
        Self {
            right_shoulder: pos(JointIdx::RightShoulder),
            right_elbow: pos(JointIdx::RightElbow),
            right_wrist: pos(JointIdx::RightWrist),
            left_shoulder: pos(JointIdx::LeftShoulder),
            left_elbow: pos(JointIdx::LeftElbow),
            left_wrist: pos(JointIdx::LeftWrist),
            angle_r: angles.right,
            angle_l: angles.left,
        }
    }
}
