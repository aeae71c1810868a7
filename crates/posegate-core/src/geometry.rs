//! Face geometry validation over face-detector output.
//!
//! The validator never looks at pixels. It maps the detector's per-face
//! head angles and classification probabilities to a verdict, and answers
//! whether a face is inside the yaw window of a requested pose. It holds no
//! state between calls; temporal gating lives in the state machine.
//!
//! Yaw windows with the default thresholds:
//!
//! ```text
//!   RIGHT          dead    FRONT     dead          LEFT
//! (-45, -20)  [-20, -15]  (-15, 15)  [15, 20]   (20, 45)
//! ```
//!
//! The dead zones keep a single noisy frame from satisfying two poses.

use serde::{Deserialize, Serialize};

use crate::config::GeometryThresholds;

/// Axis-aligned face bounding box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// One face as reported by the external detector.
///
/// Probabilities are `None` when the detector did not run classification;
/// they are treated as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    /// Head yaw in degrees. Positive = turned to the subject's left.
    pub angle_y: f32,
    /// Head roll in degrees.
    pub angle_z: f32,
    #[serde(default)]
    pub left_eye_open: Option<f32>,
    #[serde(default)]
    pub right_eye_open: Option<f32>,
    #[serde(default)]
    pub smiling: Option<f32>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Head pose requested during liveness capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pose {
    Front,
    Left,
    Right,
}

impl Pose {
    pub const ALL: [Pose; 3] = [Pose::Front, Pose::Left, Pose::Right];

    pub(crate) fn index(self) -> usize {
        match self {
            Pose::Front => 0,
            Pose::Left => 1,
            Pose::Right => 2,
        }
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Pose::Front => "front",
            Pose::Left => "left",
            Pose::Right => "right",
        })
    }
}

/// Why a set of detections is not a valid capture subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceIssue {
    NoFace,
    MultipleFaces,
    NotFrontal,
    EyesClosed,
}

impl std::fmt::Display for FaceIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NoFace => "No face detected",
            Self::MultipleFaces => {
                "Multiple faces detected. Please make sure only one person is in the frame."
            }
            Self::NotFrontal => "Please look straight at the camera",
            Self::EyesClosed => "Please open your eyes",
        })
    }
}

/// Per-frame verdict on the detector's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceValidationResult {
    pub face_count: usize,
    pub is_frontal: bool,
    pub has_open_eyes: bool,
    pub is_smiling: bool,
    pub head_euler_angle_y: f32,
    pub head_euler_angle_z: f32,
    pub left_eye_open_probability: f32,
    pub right_eye_open_probability: f32,
    pub smiling_probability: f32,
    pub bounding_box: Option<BoundingBox>,
    /// True iff exactly one face, frontal, eyes open.
    pub is_valid: bool,
    /// Highest-priority failing condition.
    pub issue: Option<FaceIssue>,
}

impl FaceValidationResult {
    fn ambiguous(face_count: usize, issue: FaceIssue) -> Self {
        Self {
            face_count,
            is_frontal: false,
            has_open_eyes: false,
            is_smiling: false,
            head_euler_angle_y: 0.0,
            head_euler_angle_z: 0.0,
            left_eye_open_probability: 0.0,
            right_eye_open_probability: 0.0,
            smiling_probability: 0.0,
            bounding_box: None,
            is_valid: false,
            issue: Some(issue),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.issue.map(|i| i.to_string())
    }

    /// Weighted score 0-100: one face 30, frontal 25, eyes open 25,
    /// smiling 10, bounding box present 10.
    pub fn validation_score(&self) -> u32 {
        let mut score = 0;
        if self.face_count == 1 {
            score += 30;
        }
        if self.is_frontal {
            score += 25;
        }
        if self.has_open_eyes {
            score += 25;
        }
        if self.is_smiling {
            score += 10;
        }
        if self.bounding_box.is_some() {
            score += 10;
        }
        score.min(100)
    }

    /// Every failing condition, not just the highest-priority one.
    pub fn issues(&self) -> Vec<FaceIssue> {
        let mut issues = Vec::new();
        if self.face_count == 0 {
            issues.push(FaceIssue::NoFace);
        }
        if self.face_count > 1 {
            issues.push(FaceIssue::MultipleFaces);
        }
        if !self.is_frontal {
            issues.push(FaceIssue::NotFrontal);
        }
        if !self.has_open_eyes {
            issues.push(FaceIssue::EyesClosed);
        }
        issues
    }
}

/// Stateless validator; cheap to copy and safe to share across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaceValidator {
    thresholds: GeometryThresholds,
}

impl FaceValidator {
    pub fn new(thresholds: GeometryThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GeometryThresholds {
        &self.thresholds
    }

    /// Classify one frame's detections. Anything other than exactly one face
    /// is rejected without computing geometry.
    pub fn validate(&self, faces: &[FaceObservation]) -> FaceValidationResult {
        let face = match faces {
            [] => return FaceValidationResult::ambiguous(0, FaceIssue::NoFace),
            [face] => face,
            _ => return FaceValidationResult::ambiguous(faces.len(), FaceIssue::MultipleFaces),
        };

        let t = &self.thresholds;
        let is_frontal = face.angle_y.abs() < t.frontal_angle && face.angle_z.abs() < t.frontal_angle;

        let left_eye = face.left_eye_open.unwrap_or(0.0);
        let right_eye = face.right_eye_open.unwrap_or(0.0);
        let has_open_eyes = left_eye > t.eye_open && right_eye > t.eye_open;

        let smiling = face.smiling.unwrap_or(0.0);
        let is_smiling = smiling > t.smile;

        let issue = if !is_frontal {
            Some(FaceIssue::NotFrontal)
        } else if !has_open_eyes {
            Some(FaceIssue::EyesClosed)
        } else {
            None
        };

        FaceValidationResult {
            face_count: 1,
            is_frontal,
            has_open_eyes,
            is_smiling,
            head_euler_angle_y: face.angle_y,
            head_euler_angle_z: face.angle_z,
            left_eye_open_probability: left_eye,
            right_eye_open_probability: right_eye,
            smiling_probability: smiling,
            bounding_box: face.bounding_box,
            is_valid: is_frontal && has_open_eyes,
            issue,
        }
    }

    /// Whether `face` is inside the yaw window for `target`. Only yaw is
    /// considered; FRONT uses the frontal window, LEFT and RIGHT the
    /// mirrored side windows, all bounds exclusive.
    pub fn matches_target_pose(&self, face: &FaceObservation, target: Pose) -> bool {
        let t = &self.thresholds;
        let yaw = face.angle_y;
        match target {
            Pose::Front => yaw.abs() < t.frontal_angle,
            Pose::Left => yaw > t.side_angle_min && yaw < t.side_angle_max,
            Pose::Right => yaw < -t.side_angle_min && yaw > -t.side_angle_max,
        }
    }
}
