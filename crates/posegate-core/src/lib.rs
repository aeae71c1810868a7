//! posegate-core: real-time capture quality and active liveness checks.
//!
//! Three components, leaf first:
//!
//! - [`QualityScorer`]: blur, brightness and contrast over a luminance
//!   buffer, with consecutive-frame stability gating.
//! - [`FaceValidator`]: stateless verdicts over face-detector output and
//!   per-pose yaw window checks.
//! - [`LivenessMachine`]: drives a session through front, left and right
//!   poses using an injected [`FaceDetector`], and emits a [`LivenessResult`].
//!
//! Camera capture, face landmark extraction, persistence and transport are
//! left to the host.

pub mod config;
pub mod detector;
pub mod frame;
pub mod geometry;
pub mod liveness;
pub mod quality;

pub use config::{ConfigError, EngineConfig, GeometryThresholds, LivenessConfig, QualityThresholds};
pub use detector::{DetectorError, FaceDetector, FnDetector};
pub use frame::{sample_count, Frame, FrameError};
pub use geometry::{
    BoundingBox, FaceIssue, FaceObservation, FaceValidationResult, FaceValidator, Pose,
};
pub use liveness::{
    FrameOutcome, LivenessEvent, LivenessMachine, LivenessResult, LivenessSession, LivenessState,
};
pub use quality::{measure, LuminanceMetrics, QualityIssue, QualityResult, QualityScorer};
