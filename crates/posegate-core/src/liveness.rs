//! Active liveness detection via a guided front/left/right pose sequence.
//!
//! A printed photograph or a phone held up to the camera can present a
//! convincing frontal face, but it cannot turn its head on request. The
//! session asks the subject to look straight at the camera, then turn left,
//! then right, and only captures a pose once the face has stayed inside that
//! pose's yaw window for several consecutive frames.
//!
//! Transitions are strictly linear:
//!
//! ```text
//! Idle -start-> DetectingFront -> DetectingLeft -> DetectingRight -> Completed | Failed
//! ```
//!
//! # Threat Coverage
//!
//! - **Blocks:** Static printed photos, single-frame glints that happen to
//!   land inside a pose window, photos tilted once toward the camera.
//! - **Does not block:** Video replay of someone performing the same
//!   sequence, 3D masks, or a second person steering a printed face.
//!
//! # Concurrency
//!
//! A machine is single-writer. Frames must be delivered one at a time in
//! arrival order; a host that receives frames faster than the detector runs
//! should drop stale frames rather than queue them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{EngineConfig, LivenessConfig};
use crate::detector::{DetectorError, FaceDetector};
use crate::frame::Frame;
use crate::geometry::{FaceObservation, FaceValidationResult, FaceValidator, Pose};
use crate::quality::{QualityResult, QualityScorer};

/// Session state. Exactly one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    Idle,
    DetectingFront,
    DetectingLeft,
    DetectingRight,
    Completed,
    Failed,
}

impl LivenessState {
    /// The pose this state is waiting for, if any.
    pub fn target_pose(self) -> Option<Pose> {
        match self {
            Self::DetectingFront => Some(Pose::Front),
            Self::DetectingLeft => Some(Pose::Left),
            Self::DetectingRight => Some(Pose::Right),
            Self::Idle | Self::Completed | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// User-facing instruction for this state.
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Idle => "Get ready",
            Self::DetectingFront => "Please look straight at the camera",
            Self::DetectingLeft => "Please turn your head to the left",
            Self::DetectingRight => "Please turn your head to the right",
            Self::Completed => "Verification succeeded!",
            Self::Failed => "Verification failed. Please try again.",
        }
    }
}

impl std::fmt::Display for LivenessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::DetectingFront => "detecting_front",
            Self::DetectingLeft => "detecting_left",
            Self::DetectingRight => "detecting_right",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Terminal summary, produced once per session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessResult {
    pub is_live: bool,
    pub front_captured: bool,
    pub left_captured: bool,
    pub right_captured: bool,
    /// Sum of the weights of captured poses, 0-1.
    pub confidence_score: f32,
    pub error_message: Option<String>,
}

impl LivenessResult {
    pub fn completion_percentage(&self) -> u32 {
        let count = [self.front_captured, self.left_captured, self.right_captured]
            .iter()
            .filter(|&&c| c)
            .count() as u32;
        count * 100 / 3
    }
}

/// Outbound notifications, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum LivenessEvent {
    StateChanged {
        state: LivenessState,
        instruction: &'static str,
    },
    AngleCaptured {
        pose: Pose,
        artifact: Vec<u8>,
    },
    Quality(QualityResult),
    Validation(FaceValidationResult),
    Result(LivenessResult),
    Error(String),
}

/// What a single `process_frame` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Session idle or terminal; the detector was not called.
    Ignored,
    /// Rejected by the quality gate before detection.
    LowQuality,
    NoFace,
    /// A face was found outside the target pose window.
    Mismatch,
    /// Inside the window, not yet stable long enough.
    Holding { consecutive: u32 },
    Captured(Pose),
    DetectorFailed,
    /// Pose was stable but the artifact could not be encoded.
    CaptureFailed,
}

impl FrameOutcome {
    /// Only a capture counts as a processed frame.
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Captured(_))
    }
}

/// All mutable per-attempt state, in one place.
#[derive(Debug, Clone)]
pub struct LivenessSession {
    state: LivenessState,
    artifacts: [Option<Vec<u8>>; 3],
    consecutive_valid_frames: u32,
}

impl LivenessSession {
    pub fn new() -> Self {
        Self {
            state: LivenessState::Idle,
            artifacts: [None, None, None],
            consecutive_valid_frames: 0,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn is_captured(&self, pose: Pose) -> bool {
        self.artifacts[pose.index()].is_some()
    }

    pub fn artifact(&self, pose: Pose) -> Option<&[u8]> {
        self.artifacts[pose.index()].as_deref()
    }

    pub fn consecutive_valid_frames(&self) -> u32 {
        self.consecutive_valid_frames
    }

    /// `captured poses * 100 / 3`, truncated.
    pub fn completion_percentage(&self) -> u32 {
        let count = Pose::ALL.iter().filter(|&&p| self.is_captured(p)).count() as u32;
        count * 100 / 3
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn result(&self, config: &LivenessConfig, failure: Option<String>) -> LivenessResult {
        let front = self.is_captured(Pose::Front);
        let left = self.is_captured(Pose::Left);
        let right = self.is_captured(Pose::Right);

        let mut confidence = 0.0f32;
        if front {
            confidence += config.front_weight;
        }
        if left {
            confidence += config.left_weight;
        }
        if right {
            confidence += config.right_weight;
        }
        let confidence = confidence.min(1.0);

        // With the default weights a complete session always scores 1.0, so
        // the confidence check only bites under custom weights.
        let is_live =
            failure.is_none() && front && left && right && confidence >= config.min_confidence;

        let error_message = match failure {
            Some(reason) => Some(reason),
            None if !is_live => Some("Unable to verify liveness. Please try again.".to_string()),
            None => None,
        };

        LivenessResult {
            is_live,
            front_captured: front,
            left_captured: left,
            right_captured: right,
            confidence_score: confidence,
            error_message,
        }
    }
}

impl Default for LivenessSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one capture attempt through the pose sequence.
pub struct LivenessMachine {
    config: LivenessConfig,
    validator: FaceValidator,
    scorer: QualityScorer,
    session: LivenessSession,
    events: Vec<LivenessEvent>,
}

impl LivenessMachine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: config.liveness,
            validator: FaceValidator::new(config.geometry),
            scorer: QualityScorer::new(config.quality),
            session: LivenessSession::new(),
            events: Vec::new(),
        }
    }

    pub fn session(&self) -> &LivenessSession {
        &self.session
    }

    pub fn state(&self) -> LivenessState {
        self.session.state
    }

    pub fn completion_percentage(&self) -> u32 {
        self.session.completion_percentage()
    }

    /// Artifacts captured so far, keyed by pose.
    pub fn captured_images(&self) -> BTreeMap<Pose, &[u8]> {
        Pose::ALL
            .into_iter()
            .filter_map(|p| self.session.artifact(p).map(|a| (p, a)))
            .collect()
    }

    /// Take every event emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<LivenessEvent> {
        std::mem::take(&mut self.events)
    }

    /// Begin a new attempt: clear the session and wait for a frontal face.
    pub fn start(&mut self) {
        self.reset();
        self.transition(LivenessState::DetectingFront);
    }

    /// Return to `Idle` with every counter, flag and artifact cleared.
    /// Idempotent; valid from any state.
    pub fn reset(&mut self) {
        if self.session.state != LivenessState::Idle {
            tracing::debug!(from = %self.session.state, "liveness: reset");
        }
        self.session.reset();
        self.scorer.reset();
    }

    /// End an in-progress attempt as `Failed` with the given reason, keeping
    /// whatever poses were already captured. Used by hosts to enforce an
    /// overall session deadline. Returns false if no attempt was in progress.
    pub fn fail(&mut self, reason: &str) -> bool {
        if self.session.state.target_pose().is_none() {
            return false;
        }
        tracing::warn!(state = %self.session.state, reason, "liveness: session failed");
        let result = self.session.result(&self.config, Some(reason.to_string()));
        self.events.push(LivenessEvent::Result(result));
        self.transition(LivenessState::Failed);
        true
    }

    /// Feed one frame. The detector is called at most once, and only while a
    /// pose is being detected.
    pub async fn process_frame<D: FaceDetector>(
        &mut self,
        frame: &Frame,
        detector: &mut D,
    ) -> FrameOutcome {
        if self.session.state.target_pose().is_none() {
            return FrameOutcome::Ignored;
        }

        if self.config.quality_gate {
            let quality = self.scorer.score_frame(frame);
            let ok = quality.is_quality_ok;
            self.events.push(LivenessEvent::Quality(quality));
            if !ok {
                self.session.consecutive_valid_frames = 0;
                return FrameOutcome::LowQuality;
            }
        }

        let detection = detector.detect(frame).await;
        self.apply_detection(frame, detection)
    }

    fn apply_detection(
        &mut self,
        frame: &Frame,
        detection: Result<Vec<FaceObservation>, DetectorError>,
    ) -> FrameOutcome {
        let Some(target) = self.session.state.target_pose() else {
            return FrameOutcome::Ignored;
        };

        let faces = match detection {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, pose = %target, "liveness: detector failed");
                self.session.consecutive_valid_frames = 0;
                self.events.push(LivenessEvent::Error(e.to_string()));
                return FrameOutcome::DetectorFailed;
            }
        };

        self.events
            .push(LivenessEvent::Validation(self.validator.validate(&faces)));

        let Some(face) = faces.first() else {
            self.session.consecutive_valid_frames = 0;
            return FrameOutcome::NoFace;
        };

        if !self.validator.matches_target_pose(face, target) {
            if self.session.consecutive_valid_frames > 0 {
                tracing::debug!(
                    pose = %target,
                    yaw = face.angle_y,
                    run = self.session.consecutive_valid_frames,
                    "liveness: pose lost, run reset"
                );
            }
            self.session.consecutive_valid_frames = 0;
            return FrameOutcome::Mismatch;
        }

        self.session.consecutive_valid_frames += 1;
        let consecutive = self.session.consecutive_valid_frames;
        if consecutive < self.config.required_consecutive_frames {
            tracing::debug!(pose = %target, consecutive, "liveness: holding pose");
            return FrameOutcome::Holding { consecutive };
        }

        self.capture(frame, target)
    }

    fn capture(&mut self, frame: &Frame, pose: Pose) -> FrameOutcome {
        self.session.consecutive_valid_frames = 0;

        let artifact = match frame.encode_jpeg(self.config.artifact_jpeg_quality) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, pose = %pose, "liveness: artifact capture failed");
                self.events.push(LivenessEvent::Error(e.to_string()));
                return FrameOutcome::CaptureFailed;
            }
        };

        tracing::info!(pose = %pose, bytes = artifact.len(), "liveness: pose captured");
        self.session.artifacts[pose.index()] = Some(artifact.clone());
        self.events
            .push(LivenessEvent::AngleCaptured { pose, artifact });
        self.advance();
        FrameOutcome::Captured(pose)
    }

    fn advance(&mut self) {
        match self.session.state {
            LivenessState::DetectingFront => self.transition(LivenessState::DetectingLeft),
            LivenessState::DetectingLeft => self.transition(LivenessState::DetectingRight),
            LivenessState::DetectingRight => {
                let result = self.session.result(&self.config, None);
                let terminal = if result.is_live {
                    LivenessState::Completed
                } else {
                    LivenessState::Failed
                };
                tracing::info!(
                    is_live = result.is_live,
                    confidence = result.confidence_score,
                    "liveness: session finished"
                );
                self.events.push(LivenessEvent::Result(result));
                self.transition(terminal);
            }
            LivenessState::Idle | LivenessState::Completed | LivenessState::Failed => {}
        }
    }

    fn transition(&mut self, state: LivenessState) {
        tracing::info!(from = %self.session.state, to = %state, "liveness: state changed");
        self.session.state = state;
        self.events.push(LivenessEvent::StateChanged {
            state,
            instruction: state.instruction(),
        });
    }
}
