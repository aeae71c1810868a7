//! Scripted capture sessions.
//!
//! A script is a JSON Lines file; each line describes what the face detector
//! should report for the next `repeat` frames:
//!
//! ```text
//! {"faces": [{"angle_y": 0.0, "angle_z": 0.0, "left_eye_open": 0.9, "right_eye_open": 0.9}], "repeat": 5}
//! {"faces": [], "repeat": 2}
//! {"error": "model crashed"}
//! {"faces": [{"angle_y": 30.0, "angle_z": 0.0}], "repeat": 5, "latency_ms": 40}
//! ```
//!
//! A step with `"restart": true` resets the session and starts a new attempt
//! before its frames are played. Blank lines and lines starting with `#` are
//! skipped.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use posegate_core::{
    DetectorError, FaceDetector, FaceObservation, Frame, FrameOutcome, LivenessEvent,
    LivenessState, Pose, QualityThresholds,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::engine::spawn_engine;

/// Detector response for a run of frames.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScriptStep {
    pub faces: Vec<FaceObservation>,
    pub error: Option<String>,
    pub restart: bool,
    pub repeat: u32,
    pub latency_ms: u64,
}

impl Default for ScriptStep {
    fn default() -> Self {
        Self {
            faces: Vec::new(),
            error: None,
            restart: false,
            repeat: 1,
            latency_ms: 0,
        }
    }
}

pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("script line {}", i + 1))
        })
        .collect()
}

/// Detector that reports whatever the current script step says.
///
/// The step is shared through a `watch` slot, like the scene in front of a
/// camera: if frames are dropped, the detector still describes the newest one.
pub struct ScriptedDetector {
    scene: watch::Receiver<ScriptStep>,
}

impl ScriptedDetector {
    pub fn new(scene: watch::Receiver<ScriptStep>) -> Self {
        Self { scene }
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(
        &mut self,
        _frame: &Frame,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, DetectorError>> + Send {
        let step = self.scene.borrow().clone();
        async move {
            if step.latency_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.latency_ms)).await;
            }
            match step.error {
                Some(msg) => Err(DetectorError::Failed(msg)),
                None => Ok(step.faces),
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub session_id: String,
    pub finished_at: String,
    pub state: LivenessState,
    pub completion_percentage: u32,
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    pub events_dropped: u64,
    /// SHA-256 of the latest artifact captured for each pose during the replay.
    pub artifacts: BTreeMap<Pose, String>,
}

/// Play `steps` through a fresh engine, printing one JSON line per event.
///
/// Without `pace`, every frame is processed in order. With `pace`, frames are
/// offered to the engine at that interval and stale ones may be dropped.
pub async fn run(
    config: &Config,
    steps: Vec<ScriptStep>,
    frame: Frame,
    pace: Option<Duration>,
) -> Result<ReplaySummary> {
    let (scene_tx, scene_rx) = watch::channel(ScriptStep::default());
    let (engine, events) = spawn_engine(
        config.engine,
        ScriptedDetector::new(scene_rx),
        config.detector_timeout,
        config.session_timeout,
    );
    let printer = tokio::spawn(print_events(events, config.engine.quality));

    engine.start().await?;
    let mut frames_submitted = 0u64;

    'script: for step in steps {
        let repeat = step.repeat.max(1);
        if step.restart {
            engine.reset().await?;
            engine.start().await?;
        }
        scene_tx.send_replace(step);
        for _ in 0..repeat {
            frames_submitted += 1;
            match pace {
                Some(interval) => {
                    engine.submit_frame(frame.clone());
                    tokio::time::sleep(interval).await;
                    if engine.snapshot().await?.state.is_terminal() {
                        break 'script;
                    }
                }
                None => {
                    if engine.process(frame.clone()).await? == FrameOutcome::Ignored {
                        break 'script;
                    }
                }
            }
        }
    }

    let snapshot = engine.snapshot().await?;
    drop(engine);
    let artifacts = printer.await.context("event printer panicked")?;

    tracing::info!(
        state = %snapshot.state,
        frames_submitted,
        frames_dropped = snapshot.frames_dropped,
        events_dropped = snapshot.events_dropped,
        "replay finished"
    );

    Ok(ReplaySummary {
        session_id: uuid::Uuid::new_v4().to_string(),
        finished_at: chrono::Utc::now().to_rfc3339(),
        state: snapshot.state,
        completion_percentage: snapshot.completion_percentage,
        frames_submitted,
        frames_dropped: snapshot.frames_dropped,
        events_dropped: snapshot.events_dropped,
        artifacts,
    })
}

async fn print_events(
    mut events: mpsc::Receiver<LivenessEvent>,
    thresholds: QualityThresholds,
) -> BTreeMap<Pose, String> {
    let mut artifacts = BTreeMap::new();
    while let Some(event) = events.recv().await {
        if let LivenessEvent::AngleCaptured { pose, artifact } = &event {
            artifacts.insert(*pose, sha256_hex(artifact));
        }
        println!("{}", event_to_json(&event, &thresholds));
    }
    artifacts
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// JSON record for an event. Artifacts are reported by size and digest.
pub fn event_to_json(event: &LivenessEvent, thresholds: &QualityThresholds) -> serde_json::Value {
    match event {
        LivenessEvent::StateChanged { state, instruction } => json!({
            "event": "state_changed",
            "state": state,
            "instruction": instruction,
        }),
        LivenessEvent::AngleCaptured { pose, artifact } => json!({
            "event": "angle_captured",
            "pose": pose,
            "bytes": artifact.len(),
            "sha256": sha256_hex(artifact),
        }),
        LivenessEvent::Quality(q) => json!({
            "event": "quality",
            "result": q,
            "quality_percentage": q.quality_percentage(thresholds),
            "error_message": q.error_message(),
        }),
        LivenessEvent::Validation(v) => json!({
            "event": "validation",
            "result": v,
            "validation_score": v.validation_score(),
            "error_message": v.error_message(),
        }),
        LivenessEvent::Result(r) => json!({
            "event": "result",
            "result": r,
            "completion_percentage": r.completion_percentage(),
        }),
        LivenessEvent::Error(message) => json!({
            "event": "error",
            "message": message,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::synthetic_frame;
    use posegate_core::EngineConfig;

    const FULL_SESSION: &str = r#"
# look straight, then left, then right
{"faces": [{"angle_y": 0.0, "angle_z": 0.0, "left_eye_open": 0.9, "right_eye_open": 0.9}], "repeat": 5}
{"faces": [], "repeat": 2}
{"faces": [{"angle_y": 30.0, "angle_z": 0.0}], "repeat": 5}
{"error": "model crashed"}
{"faces": [{"angle_y": -30.0, "angle_z": 0.0}], "repeat": 5}
{"faces": [{"angle_y": 0.0, "angle_z": 0.0}], "repeat": 5}
"#;

    fn config() -> Config {
        Config {
            engine: EngineConfig::default(),
            session_timeout: Duration::from_secs(60),
            detector_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_parse_script_defaults_and_comments() {
        let steps = parse_script(FULL_SESSION).unwrap();
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[0].repeat, 5);
        assert_eq!(steps[3].repeat, 1);
        assert_eq!(steps[3].error.as_deref(), Some("model crashed"));
        assert!(steps[1].faces.is_empty());
    }

    #[test]
    fn test_parse_script_reports_line_number() {
        let err = parse_script("{\"repeat\": 1}\n{not json}\n").unwrap_err();
        assert!(err.to_string().contains("script line 2"));
    }

    #[tokio::test]
    async fn test_replay_completes_full_session() {
        let steps = parse_script(FULL_SESSION).unwrap();
        let summary = run(&config(), steps, synthetic_frame(32, 32), None)
            .await
            .unwrap();
        assert_eq!(summary.state, LivenessState::Completed);
        assert_eq!(summary.completion_percentage, 100);
        assert_eq!(summary.artifacts.len(), 3);
        assert_eq!(summary.artifacts[&Pose::Front].len(), 64);
        // Frames after completion are not submitted.
        assert_eq!(summary.frames_submitted, 5 + 2 + 5 + 1 + 5 + 1);
        assert_eq!(summary.frames_dropped, 0);
    }

    #[tokio::test]
    async fn test_replay_stops_in_left_when_left_is_skipped() {
        let steps = parse_script(
            r#"{"faces": [{"angle_y": 0.0, "angle_z": 0.0}], "repeat": 5}
{"faces": [{"angle_y": -30.0, "angle_z": 0.0}], "repeat": 10}"#,
        )
        .unwrap();
        let summary = run(&config(), steps, synthetic_frame(32, 32), None)
            .await
            .unwrap();
        assert_eq!(summary.state, LivenessState::DetectingLeft);
        assert_eq!(summary.completion_percentage, 33);
        assert_eq!(summary.artifacts.keys().copied().collect::<Vec<_>>(), vec![Pose::Front]);
    }

    #[tokio::test]
    async fn test_restart_step_begins_a_new_attempt() {
        let steps = parse_script(
            r#"{"faces": [{"angle_y": 0.0, "angle_z": 0.0}], "repeat": 5}
{"faces": [{"angle_y": 30.0, "angle_z": 0.0}], "repeat": 3}
{"faces": [{"angle_y": 0.0, "angle_z": 0.0}], "repeat": 4, "restart": true}"#,
        )
        .unwrap();
        let summary = run(&config(), steps, synthetic_frame(16, 16), None)
            .await
            .unwrap();
        assert_eq!(summary.state, LivenessState::DetectingFront);
        assert_eq!(summary.completion_percentage, 0);
        // The printer saw the first attempt's capture before the restart.
        assert!(summary.artifacts.contains_key(&Pose::Front));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_replay_completes() {
        let steps = parse_script(
            r#"{"faces": [{"angle_y": 0.0, "angle_z": 0.0}], "repeat": 5}
{"faces": [{"angle_y": 30.0, "angle_z": 0.0}], "repeat": 5}
{"faces": [{"angle_y": -30.0, "angle_z": 0.0}], "repeat": 5}"#,
        )
        .unwrap();
        let summary = run(
            &config(),
            steps,
            synthetic_frame(16, 16),
            Some(Duration::from_millis(33)),
        )
        .await
        .unwrap();
        assert_eq!(summary.state, LivenessState::Completed);
    }

    #[test]
    fn test_event_json_reports_artifact_digest() {
        let event = LivenessEvent::AngleCaptured {
            pose: Pose::Left,
            artifact: b"abc".to_vec(),
        };
        let value = event_to_json(&event, &QualityThresholds::default());
        assert_eq!(value["event"], "angle_captured");
        assert_eq!(value["pose"], "left");
        assert_eq!(value["bytes"], 3);
        assert_eq!(
            value["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_event_json_for_state_change() {
        let event = LivenessEvent::StateChanged {
            state: LivenessState::DetectingLeft,
            instruction: LivenessState::DetectingLeft.instruction(),
        };
        let value = event_to_json(&event, &QualityThresholds::default());
        assert_eq!(value["state"], "detecting_left");
        assert_eq!(value["instruction"], "Please turn your head to the left");
    }
}
