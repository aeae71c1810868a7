//! End-to-end capture scenarios through the public API.

use posegate_core::{
    DetectorError, EngineConfig, FaceObservation, FnDetector, Frame, FrameOutcome,
    LivenessEvent, LivenessMachine, LivenessResult, LivenessState, Pose,
};
use proptest::prelude::*;

fn frame() -> Frame {
    let data = (0..48u32 * 48)
        .map(|i| if (i / 3) % 2 == 0 { 90 } else { 170 })
        .collect();
    Frame::new(data, 48, 48)
}

async fn feed(machine: &mut LivenessMachine, yaw: f32) -> FrameOutcome {
    let mut detector = FnDetector(move |_: &Frame| {
        Ok::<_, DetectorError>(vec![FaceObservation {
            angle_y: yaw,
            left_eye_open: Some(0.95),
            right_eye_open: Some(0.95),
            ..Default::default()
        }])
    });
    machine.process_frame(&frame(), &mut detector).await
}

fn states(events: &[LivenessEvent]) -> Vec<LivenessState> {
    events
        .iter()
        .filter_map(|e| match e {
            LivenessEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn interrupted_front_run_captures_on_tenth_frame() {
    let mut machine = LivenessMachine::new(EngineConfig::default());
    machine.start();

    for i in 1..=4 {
        assert_eq!(
            feed(&mut machine, 0.0).await,
            FrameOutcome::Holding { consecutive: i }
        );
    }
    assert!(!machine.session().is_captured(Pose::Front));

    assert_eq!(feed(&mut machine, 40.0).await, FrameOutcome::Mismatch);
    assert_eq!(machine.session().consecutive_valid_frames(), 0);

    for _ in 6..=9 {
        assert!(!feed(&mut machine, 0.0).await.is_processed());
    }
    assert_eq!(machine.state(), LivenessState::DetectingFront);

    assert_eq!(feed(&mut machine, 0.0).await, FrameOutcome::Captured(Pose::Front));
    assert_eq!(machine.state(), LivenessState::DetectingLeft);
    assert_eq!(machine.session().consecutive_valid_frames(), 0);
}

#[tokio::test]
async fn skipping_left_never_leaves_detecting_left() {
    let mut machine = LivenessMachine::new(EngineConfig::default());
    machine.start();
    for _ in 0..5 {
        feed(&mut machine, 0.0).await;
    }
    for _ in 0..20 {
        assert_eq!(feed(&mut machine, -30.0).await, FrameOutcome::Mismatch);
    }
    assert_eq!(machine.state(), LivenessState::DetectingLeft);
    assert!(!machine.session().is_captured(Pose::Right));
    assert_eq!(machine.completion_percentage(), 33);

    let partial = LivenessResult {
        is_live: false,
        front_captured: true,
        left_captured: false,
        right_captured: true,
        confidence_score: 0.7,
        error_message: None,
    };
    assert_eq!(partial.completion_percentage(), 66);
}

#[tokio::test]
async fn state_changes_follow_the_pose_order() {
    let mut machine = LivenessMachine::new(EngineConfig::default());
    machine.start();
    for yaw in [0.0, 30.0, -30.0] {
        for _ in 0..5 {
            feed(&mut machine, yaw).await;
        }
    }
    assert_eq!(
        states(&machine.drain_events()),
        vec![
            LivenessState::DetectingFront,
            LivenessState::DetectingLeft,
            LivenessState::DetectingRight,
            LivenessState::Completed,
        ]
    );
}

#[tokio::test]
async fn dead_zone_frames_never_capture() {
    let mut machine = LivenessMachine::new(EngineConfig::default());
    machine.start();
    for yaw in [15.0, 17.0, 20.0, -15.0, -20.0].into_iter().cycle().take(50) {
        assert_eq!(feed(&mut machine, yaw).await, FrameOutcome::Mismatch);
    }
    assert_eq!(machine.state(), LivenessState::DetectingFront);
}

proptest! {
    #[test]
    fn any_frame_sequence_visits_states_in_order(yaws in proptest::collection::vec(-60.0f32..60.0, 0..120)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let events = runtime.block_on(async {
            let mut machine = LivenessMachine::new(EngineConfig::default());
            machine.start();
            for yaw in yaws {
                feed(&mut machine, yaw).await;
            }
            machine.drain_events()
        });

        let expected = [
            LivenessState::DetectingFront,
            LivenessState::DetectingLeft,
            LivenessState::DetectingRight,
        ];
        let seen = states(&events);
        for (i, state) in seen.iter().enumerate() {
            if i < expected.len() {
                prop_assert_eq!(*state, expected[i]);
            } else {
                prop_assert!(state.is_terminal());
                prop_assert_eq!(i, expected.len());
            }
        }
    }
}
