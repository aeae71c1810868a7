//! Single-writer liveness engine.
//!
//! One task owns the [`LivenessMachine`] and the face detector. Handles talk
//! to it over channels: commands go through an `mpsc` queue with `oneshot`
//! replies, camera frames through a `watch` slot that only ever holds the
//! latest frame. A frame that arrives while the detector is still busy
//! replaces the pending one instead of queueing behind it.
//!
//! The worker never waits on the event receiver. Per-frame `Quality` and
//! `Validation` events are dropped while the receiver lags; state changes,
//! captures, results and errors are held in a backlog and delivered in order
//! once the receiver catches up.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use posegate_core::{
    DetectorError, EngineConfig, FaceDetector, FaceObservation, Frame, FrameOutcome,
    LivenessEvent, LivenessMachine, LivenessState,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// Capacity of the event channel handed to the host.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Undelivered `Error` events kept past this many are dropped.
const EVENT_BACKLOG_LIMIT: usize = 256;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine task exited")]
    ChannelClosed,
}

/// Read-only view of the session, for progress reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: LivenessState,
    pub completion_percentage: u32,
    pub consecutive_valid_frames: u32,
    /// Frames overwritten in the latest-frame slot before being processed.
    pub frames_dropped: u64,
    /// Events discarded because the receiver was not keeping up.
    pub events_dropped: u64,
}

/// Messages sent from handles to the engine task.
enum EngineRequest {
    Start {
        reply: oneshot::Sender<()>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Process {
        frame: Frame,
        reply: oneshot::Sender<FrameOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

type FrameSlot = Option<(u64, Arc<Frame>)>;

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    frames: Arc<watch::Sender<FrameSlot>>,
}

impl EngineHandle {
    /// Start a new attempt. Arms the session deadline.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Start { reply }).await
    }

    /// Abandon the current attempt and return to idle. Disarms the deadline.
    pub async fn reset(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Reset { reply }).await
    }

    /// Process one frame and wait for its outcome. Frames sent this way are
    /// never dropped; use [`EngineHandle::submit_frame`] for a live camera.
    pub async fn process(&self, frame: Frame) -> Result<FrameOutcome, EngineError> {
        self.request(|reply| EngineRequest::Process { frame, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, EngineError> {
        self.request(|reply| EngineRequest::Snapshot { reply }).await
    }

    /// Offer a live frame without waiting. If the engine has not picked up the
    /// previous frame yet, that frame is discarded.
    pub fn submit_frame(&self, frame: Frame) {
        let frame = Arc::new(frame);
        self.frames.send_modify(|slot| {
            let seq = slot.as_ref().map_or(1, |(seq, _)| seq + 1);
            *slot = Some((seq, frame));
        });
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Bounds every detector call so a stalled model costs one frame, not the session.
pub struct TimeoutDetector<D> {
    inner: D,
    timeout: Duration,
}

impl<D> TimeoutDetector<D> {
    pub fn new(inner: D, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<D: FaceDetector> FaceDetector for TimeoutDetector<D> {
    fn detect(
        &mut self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, DetectorError>> + Send {
        let timeout = self.timeout;
        let detection = self.inner.detect(frame);
        async move {
            match tokio::time::timeout(timeout, detection).await {
                Ok(result) => result,
                Err(_) => Err(DetectorError::Timeout(timeout)),
            }
        }
    }
}

/// Spawn the engine on the current tokio runtime.
///
/// Returns the handle and the receiving end of the event stream. The task
/// exits once every handle has been dropped.
pub fn spawn_engine<D>(
    config: EngineConfig,
    detector: D,
    detector_timeout: Duration,
    session_timeout: Duration,
) -> (EngineHandle, mpsc::Receiver<LivenessEvent>)
where
    D: FaceDetector + 'static,
{
    let (tx, rx) = mpsc::channel::<EngineRequest>(8);
    let (frames_tx, frames_rx) = watch::channel::<FrameSlot>(None);
    let (events_tx, events_rx) = mpsc::channel::<LivenessEvent>(EVENT_CHANNEL_CAPACITY);

    let worker = Worker {
        machine: LivenessMachine::new(config),
        detector: TimeoutDetector::new(detector, detector_timeout),
        events: events_tx,
        backlog: VecDeque::new(),
        events_dropped: 0,
        session_timeout,
        deadline: None,
        last_seq: 0,
        frames_dropped: 0,
    };
    tokio::spawn(worker.run(rx, frames_rx));

    (
        EngineHandle {
            tx,
            frames: Arc::new(frames_tx),
        },
        events_rx,
    )
}

struct Worker<D> {
    machine: LivenessMachine,
    detector: TimeoutDetector<D>,
    events: mpsc::Sender<LivenessEvent>,
    backlog: VecDeque<LivenessEvent>,
    events_dropped: u64,
    session_timeout: Duration,
    deadline: Option<Instant>,
    last_seq: u64,
    frames_dropped: u64,
}

impl<D: FaceDetector> Worker<D> {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<EngineRequest>,
        mut frames: watch::Receiver<FrameSlot>,
    ) {
        tracing::info!("engine task started");
        let mut frames_open = true;

        loop {
            let deadline = self.deadline;
            let events = self.events.clone();
            tokio::select! {
                biased;

                req = rx.recv() => {
                    let Some(req) = req else { break };
                    self.handle(req).await;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    if self.machine.fail("session timed out") {
                        tracing::warn!("engine: session deadline expired");
                    }
                    self.flush_events();
                }
                permit = events.reserve(), if !self.backlog.is_empty() => {
                    match permit {
                        Ok(permit) => {
                            if let Some(event) = self.backlog.pop_front() {
                                permit.send(event);
                            }
                        }
                        Err(_) => self.backlog.clear(),
                    }
                }
                changed = frames.changed(), if frames_open => {
                    if changed.is_err() {
                        frames_open = false;
                        continue;
                    }
                    let latest = frames.borrow_and_update().clone();
                    if let Some((seq, frame)) = latest {
                        self.note_dropped(seq);
                        self.process(&frame).await;
                    }
                }
            }
        }

        // Every handle is gone; deliver what is still held back.
        while let Some(event) = self.backlog.pop_front() {
            if self.events.send(event).await.is_err() {
                break;
            }
        }

        tracing::info!(
            frames_dropped = self.frames_dropped,
            events_dropped = self.events_dropped,
            "engine task exiting"
        );
    }

    async fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Start { reply } => {
                self.machine.start();
                self.deadline = Some(Instant::now() + self.session_timeout);
                self.flush_events();
                let _ = reply.send(());
            }
            EngineRequest::Reset { reply } => {
                self.machine.reset();
                self.deadline = None;
                self.flush_events();
                let _ = reply.send(());
            }
            EngineRequest::Process { frame, reply } => {
                let outcome = self.process(&frame).await;
                let _ = reply.send(outcome);
            }
            EngineRequest::Snapshot { reply } => {
                let session = self.machine.session();
                let _ = reply.send(SessionSnapshot {
                    state: session.state(),
                    completion_percentage: session.completion_percentage(),
                    consecutive_valid_frames: session.consecutive_valid_frames(),
                    frames_dropped: self.frames_dropped,
                    events_dropped: self.events_dropped,
                });
            }
        }
    }

    async fn process(&mut self, frame: &Frame) -> FrameOutcome {
        let outcome = self.machine.process_frame(frame, &mut self.detector).await;
        tracing::debug!(?outcome, state = %self.machine.state(), "engine: frame processed");
        if self.machine.state().is_terminal() {
            self.deadline = None;
        }
        self.flush_events();
        outcome
    }

    fn note_dropped(&mut self, seq: u64) {
        let skipped = seq.saturating_sub(self.last_seq + 1);
        if skipped > 0 {
            tracing::debug!(skipped, "engine: stale frames dropped");
            self.frames_dropped += skipped;
        }
        self.last_seq = seq;
    }

    /// Events are queued before any reply is sent, so a caller that awaited
    /// a command has already had every event it caused queued or backlogged.
    fn flush_events(&mut self) {
        for event in self.machine.drain_events() {
            self.emit(event);
        }
    }

    fn emit(&mut self, event: LivenessEvent) {
        if self.events.is_closed() {
            return;
        }
        // Anything behind the backlog must wait its turn to keep order.
        let event = if self.backlog.is_empty() {
            match self.events.try_send(event) {
                Ok(()) | Err(TrySendError::Closed(_)) => return,
                Err(TrySendError::Full(event)) => event,
            }
        } else {
            event
        };

        match event {
            LivenessEvent::Quality(_) | LivenessEvent::Validation(_) => {
                self.note_event_dropped();
            }
            LivenessEvent::Error(_) if self.backlog.len() >= EVENT_BACKLOG_LIMIT => {
                self.note_event_dropped();
            }
            event => self.backlog.push_back(event),
        }
    }

    fn note_event_dropped(&mut self) {
        if self.events_dropped == 0 {
            tracing::warn!("engine: event receiver is lagging, dropping per-frame events");
        }
        self.events_dropped += 1;
    }
}
