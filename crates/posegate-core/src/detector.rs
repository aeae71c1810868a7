//! Contract for the external face-detection collaborator.
//!
//! The core never computes landmarks or head pose. A detector is injected
//! per call into [`crate::LivenessMachine::process_frame`]; the machine only
//! suspends at that call and applies the outcome once it resolves.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::frame::Frame;
use crate::geometry::FaceObservation;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("face detection failed: {0}")]
    Failed(String),
    #[error("face detection timed out after {0:?}")]
    Timeout(Duration),
    #[error("face detector unavailable")]
    Unavailable,
}

/// Asynchronous face detection over one frame.
///
/// Implementations may keep tracking state between frames, hence `&mut self`.
/// A call must complete or fail within bounded time; callers that cannot
/// guarantee that should wrap it in a timeout and report
/// [`DetectorError::Timeout`].
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, DetectorError>> + Send;
}

/// Adapter turning a synchronous closure into a [`FaceDetector`].
pub struct FnDetector<F>(pub F);

impl<F> FaceDetector for FnDetector<F>
where
    F: FnMut(&Frame) -> Result<Vec<FaceObservation>, DetectorError> + Send,
{
    fn detect(
        &mut self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, DetectorError>> + Send {
        std::future::ready((self.0)(frame))
    }
}
