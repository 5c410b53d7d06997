use thiserror::Error;

/// Failures that end a session before it can be submitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("insufficient frames: captured {captured}, need at least {required}")]
    InsufficientFrames { captured: usize, required: usize },
    #[error("no frame captured at or after challenge tick {tick}")]
    ChallengeFrameLost { tick: usize },
    #[error("capture cancelled")]
    Cancelled,
    #[error("a capture session is already in progress")]
    Busy,
    #[error("invalid capture configuration: {0}")]
    InvalidConfig(String),
    #[error("capture loop terminated unexpectedly: {0}")]
    LoopTerminated(String),
}

impl CaptureError {
    /// Short text suitable for the on-screen status line.
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::CameraUnavailable(_) => "Camera not available. Please check the camera and try again.",
            Self::InsufficientFrames { .. } | Self::ChallengeFrameLost { .. } => {
                "Face not captured clearly. Please try again."
            }
            Self::Cancelled => "Capture cancelled.",
            Self::Busy => "A scan is already running.",
            Self::InvalidConfig(_) | Self::LoopTerminated(_) => "Something went wrong. Please try again.",
        }
    }
}

/// Failures of the single network submission of a captured burst.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("verification request timed out")]
    Timeout,
    #[error("{0}")]
    ServerRejected(String),
    #[error("invalid verifier response: {0}")]
    InvalidResponse(String),
    #[error("invalid submission: {0}")]
    InvalidPayload(String),
    #[error("session is not ready to submit (state: {state})")]
    NotReady { state: &'static str },
}

/// Location acquisition failures. Never fatal to a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("location request timed out")]
    Timeout,
    #[error("location unavailable: {0}")]
    Unavailable(String),
}
