//! facegate-core — Guided liveness capture protocol.
//!
//! Session model, challenge-frame selection, prompt scheduling and upload
//! packaging. Pure logic: no camera, timer or network access lives here.

pub mod challenge;
pub mod config;
pub mod error;
pub mod payload;
pub mod prompts;
pub mod session;
pub mod types;

pub use challenge::{ChallengeSource, ChallengeWindow};
pub use config::CaptureConfig;
pub use error::{CaptureError, GeoError, SubmissionError};
pub use payload::SubmissionPayload;
pub use prompts::{PosePrompt, PromptCue, PromptSchedule};
pub use session::{CaptureSession, SessionFailure, SessionState};
pub use types::{
    CapturedFrame, CheckAction, GeoFix, SubmitTarget, VerificationResult, VerifierResponse,
};
