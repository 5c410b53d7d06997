//! Capture session state machine.
//!
//! ```text
//! Idle -> Capturing -> (Failed | Cancelled | ReadyToSubmit) -> Uploading -> (Succeeded | Failed)
//! ```
//!
//! Frame buffers are released as soon as a session reaches a terminal state;
//! a burst is never submitted twice.

use crate::challenge::remap_challenge;
use crate::error::{CaptureError, SubmissionError};
use crate::types::{CapturedFrame, VerificationResult};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    Capture(CaptureError),
    Submission(SubmissionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    ReadyToSubmit,
    Uploading,
    Succeeded,
    Failed(SessionFailure),
    Cancelled,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::ReadyToSubmit => "ready",
            Self::Uploading => "uploading",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Cancelled)
    }

    fn allows(&self, next: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Capturing)
                | (Capturing, ReadyToSubmit)
                | (Capturing, Failed(_))
                | (Capturing, Cancelled)
                | (ReadyToSubmit, Uploading)
                | (Uploading, Succeeded)
                | (Uploading, Failed(_))
        )
    }
}

/// A prompt shown or spoken during capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptLogEntry {
    pub tick: usize,
    pub text: String,
}

/// One attempt to acquire and submit a verified face burst.
#[derive(Debug)]
pub struct CaptureSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    frame_count: usize,
    challenge_tick: usize,
    challenge_frame_index: Option<usize>,
    frames: Vec<CapturedFrame>,
    missed_ticks: Vec<usize>,
    prompt_log: Vec<PromptLogEntry>,
    state: SessionState,
}

impl CaptureSession {
    pub fn new(frame_count: usize, challenge_tick: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            frame_count,
            challenge_tick,
            challenge_frame_index: None,
            frames: Vec::with_capacity(frame_count),
            missed_ticks: Vec::new(),
            prompt_log: Vec::new(),
            state: SessionState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Captured frames in acquisition order. Empty once the session is terminal.
    pub fn frames(&self) -> &[CapturedFrame] {
        &self.frames
    }

    /// Challenge tick drawn at session start, on the raw tick timeline.
    pub fn challenge_tick(&self) -> usize {
        self.challenge_tick
    }

    /// Challenge position within [`frames`](Self::frames); set once capture completes.
    pub fn challenge_frame_index(&self) -> Option<usize> {
        self.challenge_frame_index
    }

    pub fn missed_ticks(&self) -> &[usize] {
        &self.missed_ticks
    }

    pub fn prompt_log(&self) -> &[PromptLogEntry] {
        &self.prompt_log
    }

    pub fn begin_capture(&mut self) -> bool {
        self.transition(SessionState::Capturing)
    }

    pub fn record_frame(&mut self, frame: CapturedFrame) {
        debug_assert!(self.frames.last().map_or(true, |f| f.tick < frame.tick));
        self.frames.push(frame);
    }

    pub fn record_miss(&mut self, tick: usize) {
        self.missed_ticks.push(tick);
    }

    pub fn log_prompt(&mut self, tick: usize, text: impl Into<String>) {
        self.prompt_log.push(PromptLogEntry {
            tick,
            text: text.into(),
        });
    }

    /// Close the capture phase: enforce the frame minimum and remap the
    /// challenge onto the captured sequence.
    pub fn complete_capture(&mut self, min_frames: usize) -> Result<(), CaptureError> {
        if self.frames.len() < min_frames {
            let err = CaptureError::InsufficientFrames {
                captured: self.frames.len(),
                required: min_frames,
            };
            self.fail_capture(err.clone());
            return Err(err);
        }

        let Some(index) = remap_challenge(self.challenge_tick, self.frames.iter().map(|f| f.tick))
        else {
            let err = CaptureError::ChallengeFrameLost {
                tick: self.challenge_tick,
            };
            self.fail_capture(err.clone());
            return Err(err);
        };

        if index != self.challenge_tick {
            tracing::debug!(
                session = %self.id,
                challenge_tick = self.challenge_tick,
                challenge_frame = index,
                "challenge remapped past missed ticks"
            );
        }
        self.challenge_frame_index = Some(index);
        self.transition(SessionState::ReadyToSubmit);
        Ok(())
    }

    pub fn fail_capture(&mut self, err: CaptureError) {
        self.transition(SessionState::Failed(SessionFailure::Capture(err)));
    }

    pub fn cancel(&mut self) {
        self.transition(SessionState::Cancelled);
    }

    /// Enter `Uploading` and hand over the frames and challenge index.
    pub fn begin_upload(&mut self) -> Result<(Vec<CapturedFrame>, usize), SubmissionError> {
        let not_ready = SubmissionError::NotReady {
            state: self.state.name(),
        };
        if self.state != SessionState::ReadyToSubmit {
            return Err(not_ready);
        }
        let index = self.challenge_frame_index.ok_or(not_ready)?;
        self.transition(SessionState::Uploading);
        Ok((std::mem::take(&mut self.frames), index))
    }

    pub fn finish_upload(&mut self, outcome: &Result<VerificationResult, SubmissionError>) {
        let next = match outcome {
            Ok(_) => SessionState::Succeeded,
            Err(e) => SessionState::Failed(SessionFailure::Submission(e.clone())),
        };
        self.transition(next);
    }

    fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.allows(&next) {
            tracing::warn!(
                session = %self.id,
                from = self.state.name(),
                to = next.name(),
                "ignoring invalid session transition"
            );
            return false;
        }
        tracing::debug!(session = %self.id, from = self.state.name(), to = next.name(), "session transition");
        self.state = next;
        if self.state.is_terminal() {
            self.frames = Vec::new();
        }
        true
    }
}
