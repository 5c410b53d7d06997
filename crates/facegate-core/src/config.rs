use crate::challenge::{ChallengeSource, ChallengeWindow};
use crate::error::CaptureError;
use crate::prompts::{default_prompts, PosePrompt, PromptSchedule};
use std::time::Duration;

/// Parameters of one burst capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Number of ticks in the burst (default 30).
    pub frame_count: usize,
    /// Spacing between ticks (default 100 ms, about 3 s per burst).
    pub frame_interval: Duration,
    /// Ticks the challenge may fall on (default 12..=18).
    pub challenge_window: ChallengeWindow,
    /// Fewest frames a burst may have and still be submitted (default 8).
    pub min_frames: usize,
    /// Longest a single grab may take before its tick counts as missed.
    /// At most `frame_interval`, so slow grabs cannot stretch the burst.
    pub grab_timeout: Duration,
    pub prompts: Vec<PosePrompt>,
    /// Spoken and shown on the challenge tick.
    pub challenge_prompt: String,
    pub success_prompt: String,
    pub failure_prompt: String,
    /// Locale handed to the voice sink, e.g. `hi-IN`.
    pub locale: String,
    pub challenge_source: ChallengeSource,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let frame_interval = Duration::from_millis(100);
        Self {
            frame_count: 30,
            frame_interval,
            challenge_window: ChallengeWindow::default(),
            min_frames: 8,
            grab_timeout: frame_interval,
            prompts: default_prompts(),
            challenge_prompt: "Blink now".to_string(),
            success_prompt: "Attendance recorded".to_string(),
            failure_prompt: "Verification failed, please try again".to_string(),
            locale: "en-IN".to_string(),
            challenge_source: ChallengeSource::Os,
        }
    }
}

impl CaptureConfig {
    /// Check internal consistency and lay the prompts out on the tick timeline.
    pub fn schedule(&self) -> Result<PromptSchedule, CaptureError> {
        if self.frame_count == 0 {
            return Err(CaptureError::InvalidConfig("frame_count must be positive".into()));
        }
        if self.frame_interval.is_zero() {
            return Err(CaptureError::InvalidConfig("frame_interval must be positive".into()));
        }
        if self.grab_timeout.is_zero() {
            return Err(CaptureError::InvalidConfig("grab_timeout must be positive".into()));
        }
        if self.grab_timeout > self.frame_interval {
            return Err(CaptureError::InvalidConfig(format!(
                "grab_timeout {:?} exceeds frame_interval {:?}",
                self.grab_timeout, self.frame_interval
            )));
        }
        if self.min_frames == 0 || self.min_frames > self.frame_count {
            return Err(CaptureError::InvalidConfig(format!(
                "min_frames {} must be within 1..={}",
                self.min_frames, self.frame_count
            )));
        }
        self.challenge_window.validate(self.frame_count)?;
        PromptSchedule::new(self.prompts.clone(), self.frame_count, self.frame_interval)
    }

    /// Nominal length of one burst.
    pub fn capture_window(&self) -> Duration {
        self.frame_interval * self.frame_count as u32
    }
}
