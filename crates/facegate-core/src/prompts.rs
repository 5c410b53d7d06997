//! Pose prompt table and its mapping onto capture ticks.

use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a prompt is delivered to the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptCue {
    /// On-screen text only.
    Status,
    /// On-screen text and spoken aloud.
    Voice,
}

/// One entry of the prompt table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosePrompt {
    pub text: String,
    pub cue: PromptCue,
    pub duration_ms: u64,
}

impl PosePrompt {
    pub fn new(text: impl Into<String>, cue: PromptCue, duration_ms: u64) -> Self {
        Self {
            text: text.into(),
            cue,
            duration_ms,
        }
    }
}

/// Prompt table used when none is configured. At 100 ms per tick the prompts
/// switch on ticks 0, 5 and 20.
pub fn default_prompts() -> Vec<PosePrompt> {
    vec![
        PosePrompt::new("Verifying, look at the camera", PromptCue::Status, 500),
        PosePrompt::new("Get ready to blink", PromptCue::Voice, 1500),
        PosePrompt::new("Hold steady", PromptCue::Status, 1000),
    ]
}

/// A prompt table laid out on the tick timeline of one burst.
#[derive(Debug, Clone)]
pub struct PromptSchedule {
    prompts: Vec<PosePrompt>,
    /// Cumulative end offset (exclusive, ms) of each prompt.
    ends_ms: Vec<u64>,
    interval_ms: u64,
}

impl PromptSchedule {
    /// Build the schedule, rejecting tables that leave part of the burst uncovered.
    pub fn new(
        prompts: Vec<PosePrompt>,
        frame_count: usize,
        frame_interval: Duration,
    ) -> Result<Self, CaptureError> {
        let interval_ms = frame_interval.as_millis() as u64;
        let window_ms = interval_ms * frame_count as u64;

        let mut ends_ms = Vec::with_capacity(prompts.len());
        let mut total = 0u64;
        for prompt in &prompts {
            total += prompt.duration_ms;
            ends_ms.push(total);
        }

        if total < window_ms {
            return Err(CaptureError::InvalidConfig(format!(
                "prompt durations cover {total} ms of a {window_ms} ms burst"
            )));
        }

        Ok(Self {
            prompts,
            ends_ms,
            interval_ms,
        })
    }

    /// Index and prompt active at `tick`, i.e. the entry whose cumulative
    /// window contains `tick * frame_interval`.
    pub fn prompt_at(&self, tick: usize) -> Option<(usize, &PosePrompt)> {
        let at = tick as u64 * self.interval_ms;
        let idx = self.ends_ms.iter().position(|&end| at < end)?;
        Some((idx, &self.prompts[idx]))
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}
