//! Challenge-frame selection and remapping.
//!
//! Each burst carries one challenge tick: the moment the subject is told to
//! blink or turn their head. The verifier checks that the action shows up
//! near that frame, which a pre-recorded replay cannot anticipate as long as
//! the tick is unpredictable.

use crate::error::CaptureError;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Inclusive tick range the challenge is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeWindow {
    pub first: usize,
    pub last: usize,
}

impl ChallengeWindow {
    pub fn new(first: usize, last: usize) -> Self {
        Self { first, last }
    }

    pub fn contains(&self, tick: usize) -> bool {
        (self.first..=self.last).contains(&tick)
    }

    /// The window must be non-empty and lie inside `[0, frame_count)`.
    pub fn validate(&self, frame_count: usize) -> Result<(), CaptureError> {
        if self.first > self.last {
            return Err(CaptureError::InvalidConfig(format!(
                "challenge window {}..={} is empty",
                self.first, self.last
            )));
        }
        if self.last >= frame_count {
            return Err(CaptureError::InvalidConfig(format!(
                "challenge window {}..={} exceeds burst of {frame_count} frames",
                self.first, self.last
            )));
        }
        Ok(())
    }
}

impl Default for ChallengeWindow {
    fn default() -> Self {
        Self { first: 12, last: 18 }
    }
}

/// Where the challenge tick comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChallengeSource {
    /// Uniform draw from the operating system CSPRNG.
    #[default]
    Os,
    /// Deterministic draw; the same seed always yields the same tick.
    Seeded(u64),
    /// Tick chosen by the verifier and handed to the client ahead of capture.
    Issued(usize),
}

impl ChallengeSource {
    /// Pick the challenge tick for a new session.
    pub fn pick(&self, window: ChallengeWindow) -> Result<usize, CaptureError> {
        if window.first > window.last {
            return Err(CaptureError::InvalidConfig("challenge window is empty".into()));
        }
        let range = window.first..=window.last;
        match *self {
            Self::Os => Ok(OsRng.gen_range(range)),
            Self::Seeded(seed) => Ok(StdRng::seed_from_u64(seed).gen_range(range)),
            Self::Issued(tick) if window.contains(tick) => Ok(tick),
            Self::Issued(tick) => Err(CaptureError::InvalidConfig(format!(
                "issued challenge tick {tick} is outside window {}..={}",
                window.first, window.last
            ))),
        }
    }
}

/// Express a challenge tick as an index into the frames actually captured.
///
/// Returns the position of the first captured frame whose tick is at or after
/// `challenge_tick`, or `None` when every frame from the challenge onward was
/// missed. `captured_ticks` must be ascending.
pub fn remap_challenge<I>(challenge_tick: usize, captured_ticks: I) -> Option<usize>
where
    I: IntoIterator<Item = usize>,
{
    captured_ticks
        .into_iter()
        .position(|tick| tick >= challenge_tick)
}
