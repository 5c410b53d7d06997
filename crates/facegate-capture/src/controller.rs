use crate::camera::CameraHandle;
use crate::geo::GeoTracker;
use crate::sinks::{LogStatus, SilentVoice, StatusSink, VoicePrompt};
use crate::verifier::Verifier;
use facegate_core::payload::SubmissionPayload;
use facegate_core::{
    CaptureConfig, CaptureError, CaptureSession, CapturedFrame, PromptCue, PromptSchedule,
    SessionFailure, SessionState, SubmissionError, SubmitTarget, VerificationResult,
};
use facegate_hw::SourceError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What to do when a session is started while another is still capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Refuse the new session with [`CaptureError::Busy`].
    #[default]
    Reject,
    /// Cancel the running session and wait for it to release the camera.
    CancelPrevious,
}

/// Prompt outputs shared by a controller and its capture loops.
#[derive(Clone)]
struct Prompter {
    voice: Arc<dyn VoicePrompt>,
    status: Arc<dyn StatusSink>,
}

impl Prompter {
    fn status(&self, text: &str) {
        self.status.status(text);
    }

    fn cue(&self, text: &str, cue: PromptCue, locale: &str) {
        self.status.status(text);
        if cue == PromptCue::Voice {
            self.voice.speak(text, locale);
        }
    }
}

/// Drives the guided liveness capture and submits the result.
///
/// Owns the camera handle; at most one capture loop reads from it at a time.
pub struct CaptureController {
    camera: Arc<AsyncMutex<CameraHandle>>,
    verifier: Arc<dyn Verifier>,
    config: CaptureConfig,
    overlap: OverlapPolicy,
    prompter: Prompter,
    geo: Option<GeoTracker>,
    submit_timeout: Duration,
    active: Arc<Mutex<Option<(Uuid, CancellationToken)>>>,
}

impl CaptureController {
    pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(45);

    pub fn new(camera: CameraHandle, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            camera: Arc::new(AsyncMutex::new(camera)),
            verifier,
            config: CaptureConfig::default(),
            overlap: OverlapPolicy::default(),
            prompter: Prompter {
                voice: Arc::new(SilentVoice),
                status: Arc::new(LogStatus),
            },
            geo: None,
            submit_timeout: Self::DEFAULT_SUBMIT_TIMEOUT,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_voice(mut self, voice: Arc<dyn VoicePrompt>) -> Self {
        self.prompter.voice = voice;
        self
    }

    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.prompter.status = status;
        self
    }

    pub fn with_geo(mut self, geo: GeoTracker) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Start a session with the controller's configuration.
    pub async fn start_session(&self) -> Result<CaptureSessionHandle, CaptureError> {
        self.start_session_with(self.config.clone()).await
    }

    /// Start a capture burst in the background and return a handle to it.
    pub async fn start_session_with(
        &self,
        config: CaptureConfig,
    ) -> Result<CaptureSessionHandle, CaptureError> {
        let schedule = config.schedule()?;
        let challenge_tick = config.challenge_source.pick(config.challenge_window)?;

        let camera = match self.overlap {
            OverlapPolicy::Reject => self
                .camera
                .clone()
                .try_lock_owned()
                .map_err(|_| CaptureError::Busy)?,
            OverlapPolicy::CancelPrevious => {
                let previous = self.active_slot().take();
                if let Some((id, token)) = previous {
                    tracing::info!(session = %id, "cancelling previous session");
                    token.cancel();
                }
                self.camera.clone().lock_owned().await
            }
        };

        let session = CaptureSession::new(config.frame_count, challenge_tick);
        let id = session.id();
        let token = CancellationToken::new();
        *self.active_slot() = Some((id, token.clone()));

        if let Some(geo) = &self.geo {
            geo.refresh();
        }

        tracing::info!(
            session = %id,
            frames = config.frame_count,
            interval_ms = config.frame_interval.as_millis() as u64,
            "capture session started"
        );

        let capture = CaptureLoop {
            camera,
            session,
            config,
            schedule,
            prompter: self.prompter.clone(),
            token: token.clone(),
            active: self.active.clone(),
        };
        let task = tokio::spawn(capture.run());

        Ok(CaptureSessionHandle {
            id,
            challenge_tick,
            token,
            task,
        })
    }

    /// Submit a captured burst once. The session ends `Succeeded` or `Failed`
    /// and its frames are released either way; a retry needs a new session.
    pub async fn submit(
        &self,
        session: &mut CaptureSession,
        target: &SubmitTarget,
    ) -> Result<VerificationResult, SubmissionError> {
        let (frames, challenge_frame) = session.begin_upload()?;

        let geo = self.geo.as_ref().and_then(GeoTracker::current);
        if geo.is_none() {
            tracing::debug!(session = %session.id(), "no location fix; submitting without one");
        }

        self.prompter.status("Verifying your identity...");
        let outcome = match SubmissionPayload::build(frames, challenge_frame, target, geo) {
            Ok(payload) => {
                tracing::info!(
                    session = %session.id(),
                    action = target.action.name(),
                    verifier = self.verifier.name(),
                    frames = payload.frame_parts(),
                    challenge_frame,
                    "uploading burst"
                );
                match tokio::time::timeout(self.submit_timeout, self.verifier.submit(payload)).await {
                    Ok(response) => response.and_then(|r| r.into_result()),
                    Err(_) => Err(SubmissionError::Timeout),
                }
            }
            Err(e) => Err(e),
        };

        session.finish_upload(&outcome);

        match &outcome {
            Ok(result) => {
                tracing::info!(
                    session = %session.id(),
                    trip_id = ?result.trip_id,
                    next_step = ?result.next_step,
                    "verification succeeded"
                );
                let text = result.message.as_deref().unwrap_or(&self.config.success_prompt);
                self.prompter.status(text);
                self.prompter
                    .voice
                    .speak(&self.config.success_prompt, &self.config.locale);
            }
            Err(e) => {
                tracing::warn!(session = %session.id(), error = %e, "verification failed");
                self.prompter.status(&e.to_string());
                self.prompter
                    .voice
                    .speak(&self.config.failure_prompt, &self.config.locale);
            }
        }

        outcome
    }

    fn active_slot(&self) -> std::sync::MutexGuard<'_, Option<(Uuid, CancellationToken)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a capture burst running in the background.
pub struct CaptureSessionHandle {
    id: Uuid,
    challenge_tick: usize,
    token: CancellationToken,
    task: JoinHandle<CaptureSession>,
}

impl CaptureSessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn challenge_tick(&self) -> usize {
        self.challenge_tick
    }

    /// Stop the burst at the next opportunity. Nothing is submitted.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token that cancels this session when triggered, for wiring to UI events.
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the burst to end and return the session in whatever state it reached.
    pub async fn join(self) -> Result<CaptureSession, CaptureError> {
        self.task
            .await
            .map_err(|e| CaptureError::LoopTerminated(e.to_string()))
    }

    /// Wait for the burst and return it only if it is ready to submit.
    pub async fn finish(self) -> Result<CaptureSession, CaptureError> {
        let session = self.join().await?;
        match session.state() {
            SessionState::ReadyToSubmit => Ok(session),
            SessionState::Failed(SessionFailure::Capture(e)) => Err(e.clone()),
            SessionState::Cancelled => Err(CaptureError::Cancelled),
            other => Err(CaptureError::LoopTerminated(format!(
                "capture ended in state {}",
                other.name()
            ))),
        }
    }
}

/// Everything one capture burst needs, moved onto its task.
struct CaptureLoop {
    camera: OwnedMutexGuard<CameraHandle>,
    session: CaptureSession,
    config: CaptureConfig,
    schedule: PromptSchedule,
    prompter: Prompter,
    token: CancellationToken,
    active: Arc<Mutex<Option<(Uuid, CancellationToken)>>>,
}

impl CaptureLoop {
    async fn run(mut self) -> CaptureSession {
        self.capture().await;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|(id, _)| *id == self.session.id()) {
            *active = None;
        }
        drop(active);

        tracing::info!(
            session = %self.session.id(),
            state = self.session.state().name(),
            captured = self.session.frames().len(),
            missed = self.session.missed_ticks().len(),
            challenge_frame = ?self.session.challenge_frame_index(),
            "capture finished"
        );
        self.session
    }

    async fn capture(&mut self) {
        let id = self.session.id();
        let frame_count = self.config.frame_count;
        let challenge_tick = self.session.challenge_tick();
        self.session.begin_capture();

        // Ticks are anchored to the start instant; a slow tick is followed by
        // back-to-back ticks rather than shifting the rest of the burst.
        let mut ticker = tokio::time::interval(self.config.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut active_prompt = None;

        for tick in 0..frame_count {
            let scheduled = tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.cancelled(tick),
                at = ticker.tick() => at,
            };

            if let Some((idx, prompt)) = self.schedule.prompt_at(tick) {
                if active_prompt != Some(idx) {
                    active_prompt = Some(idx);
                    let (text, cue) = (prompt.text.clone(), prompt.cue);
                    self.prompter.cue(&text, cue, &self.config.locale);
                    self.session.log_prompt(tick, text);
                }
            }
            if tick == challenge_tick {
                let text = self.config.challenge_prompt.clone();
                self.prompter.cue(&text, PromptCue::Voice, &self.config.locale);
                self.session.log_prompt(tick, text);
            }

            // A grab never runs into the next tick's slot, even when the
            // loop is catching up after a slow camera.
            let deadline = (scheduled + self.config.frame_interval)
                .min(Instant::now() + self.config.grab_timeout);
            let grabbed = tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.cancelled(tick),
                r = tokio::time::timeout_at(deadline, self.camera.grab()) => r,
            };

            match grabbed {
                Ok(Ok(Some(image))) => self.session.record_frame(CapturedFrame {
                    data: image.data,
                    content_type: image.content_type.to_string(),
                    tick,
                }),
                Ok(Ok(None)) => {
                    tracing::debug!(session = %id, tick, "no frame this tick");
                    self.session.record_miss(tick);
                }
                Ok(Err(SourceError::Transient(e))) => {
                    tracing::warn!(session = %id, tick, error = %e, "frame grab failed; skipping tick");
                    self.session.record_miss(tick);
                }
                Ok(Err(SourceError::Disconnected(e))) => {
                    tracing::error!(session = %id, tick, error = %e, "camera lost during capture");
                    let err = CaptureError::CameraUnavailable(e);
                    self.prompter.status(err.status_text());
                    self.session.fail_capture(err);
                    return;
                }
                Err(_) => {
                    tracing::warn!(
                        session = %id,
                        tick,
                        "frame grab over budget; skipping tick"
                    );
                    self.session.record_miss(tick);
                }
            }

            self.prompter.status(&format!("Scanning {}/{}", tick + 1, frame_count));
        }

        match self.session.complete_capture(self.config.min_frames) {
            Ok(()) => self.prompter.status("Face captured"),
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "capture failed");
                self.prompter.status(e.status_text());
            }
        }
    }

    fn cancelled(&mut self, tick: usize) {
        tracing::info!(session = %self.session.id(), tick, "capture cancelled");
        self.session.cancel();
        self.prompter.status(CaptureError::Cancelled.status_text());
    }
}
