use assert_matches::assert_matches;
use async_trait::async_trait;
use facegate_capture::{
    CameraHandle, CaptureController, GeoProvider, GeoTracker, OverlapPolicy, StaticGeo, StatusSink,
    Verifier, VoicePrompt,
};
use facegate_core::{
    CaptureConfig, CaptureError, ChallengeSource, GeoError, GeoFix, PosePrompt, PromptCue,
    SessionFailure, SessionState, SubmissionError, SubmissionPayload, SubmitTarget,
    VerifierResponse,
};
use facegate_hw::{CapturedImage, FrameSource, SourceError};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source that labels every frame with the call number it was produced on.
struct ScriptedSource {
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    misses: HashSet<usize>,
    slow: HashSet<usize>,
    delay: Duration,
    disconnect_at: Option<usize>,
}

#[derive(Clone, Default)]
struct GrabCounters {
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedSource {
    fn new(counters: &GrabCounters) -> Self {
        Self {
            calls: counters.calls.clone(),
            in_flight: counters.in_flight.clone(),
            max_in_flight: counters.max_in_flight.clone(),
            misses: HashSet::new(),
            slow: HashSet::new(),
            delay: Duration::ZERO,
            disconnect_at: None,
        }
    }

    fn missing(mut self, ticks: impl IntoIterator<Item = usize>) -> Self {
        self.misses.extend(ticks);
        self
    }
}

impl FrameSource for ScriptedSource {
    fn grab(&mut self) -> Result<Option<CapturedImage>, SourceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.slow.contains(&n) {
            std::thread::sleep(Duration::from_millis(60));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = if self.disconnect_at == Some(n) {
            Err(SourceError::Disconnected("usb unplugged".into()))
        } else if self.misses.contains(&n) {
            Ok(None)
        } else {
            Ok(Some(CapturedImage::jpeg(format!("frame-{n}").into_bytes())))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

/// Verifier that records every payload and answers from a queue.
#[derive(Default)]
struct RecordingVerifier {
    payloads: Mutex<Vec<SubmissionPayload>>,
    replies: Mutex<VecDeque<Result<VerifierResponse, SubmissionError>>>,
}

impl RecordingVerifier {
    fn reply_with(&self, reply: Result<VerifierResponse, SubmissionError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn calls(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    fn last_payload(&self) -> SubmissionPayload {
        self.payloads.lock().unwrap().last().cloned().expect("no submission recorded")
    }
}

#[async_trait]
impl Verifier for RecordingVerifier {
    async fn submit(&self, payload: SubmissionPayload) -> Result<VerifierResponse, SubmissionError> {
        self.payloads.lock().unwrap().push(payload);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(response(serde_json::json!({ "success": true, "trip_id": 41 }))))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[derive(Default)]
struct RecordingVoice(Mutex<Vec<String>>);

impl VoicePrompt for RecordingVoice {
    fn speak(&self, text: &str, _locale: &str) {
        self.0.lock().unwrap().push(text.to_string());
    }
}

struct NeverResolves;

#[async_trait]
impl GeoProvider for NeverResolves {
    async fn locate(&self) -> Result<GeoFix, GeoError> {
        std::future::pending().await
    }
}

fn response(body: serde_json::Value) -> VerifierResponse {
    serde_json::from_value(body).unwrap()
}

/// 30 ticks of 20 ms with the pose prompts switching on ticks 0, 5 and 20.
fn fast_config(challenge: ChallengeSource) -> CaptureConfig {
    CaptureConfig {
        frame_interval: Duration::from_millis(20),
        grab_timeout: Duration::from_millis(20),
        prompts: vec![
            PosePrompt::new("Verifying, look at the camera", PromptCue::Status, 100),
            PosePrompt::new("Get ready to blink", PromptCue::Voice, 300),
            PosePrompt::new("Hold steady", PromptCue::Status, 200),
        ],
        challenge_source: challenge,
        ..CaptureConfig::default()
    }
}

fn controller(source: ScriptedSource, verifier: Arc<RecordingVerifier>) -> CaptureController {
    CaptureController::new(CameraHandle::spawn(source).unwrap(), verifier)
        .with_config(fast_config(ChallengeSource::Seeded(7)))
}

fn recording_status() -> (Arc<Mutex<Vec<String>>>, Arc<dyn StatusSink>) {
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = lines.clone();
    let status: Arc<dyn StatusSink> = Arc::new(move |text: &str| sink.lock().unwrap().push(text.to_string()));
    (lines, status)
}

fn target() -> SubmitTarget {
    SubmitTarget::check_in("ORG1", "EMP-042")
}

#[tokio::test]
async fn test_every_tick_captured_in_order() {
    let counters = GrabCounters::default();
    let voice = Arc::new(RecordingVoice::default());
    let ctl = controller(ScriptedSource::new(&counters), Arc::default()).with_voice(voice.clone());

    let handle = ctl.start_session().await.unwrap();
    let challenge = handle.challenge_tick();
    assert!((12..=18).contains(&challenge));

    let session = handle.finish().await.unwrap();
    assert_eq!(session.state(), &SessionState::ReadyToSubmit);
    assert_eq!(session.frames().len(), 30);
    for (i, frame) in session.frames().iter().enumerate() {
        assert_eq!(frame.tick, i);
        assert_eq!(frame.data, format!("frame-{i}").into_bytes());
        assert_eq!(frame.content_type, "image/jpeg");
    }
    assert_eq!(session.challenge_frame_index(), Some(challenge));
    assert!(session.missed_ticks().is_empty());

    let log: Vec<(usize, &str)> = session
        .prompt_log()
        .iter()
        .map(|e| (e.tick, e.text.as_str()))
        .collect();
    assert_eq!(
        log,
        vec![
            (0, "Verifying, look at the camera"),
            (5, "Get ready to blink"),
            (challenge, "Blink now"),
            (20, "Hold steady"),
        ]
    );
    assert_eq!(
        *voice.0.lock().unwrap(),
        vec!["Get ready to blink".to_string(), "Blink now".to_string()]
    );
    assert_eq!(counters.calls.load(Ordering::SeqCst), 30);
}

#[tokio::test]
async fn test_too_many_misses_never_uploads() {
    let counters = GrabCounters::default();
    let verifier = Arc::new(RecordingVerifier::default());
    // 23 misses leave 7 frames, one short of the minimum.
    let source = ScriptedSource::new(&counters).missing(0..23);
    let (statuses, status) = recording_status();
    let ctl = controller(source, verifier.clone()).with_status(status);

    let mut session = ctl.start_session().await.unwrap().join().await.unwrap();
    assert_matches!(
        session.state(),
        SessionState::Failed(SessionFailure::Capture(CaptureError::InsufficientFrames {
            captured: 7,
            required: 8
        }))
    );
    assert!(session.frames().is_empty());
    assert_eq!(
        statuses.lock().unwrap().last().map(String::as_str),
        Some("Face not captured clearly. Please try again.")
    );

    let err = ctl.submit(&mut session, &target()).await.unwrap_err();
    assert_eq!(err, SubmissionError::NotReady { state: "failed" });
    assert_eq!(verifier.calls(), 0);
}

#[tokio::test]
async fn test_finish_reports_capture_error() {
    let counters = GrabCounters::default();
    let source = ScriptedSource::new(&counters).missing(0..25);
    let ctl = controller(source, Arc::default());

    let err = ctl.start_session().await.unwrap().finish().await.unwrap_err();
    assert_matches!(err, CaptureError::InsufficientFrames { captured: 5, .. });
}

#[tokio::test]
async fn test_overlapping_start_rejected() {
    let counters = GrabCounters::default();
    let ctl = controller(ScriptedSource::new(&counters), Arc::default());

    let first = ctl.start_session().await.unwrap();
    assert_matches!(ctl.start_session().await, Err(CaptureError::Busy));

    let session = first.finish().await.unwrap();
    assert_eq!(session.frames().len(), 30);
    assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);

    // The camera is free again once the first loop has ended.
    let again = ctl.start_session().await.unwrap().finish().await.unwrap();
    assert_eq!(again.frames().len(), 30);
}

#[tokio::test]
async fn test_cancel_previous_hands_over_camera() {
    let counters = GrabCounters::default();
    let ctl = controller(ScriptedSource::new(&counters), Arc::default())
        .with_overlap(OverlapPolicy::CancelPrevious);

    let first = ctl.start_session().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = ctl.start_session().await.unwrap();
    assert_ne!(first.id(), second.id());

    let old = first.join().await.unwrap();
    assert_eq!(old.state(), &SessionState::Cancelled);
    assert!(old.frames().is_empty());

    let new = second.finish().await.unwrap();
    assert_eq!(new.frames().len(), 30);
    assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_issues_no_upload() {
    let counters = GrabCounters::default();
    let verifier = Arc::new(RecordingVerifier::default());
    let statuses = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = statuses.clone();
    let ctl = controller(ScriptedSource::new(&counters), verifier.clone())
        .with_status(Arc::new(move |text: &str| sink.lock().unwrap().push(text.to_string())));

    let handle = ctl.start_session().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.cancel();

    let mut session = handle.join().await.unwrap();
    assert_eq!(session.state(), &SessionState::Cancelled);
    assert!(session.frames().is_empty());
    assert!(counters.calls.load(Ordering::SeqCst) < 30);
    assert_eq!(
        statuses.lock().unwrap().last().map(String::as_str),
        Some("Capture cancelled.")
    );

    let err = ctl.submit(&mut session, &target()).await.unwrap_err();
    assert_eq!(err, SubmissionError::NotReady { state: "cancelled" });
    assert_eq!(verifier.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_handle_finish() {
    let counters = GrabCounters::default();
    let ctl = controller(ScriptedSource::new(&counters), Arc::default());

    let handle = ctl.start_session().await.unwrap();
    handle.cancellation().cancel();
    assert_eq!(handle.finish().await.unwrap_err(), CaptureError::Cancelled);
}

#[tokio::test]
async fn test_full_burst_submitted_once() {
    let counters = GrabCounters::default();
    let verifier = Arc::new(RecordingVerifier::default());
    let ctl = controller(ScriptedSource::new(&counters), verifier.clone());

    let mut session = ctl.start_session().await.unwrap().finish().await.unwrap();
    let index = session.challenge_frame_index().unwrap();
    assert!((12..=18).contains(&index));

    let result = ctl.submit(&mut session, &target()).await.unwrap();
    assert!(result.matched);
    assert_eq!(result.trip_id.as_deref(), Some("41"));
    assert_eq!(session.state(), &SessionState::Succeeded);
    assert!(session.frames().is_empty());

    let payload = verifier.last_payload();
    assert_eq!(payload.endpoint, "trips/driver-checkin/");
    assert_eq!(payload.frame_parts(), 30);
    assert_eq!(payload.field("challenge_frame"), Some(index.to_string().as_str()));
    assert_eq!(payload.field("employee_id"), Some("EMP-042"));
    assert_eq!(payload.files[index].data, format!("frame-{index}").into_bytes());

    // A finished session cannot be sent again.
    let err = ctl.submit(&mut session, &target()).await.unwrap_err();
    assert_eq!(err, SubmissionError::NotReady { state: "succeeded" });
    assert_eq!(verifier.calls(), 1);
}

#[tokio::test]
async fn test_missed_ticks_remap_challenge() {
    let counters = GrabCounters::default();
    let source = ScriptedSource::new(&counters).missing([3, 7, 9]);
    let ctl = controller(source, Arc::default());

    let config = fast_config(ChallengeSource::Issued(12));
    let session = ctl.start_session_with(config).await.unwrap().finish().await.unwrap();

    assert_eq!(session.frames().len(), 27);
    assert_eq!(session.missed_ticks(), &[3, 7, 9]);
    let index = session.challenge_frame_index().unwrap();
    assert_eq!(index, 9);
    assert_eq!(session.frames()[index].tick, 12);
}

#[tokio::test]
async fn test_missed_challenge_tick_moves_to_next_frame() {
    let counters = GrabCounters::default();
    let source = ScriptedSource::new(&counters).missing([2, 15, 16]);
    let ctl = controller(source, Arc::default());

    let config = fast_config(ChallengeSource::Issued(15));
    let session = ctl.start_session_with(config).await.unwrap().finish().await.unwrap();

    let index = session.challenge_frame_index().unwrap();
    assert_eq!(session.frames()[index].tick, 17);
    assert_eq!(index, 14);
}

#[tokio::test]
async fn test_challenge_frame_lost() {
    let counters = GrabCounters::default();
    let source = ScriptedSource::new(&counters).missing(14..30);
    let ctl = controller(source, Arc::default());

    let config = fast_config(ChallengeSource::Issued(14));
    let err = ctl.start_session_with(config).await.unwrap().finish().await.unwrap_err();
    assert_eq!(err, CaptureError::ChallengeFrameLost { tick: 14 });
}

#[tokio::test]
async fn test_rejection_fails_session_only() {
    let counters = GrabCounters::default();
    let verifier = Arc::new(RecordingVerifier::default());
    verifier.reply_with(Ok(response(serde_json::json!({
        "success": false,
        "error": "no match"
    }))));
    let voice = Arc::new(RecordingVoice::default());
    let ctl = controller(ScriptedSource::new(&counters), verifier.clone()).with_voice(voice.clone());

    let mut first = ctl.start_session().await.unwrap().finish().await.unwrap();
    let err = ctl.submit(&mut first, &target()).await.unwrap_err();
    assert_eq!(err, SubmissionError::ServerRejected("no match".into()));
    assert_matches!(
        first.state(),
        SessionState::Failed(SessionFailure::Submission(SubmissionError::ServerRejected(_)))
    );
    assert_eq!(
        voice.0.lock().unwrap().last().map(String::as_str),
        Some("Verification failed, please try again")
    );

    let mut second = ctl.start_session().await.unwrap().finish().await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(second.frames().len(), 30);
    ctl.submit(&mut second, &target()).await.unwrap();
    assert_eq!(second.state(), &SessionState::Succeeded);
    assert_eq!(verifier.calls(), 2);
    assert_eq!(verifier.last_payload().frame_parts(), 30);
}

#[tokio::test]
async fn test_verifier_timeout() {
    struct Stalled;

    #[async_trait]
    impl Verifier for Stalled {
        async fn submit(&self, _payload: SubmissionPayload) -> Result<VerifierResponse, SubmissionError> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    let counters = GrabCounters::default();
    let ctl = CaptureController::new(CameraHandle::spawn(ScriptedSource::new(&counters)).unwrap(), Arc::new(Stalled))
        .with_config(fast_config(ChallengeSource::Seeded(1)))
        .with_submit_timeout(Duration::from_millis(50));

    let mut session = ctl.start_session().await.unwrap().finish().await.unwrap();
    let err = ctl.submit(&mut session, &target()).await.unwrap_err();
    assert_eq!(err, SubmissionError::Timeout);
    assert_matches!(session.state(), SessionState::Failed(_));
}

#[tokio::test]
async fn test_unresolved_location_left_out() {
    let counters = GrabCounters::default();
    let verifier = Arc::new(RecordingVerifier::default());
    let ctl = controller(ScriptedSource::new(&counters), verifier.clone())
        .with_geo(GeoTracker::new(Arc::new(NeverResolves)));

    let mut session = ctl.start_session().await.unwrap().finish().await.unwrap();
    ctl.submit(&mut session, &target()).await.unwrap();

    let payload = verifier.last_payload();
    assert_eq!(payload.field("latitude"), None);
    assert_eq!(payload.field("longitude"), None);
}

#[tokio::test]
async fn test_resolved_location_attached() {
    let counters = GrabCounters::default();
    let verifier = Arc::new(RecordingVerifier::default());
    let fix = GeoFix {
        latitude: 12.9716,
        longitude: 77.5946,
    };
    let ctl = controller(ScriptedSource::new(&counters), verifier.clone())
        .with_geo(GeoTracker::new(Arc::new(StaticGeo(fix))));

    let mut session = ctl.start_session().await.unwrap().finish().await.unwrap();
    ctl.submit(&mut session, &target()).await.unwrap();

    let payload = verifier.last_payload();
    assert_eq!(payload.field("latitude"), Some("12.9716"));
    assert_eq!(payload.field("longitude"), Some("77.5946"));
}

#[tokio::test]
async fn test_disconnect_fails_session() {
    let counters = GrabCounters::default();
    let mut source = ScriptedSource::new(&counters);
    source.disconnect_at = Some(4);
    let verifier = Arc::new(RecordingVerifier::default());
    let ctl = controller(source, verifier.clone());

    let err = ctl.start_session().await.unwrap().finish().await.unwrap_err();
    assert_matches!(err, CaptureError::CameraUnavailable(msg) if msg.contains("usb unplugged"));
    assert_eq!(counters.calls.load(Ordering::SeqCst), 5);
    assert_eq!(verifier.calls(), 0);
}

#[tokio::test]
async fn test_slow_grab_counts_as_miss() {
    let counters = GrabCounters::default();
    let mut source = ScriptedSource::new(&counters);
    source.slow.insert(4);
    let ctl = controller(source, Arc::default());

    let config = CaptureConfig {
        grab_timeout: Duration::from_millis(20),
        ..fast_config(ChallengeSource::Issued(18))
    };
    let session = ctl.start_session_with(config).await.unwrap().join().await.unwrap();

    assert!(session.missed_ticks().contains(&4));
    assert!(!session.frames().iter().any(|f| f.tick == 4));
    assert_eq!(session.frames().len() + session.missed_ticks().len(), 30);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let counters = GrabCounters::default();
    let ctl = controller(ScriptedSource::new(&counters), Arc::default());

    let config = CaptureConfig {
        min_frames: 31,
        ..fast_config(ChallengeSource::Seeded(3))
    };
    assert_matches!(ctl.start_session_with(config).await, Err(CaptureError::InvalidConfig(_)));

    let config = fast_config(ChallengeSource::Issued(25));
    assert_matches!(ctl.start_session_with(config).await, Err(CaptureError::InvalidConfig(_)));

    // Nothing was started, so the camera is still free.
    assert!(ctl.start_session().await.is_ok());
}

#[tokio::test]
async fn test_status_on_every_tick() {
    let counters = GrabCounters::default();
    let (statuses, status) = recording_status();
    let ctl = controller(ScriptedSource::new(&counters), Arc::default()).with_status(status);

    ctl.start_session().await.unwrap().finish().await.unwrap();

    let lines = statuses.lock().unwrap().clone();
    let progress: Vec<String> = lines
        .iter()
        .filter(|l| l.starts_with("Scanning "))
        .cloned()
        .collect();
    let expected: Vec<String> = (1..=30).map(|i| format!("Scanning {i}/30")).collect();
    assert_eq!(progress, expected);
    assert_eq!(lines.first().map(String::as_str), Some("Verifying, look at the camera"));
    assert_eq!(lines.last().map(String::as_str), Some("Face captured"));
}

#[tokio::test]
async fn test_slow_camera_keeps_burst_on_schedule() {
    let counters = GrabCounters::default();
    let mut source = ScriptedSource::new(&counters);
    source.delay = Duration::from_millis(50);
    let ctl = controller(source, Arc::default());

    let config = CaptureConfig {
        min_frames: 1,
        ..fast_config(ChallengeSource::Issued(12))
    };
    let limit = config.frame_interval * (config.frame_count as u32 + 1);

    let started = Instant::now();
    let session = ctl.start_session_with(config).await.unwrap().join().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed <= limit, "burst took {elapsed:?}, limit {limit:?}");
    assert_ne!(session.state(), &SessionState::Capturing);
    assert!(!session.missed_ticks().is_empty());
    if session.state() == &SessionState::ReadyToSubmit {
        assert_eq!(session.frames().len() + session.missed_ticks().len(), 30);
    }
}
