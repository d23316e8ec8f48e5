//! Session behaviour against a scripted vision model.
//!
//! No network: every test drives [`Session`] with a model that replays
//! canned replies, optionally holding each reply until the test releases it.

use math_ocr::{
    ClipboardSink, ExtractionError, ExtractionState, ImageBlob, ImageId, MathOcrError, OcrConfig,
    ResponsePolicy, Session, SessionObserver, VisionModel, VisionRequest,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ExtractionError>>>,
    requests: Mutex<Vec<VisionRequest>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<String, ExtractionError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn gated(replies: Vec<Result<String, ExtractionError>>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(replies)
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VisionModel for ScriptedModel {
    fn label(&self) -> &str {
        "scripted"
    }

    async fn extract(&self, request: &VisionRequest) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(ExtractionError::MalformedResponse(String::new())))
    }
}

#[derive(Default)]
struct CountingObserver {
    started: AtomicUsize,
    settled: AtomicUsize,
    stale: AtomicUsize,
    copied: AtomicUsize,
}

impl SessionObserver for CountingObserver {
    fn on_extraction_start(&self, _image: ImageId) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_extraction_settled(&self, _image: ImageId, _state: &ExtractionState) {
        self.settled.fetch_add(1, Ordering::SeqCst);
    }

    fn on_stale_response(&self, _image: ImageId) {
        self.stale.fetch_add(1, Ordering::SeqCst);
    }

    fn on_copied(&self, _chars: usize) {
        self.copied.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingClipboard {
    writes: Vec<String>,
}

impl ClipboardSink for RecordingClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), MathOcrError> {
        self.writes.push(text.to_string());
        Ok(())
    }
}

struct BrokenClipboard;

impl ClipboardSink for BrokenClipboard {
    fn write_text(&mut self, _text: &str) -> Result<(), MathOcrError> {
        Err(MathOcrError::Clipboard("no display".into()))
    }
}

/// Route library logs to the test harness; `RUST_LOG` overrides the filter.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("math_ocr=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn png(tag: u8) -> ImageBlob {
    ImageBlob::new(vec![tag; 16], "image/png")
}

fn session_with(model: ScriptedModel, config: &OcrConfig) -> Session<ScriptedModel> {
    Session::new(model, config)
}

// ── Acquisition ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn acquisition_resets_after_success() {
    let s = session_with(
        ScriptedModel::new(vec![Ok("```latex\n\\frac{1}{2}\n```".into())]),
        &OcrConfig::default(),
    );
    s.load_image(png(1));
    let state = s.extract_and_wait().await.unwrap();
    assert_eq!(state, ExtractionState::Succeeded("\\frac{1}{2}".into()));
    assert_eq!(s.latex(), "\\frac{1}{2}");

    s.load_image(png(2));
    assert_eq!(s.state(), ExtractionState::Idle);
    assert_eq!(s.latex(), "");
}

#[tokio::test]
async fn acquisition_resets_after_failure() {
    let s = session_with(
        ScriptedModel::new(vec![Err(ExtractionError::Transport("offline".into()))]),
        &OcrConfig::default(),
    );
    s.load_image(png(1));
    s.extract_and_wait().await.unwrap();
    assert!(s.state().error().is_some());

    assert!(s.acquire_drop("image/jpeg", vec![9, 9]).is_some());
    assert_eq!(s.state(), ExtractionState::Idle);
    assert_eq!(s.image().unwrap().mime_type, "image/jpeg");
}

#[tokio::test]
async fn non_image_drop_changes_nothing() {
    let s = session_with(
        ScriptedModel::new(vec![Ok("x".into())]),
        &OcrConfig::default(),
    );
    let id = s.load_image(png(1));
    s.extract_and_wait().await.unwrap();

    assert!(s.acquire_drop("text/plain", b"x^2".to_vec()).is_none());
    assert_eq!(s.image().unwrap().id, id);
    assert_eq!(s.state(), ExtractionState::Succeeded("x".into()));
    assert_eq!(s.latex(), "x");
}

#[tokio::test]
async fn file_acquisition_feeds_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eq.jpeg");
    std::fs::write(&path, [1u8, 2, 3]).unwrap();

    let s = session_with(
        ScriptedModel::new(vec![Ok("a^2".into())]),
        &OcrConfig::default(),
    );
    s.acquire_file(&path).await.unwrap();
    s.extract_and_wait().await.unwrap();

    let requests = s.model().requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].mime_type, "image/jpeg");
    assert_eq!(requests[0].image_base64, "AQID");
    assert_eq!(requests[0].instruction, math_ocr::prompts::LATEX_OCR_PROMPT);
}

#[tokio::test]
async fn custom_prompt_is_sent() {
    let config = OcrConfig::builder().prompt("Only LaTeX, please.").build().unwrap();
    let s = session_with(ScriptedModel::new(vec![Ok("b".into())]), &config);
    s.load_image(png(1));
    s.extract_and_wait().await.unwrap();
    let requests = s.model().requests.lock().unwrap().clone();
    assert_eq!(requests[0].instruction, "Only LaTeX, please.");
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn extract_without_image_issues_nothing() {
    let s = session_with(ScriptedModel::new(vec![]), &OcrConfig::default());
    assert!(s.extract().is_none());
    assert!(s.extract_and_wait().await.is_none());
    assert_eq!(s.state(), ExtractionState::Idle);
    assert_eq!(s.model().calls(), 0);
}

#[tokio::test]
async fn failure_keeps_image_and_settles_once() {
    init_tracing();
    let observer = Arc::new(CountingObserver::default());
    let config = OcrConfig::builder()
        .observer(observer.clone() as Arc<dyn SessionObserver>)
        .build()
        .unwrap();
    let s = session_with(
        ScriptedModel::new(vec![Err(ExtractionError::Transport(
            "connection refused".into(),
        ))]),
        &config,
    );
    let id = s.load_image(png(1));

    let state = s.extract_and_wait().await.unwrap();
    assert_eq!(
        state,
        ExtractionState::Failed("Network error: connection refused".into())
    );
    assert_eq!(s.image().unwrap().id, id);
    assert!(!s.is_busy());
    assert_eq!(observer.started.load(Ordering::SeqCst), 1);
    assert_eq!(observer.settled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_error_uses_fallback_message() {
    let s = session_with(
        ScriptedModel::new(vec![Err(ExtractionError::MalformedResponse(String::new()))]),
        &OcrConfig::default(),
    );
    s.load_image(png(1));
    let state = s.extract_and_wait().await.unwrap();
    assert_eq!(
        state,
        ExtractionState::Failed(math_ocr::error::FALLBACK_FAILURE_MESSAGE.into())
    );
}

#[tokio::test]
async fn failure_keeps_previous_latex() {
    let s = session_with(
        ScriptedModel::new(vec![
            Ok("y=mx+b".into()),
            Err(ExtractionError::Api {
                status: Some(429),
                message: "quota".into(),
            }),
        ]),
        &OcrConfig::default(),
    );
    s.load_image(png(1));
    s.extract_and_wait().await.unwrap();
    s.extract_and_wait().await.unwrap();
    assert_eq!(s.state().error(), Some("API error (HTTP 429): quota"));
    assert_eq!(s.latex(), "y=mx+b");
}

#[tokio::test]
async fn trigger_while_processing_is_noop() {
    let gate = Arc::new(Notify::new());
    let s = session_with(
        ScriptedModel::gated(vec![Ok("z".into())], gate.clone()),
        &OcrConfig::default(),
    );
    s.load_image(png(1));

    let handle = s.extract().expect("first trigger starts a request");
    assert_eq!(s.state(), ExtractionState::Processing);
    assert!(!s.can_extract());
    assert!(s.extract().is_none());

    gate.notify_one();
    handle.await.unwrap();

    assert_eq!(s.model().calls(), 1);
    assert_eq!(s.state(), ExtractionState::Succeeded("z".into()));
    assert!(s.can_extract());
}

struct PanickingModel;

impl VisionModel for PanickingModel {
    fn label(&self) -> &str {
        "panicking"
    }

    async fn extract(&self, _request: &VisionRequest) -> Result<String, ExtractionError> {
        panic!("model exploded")
    }
}

#[tokio::test]
async fn panicking_model_still_settles() {
    init_tracing();
    let observer = Arc::new(CountingObserver::default());
    let config = OcrConfig::builder()
        .observer(observer.clone() as Arc<dyn SessionObserver>)
        .build()
        .unwrap();
    let s = Session::new(PanickingModel, &config);
    s.load_image(png(1));

    s.extract().unwrap().await.unwrap();

    let state = s.state();
    let message = state.error().expect("panic settles as a failure");
    assert!(message.contains("model exploded"), "{message}");
    assert!(!s.is_busy());
    assert!(s.can_extract());
    assert_eq!(observer.settled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_after_dismissing_error() {
    let s = session_with(
        ScriptedModel::new(vec![
            Err(ExtractionError::Transport("timeout".into())),
            Ok("\\pi".into()),
        ]),
        &OcrConfig::default(),
    );
    s.load_image(png(1));
    s.extract_and_wait().await.unwrap();

    s.dismiss_error();
    assert_eq!(s.state(), ExtractionState::Idle);
    assert!(s.image().is_some());

    let state = s.extract_and_wait().await.unwrap();
    assert_eq!(state, ExtractionState::Succeeded("\\pi".into()));
}

// ── Stale responses ──────────────────────────────────────────────────────────

#[tokio::test]
async fn stale_reply_is_dropped_when_image_tagged() {
    init_tracing();
    let gate = Arc::new(Notify::new());
    let observer = Arc::new(CountingObserver::default());
    let config = OcrConfig::builder()
        .response_policy(ResponsePolicy::ImageTagged)
        .observer(observer.clone() as Arc<dyn SessionObserver>)
        .build()
        .unwrap();
    let s = session_with(
        ScriptedModel::gated(vec![Ok("old".into())], gate.clone()),
        &config,
    );
    s.load_image(png(1));
    let handle = s.extract().unwrap();

    s.load_image(png(2));
    assert_eq!(s.state(), ExtractionState::Idle);
    assert!(s.is_busy(), "the first request is still outstanding");
    assert!(s.extract().is_none(), "single flight holds across image swaps");

    gate.notify_one();
    handle.await.unwrap();

    assert_eq!(s.state(), ExtractionState::Idle);
    assert_eq!(s.latex(), "");
    assert!(!s.is_busy());
    assert_eq!(observer.stale.load(Ordering::SeqCst), 1);
    assert_eq!(observer.settled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_reply_overwrites_when_last_request_wins() {
    let gate = Arc::new(Notify::new());
    let config = OcrConfig::builder()
        .response_policy(ResponsePolicy::LastRequestWins)
        .build()
        .unwrap();
    let s = session_with(
        ScriptedModel::gated(vec![Ok("old".into())], gate.clone()),
        &config,
    );
    s.load_image(png(1));
    let handle = s.extract().unwrap();
    s.load_image(png(2));

    gate.notify_one();
    handle.await.unwrap();

    assert_eq!(s.state(), ExtractionState::Succeeded("old".into()));
    assert_eq!(s.latex(), "old");
}

#[tokio::test]
async fn late_reply_is_applied_by_default() {
    init_tracing();
    let gate = Arc::new(Notify::new());
    let s = session_with(
        ScriptedModel::gated(vec![Ok("old".into())], gate.clone()),
        &OcrConfig::default(),
    );
    s.load_image(png(1));
    let handle = s.extract().unwrap();
    let newer = s.load_image(png(2));

    gate.notify_one();
    handle.await.unwrap();

    assert_eq!(s.image().unwrap().id, newer);
    assert_eq!(s.state(), ExtractionState::Succeeded("old".into()));
    assert_eq!(s.latex(), "old");
    assert!(!s.is_busy());
}

#[tokio::test]
async fn clearing_mid_flight_drops_the_reply_when_image_tagged() {
    let gate = Arc::new(Notify::new());
    let config = OcrConfig::builder()
        .response_policy(ResponsePolicy::ImageTagged)
        .build()
        .unwrap();
    let s = session_with(
        ScriptedModel::gated(vec![Ok("gone".into())], gate.clone()),
        &config,
    );
    s.load_image(png(1));
    let handle = s.extract().unwrap();
    s.clear_image();

    gate.notify_one();
    handle.await.unwrap();

    assert!(s.image().is_none());
    assert_eq!(s.state(), ExtractionState::Idle);
    assert_eq!(s.latex(), "");
}

// ── Presentation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn edits_do_not_change_extraction_state() {
    let s = session_with(
        ScriptedModel::new(vec![Ok("a+b".into())]),
        &OcrConfig::default(),
    );
    s.load_image(png(1));
    s.extract_and_wait().await.unwrap();

    s.set_latex("a + b + c");
    assert_eq!(s.latex(), "a + b + c");
    assert_eq!(s.state(), ExtractionState::Succeeded("a+b".into()));
}

#[test]
fn copy_with_empty_latex_does_nothing() {
    let s = session_with(ScriptedModel::new(vec![]), &OcrConfig::default());
    let mut clip = RecordingClipboard::default();
    assert!(!s.copy_latex(&mut clip).unwrap());
    assert!(clip.writes.is_empty());
    assert!(!s.is_copied());
}

#[test]
fn copy_writes_text_verbatim_and_indicator_reverts() {
    let observer = Arc::new(CountingObserver::default());
    let config = OcrConfig::builder()
        .copy_feedback(Duration::from_millis(100))
        .observer(observer.clone() as Arc<dyn SessionObserver>)
        .build()
        .unwrap();
    let s = session_with(ScriptedModel::new(vec![]), &config);
    s.set_latex("  \\sum_{i=1}^n i \n");

    let mut clip = RecordingClipboard::default();
    assert!(s.copy_latex(&mut clip).unwrap());
    assert_eq!(clip.writes, vec!["  \\sum_{i=1}^n i \n".to_string()]);
    assert!(s.is_copied());
    assert_eq!(observer.copied.load(Ordering::SeqCst), 1);

    std::thread::sleep(Duration::from_millis(200));
    assert!(!s.is_copied());
}

#[test]
fn failed_copy_leaves_indicator_off() {
    let s = session_with(ScriptedModel::new(vec![]), &OcrConfig::default());
    s.set_latex("x");
    let err = s.copy_latex(&mut BrokenClipboard).unwrap_err();
    assert!(matches!(err, MathOcrError::Clipboard(_)));
    assert!(!s.is_copied());
}

#[tokio::test]
async fn snapshot_reflects_session() {
    let s = session_with(
        ScriptedModel::new(vec![Ok("e^{i\\pi}+1=0".into())]),
        &OcrConfig::default(),
    );
    let id = s.load_image(png(1));
    s.extract_and_wait().await.unwrap();

    let snap = s.snapshot();
    assert_eq!(snap.image, Some(id));
    assert_eq!(snap.mime_type.as_deref(), Some("image/png"));
    assert_eq!(snap.latex, "e^{i\\pi}+1=0");
    assert!(!snap.busy);
    assert!(!snap.copied);
}

#[test]
fn blocking_caller_can_drive_a_session() {
    let s = session_with(
        ScriptedModel::new(vec![Ok("```\n\\sqrt{2}\n```".into())]),
        &OcrConfig::default(),
    );
    s.load_image(png(3));
    let state = tokio_test::block_on(s.extract_and_wait()).unwrap();
    assert_eq!(state, ExtractionState::Succeeded("\\sqrt{2}".into()));
}
