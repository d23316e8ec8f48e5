//! The extraction session: one image, one request at a time.
//!
//! A [`Session`] holds the three pieces of state the user interacts with:
//!
//! * the loaded image (`ImageState`), or none,
//! * the [`ExtractionState`] of the last request,
//! * the LaTeX text, which the user may edit freely.
//!
//! ## Transitions
//!
//! ```text
//!              extract()                 settle(Ok)
//!   Idle ─────────────────▶ Processing ─────────────▶ Succeeded(text)
//!    ▲   Succeeded/Failed ──▶     │      settle(Err)
//!    │                           └─────────────────▶ Failed(message)
//!    └──── load_image / clear_image / dismiss_error
//! ```
//!
//! [`Session::extract`] returns as soon as the request is spawned; the state
//! changes when the request settles. At most one request is outstanding:
//! triggering again while one is in flight does nothing, and so does
//! triggering with no image.
//!
//! ## Stale responses
//!
//! Requests can't be cancelled. Each one is tagged with the [`ImageId`] it
//! was issued for, and [`ResponsePolicy`] decides what happens when the
//! image changed before the reply came back: applied as-is by default,
//! dropped under [`ResponsePolicy::ImageTagged`].

use crate::clipboard::{ClipboardSink, ClipboardSource, CopyFeedback};
use crate::config::{OcrConfig, ResponsePolicy};
use crate::error::{ExtractionError, MathOcrError};
use crate::observer::SharedObserver;
use crate::pipeline::acquire::{self, ImageBlob};
use crate::pipeline::data_url::DataUrl;
use crate::pipeline::model::{resolve_model, Backend, VisionModel, VisionRequest};
use crate::pipeline::normalize::strip_fences;
use crate::prompts::LATEX_OCR_PROMPT;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identity of an acquired image. Strictly increasing within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageId(u64);

impl ImageId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An image held by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub id: ImageId,
    pub mime_type: String,
    pub data_url: DataUrl,
}

/// Outcome of the most recent extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum ExtractionState {
    #[default]
    Idle,
    Processing,
    Succeeded(String),
    Failed(String),
}

impl ExtractionState {
    pub fn is_processing(&self) -> bool {
        matches!(self, ExtractionState::Processing)
    }

    /// The error panel text, if the last request failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            ExtractionState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// A point-in-time copy of the session, for display or JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub image: Option<ImageId>,
    pub mime_type: Option<String>,
    pub extraction: ExtractionState,
    pub latex: String,
    pub busy: bool,
    pub copied: bool,
}

struct Inner {
    image: Option<LoadedImage>,
    state: ExtractionState,
    latex: String,
    next_image_id: u64,
    /// Tag of the one outstanding request, if any.
    in_flight: Option<ImageId>,
    copied: CopyFeedback,
}

/// A single-image extraction session.
///
/// Cheap to clone; clones share state. Methods that spawn work must be
/// called from inside a tokio runtime.
pub struct Session<M: VisionModel = Backend> {
    model: Arc<M>,
    inner: Arc<Mutex<Inner>>,
    prompt: Arc<str>,
    policy: ResponsePolicy,
    observer: Option<SharedObserver>,
}

impl<M: VisionModel> Clone for Session<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            inner: Arc::clone(&self.inner),
            prompt: Arc::clone(&self.prompt),
            policy: self.policy,
            observer: self.observer.clone(),
        }
    }
}

impl Session<Backend> {
    /// Create a session with the backend chosen by [`resolve_model`].
    pub fn from_config(config: &OcrConfig) -> Result<Self, MathOcrError> {
        Ok(Self::new(resolve_model(config)?, config))
    }
}

impl<M: VisionModel> Session<M> {
    /// Create a session around an explicit model.
    pub fn new(model: M, config: &OcrConfig) -> Self {
        let prompt: Arc<str> = config.prompt.as_deref().unwrap_or(LATEX_OCR_PROMPT).into();
        Self {
            model: Arc::new(model),
            inner: Arc::new(Mutex::new(Inner {
                image: None,
                state: ExtractionState::Idle,
                latex: String::new(),
                next_image_id: 1,
                in_flight: None,
                copied: CopyFeedback::new(config.copy_feedback),
            })),
            prompt,
            policy: config.response_policy,
            observer: config.observer.clone(),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }

    // ── Acquisition ──────────────────────────────────────────────────────

    /// Replace the current image.
    ///
    /// Resets extraction to `Idle` and clears the LaTeX text and any error,
    /// whatever the previous state.
    pub fn load_image(&self, blob: ImageBlob) -> ImageId {
        let data_url = DataUrl::encode(&blob);
        let id = {
            let mut inner = self.lock();
            let id = ImageId(inner.next_image_id);
            inner.next_image_id += 1;
            inner.image = Some(LoadedImage {
                id,
                mime_type: blob.mime_type.clone(),
                data_url,
            });
            inner.state = ExtractionState::Idle;
            inner.latex.clear();
            inner.copied.reset();
            id
        };
        info!("Image {} loaded ({}, {} bytes)", id, blob.mime_type, blob.bytes.len());
        if let Some(ref o) = self.observer {
            o.on_image_loaded(id, &blob.mime_type, blob.bytes.len());
        }
        id
    }

    /// Load an image file chosen through a picker.
    pub async fn acquire_file(&self, path: impl AsRef<Path>) -> Result<ImageId, MathOcrError> {
        let blob = acquire::acquire_file(path).await?;
        Ok(self.load_image(blob))
    }

    /// Load a dropped file. Non-image drops are ignored and return `None`.
    pub fn acquire_drop(&self, declared_type: &str, bytes: Vec<u8>) -> Option<ImageId> {
        acquire::acquire_drop(declared_type, bytes).map(|blob| self.load_image(blob))
    }

    /// Load the clipboard image. A clipboard without an image is ignored.
    pub async fn acquire_clipboard<S>(&self, source: &S) -> Result<Option<ImageId>, MathOcrError>
    where
        S: ClipboardSource + Clone,
    {
        let blob = acquire::acquire_clipboard(source).await?;
        Ok(blob.map(|b| self.load_image(b)))
    }

    /// Remove the image, the LaTeX text and any error.
    pub fn clear_image(&self) {
        {
            let mut inner = self.lock();
            inner.image = None;
            inner.state = ExtractionState::Idle;
            inner.latex.clear();
            inner.copied.reset();
        }
        debug!("Image cleared");
        if let Some(ref o) = self.observer {
            o.on_image_cleared();
        }
    }

    // ── Extraction ───────────────────────────────────────────────────────

    /// `true` when a trigger would issue a request.
    pub fn can_extract(&self) -> bool {
        let inner = self.lock();
        inner.image.is_some() && inner.in_flight.is_none()
    }

    /// Start extracting LaTeX from the current image.
    ///
    /// Returns the handle of the spawned request, or `None` when there is no
    /// image or a request is already in flight (in which case nothing
    /// changes). The state is `Processing` by the time this returns.
    pub fn extract(&self) -> Option<JoinHandle<()>> {
        let (tag, data_url) = {
            let mut inner = self.lock();
            if let Some(tag) = inner.in_flight {
                debug!("Extraction for image {} still in flight; trigger ignored", tag);
                return None;
            }
            let Some(image) = inner.image.as_ref() else {
                debug!("No image loaded; trigger ignored");
                return None;
            };
            let tag = image.id;
            let data_url = image.data_url.clone();
            inner.state = ExtractionState::Processing;
            inner.in_flight = Some(tag);
            (tag, data_url)
        };

        info!("Extracting LaTeX from image {} via {}", tag, self.model.label());
        if let Some(ref o) = self.observer {
            o.on_extraction_start(tag);
        }

        let model = Arc::clone(&self.model);
        let prompt = Arc::clone(&self.prompt);
        let settler = Settler {
            inner: Arc::clone(&self.inner),
            policy: self.policy,
            observer: self.observer.clone(),
        };

        Some(tokio::spawn(async move {
            let request = async {
                match VisionRequest::from_data_url(&data_url, &prompt) {
                    Ok(request) => model.extract(&request).await.map(|raw| strip_fences(&raw)),
                    Err(e) => Err(e),
                }
            };
            // A panicking model must still release the single-flight guard.
            let outcome = match AssertUnwindSafe(request).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(ExtractionError::Aborted(panic_message(&*payload))),
            };
            settler.settle(tag, outcome);
        }))
    }

    /// Trigger an extraction and wait for it to settle.
    ///
    /// Returns `None` if the trigger was a no-op, otherwise the state after
    /// settlement.
    pub async fn extract_and_wait(&self) -> Option<ExtractionState> {
        let tag = self.lock().image.as_ref().map(|i| i.id);
        let handle = self.extract()?;
        if let (Err(e), Some(tag)) = (handle.await, tag) {
            // The task was cancelled before settling; release the guard ourselves.
            let settler = Settler {
                inner: Arc::clone(&self.inner),
                policy: self.policy,
                observer: self.observer.clone(),
            };
            settler.settle(tag, Err(ExtractionError::Aborted(e.to_string())));
        }
        Some(self.state())
    }

    /// Hide the error panel. The image stays loaded for a retry.
    pub fn dismiss_error(&self) {
        let mut inner = self.lock();
        if matches!(inner.state, ExtractionState::Failed(_)) {
            inner.state = ExtractionState::Idle;
        }
    }

    // ── Presentation ─────────────────────────────────────────────────────

    pub fn state(&self) -> ExtractionState {
        self.lock().state.clone()
    }

    /// `true` while a request is outstanding, even if a newer image has
    /// already reset the visible state to `Idle`.
    pub fn is_busy(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    pub fn image(&self) -> Option<LoadedImage> {
        self.lock().image.clone()
    }

    pub fn latex(&self) -> String {
        self.lock().latex.clone()
    }

    /// Replace the LaTeX text with a user edit. Extraction state is not
    /// touched.
    pub fn set_latex(&self, text: impl Into<String>) {
        self.lock().latex = text.into();
    }

    /// Copy the LaTeX text, verbatim, to `sink`.
    ///
    /// Returns `Ok(false)` without touching the sink when there is no text.
    /// On success the "copied" indicator turns on for the configured window.
    pub fn copy_latex<C: ClipboardSink>(&self, sink: &mut C) -> Result<bool, MathOcrError> {
        let latex = self.latex();
        if latex.is_empty() {
            return Ok(false);
        }
        sink.write_text(&latex)?;
        self.lock().copied.trigger();
        debug!("Copied {} chars of LaTeX", latex.chars().count());
        if let Some(ref o) = self.observer {
            o.on_copied(latex.chars().count());
        }
        Ok(true)
    }

    /// `true` while the "copied" indicator is showing.
    pub fn is_copied(&self) -> bool {
        self.lock().copied.is_active()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            image: inner.image.as_ref().map(|i| i.id),
            mime_type: inner.image.as_ref().map(|i| i.mime_type.clone()),
            extraction: inner.state.clone(),
            latex: inner.latex.clone(),
            busy: inner.in_flight.is_some(),
            copied: inner.copied.is_active(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match detail {
        Some(d) => format!("request task panicked: {d}"),
        None => "request task panicked".to_string(),
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Applies a settled request to the shared state.
struct Settler {
    inner: Arc<Mutex<Inner>>,
    policy: ResponsePolicy,
    observer: Option<SharedObserver>,
}

impl Settler {
    fn settle(&self, tag: ImageId, outcome: Result<String, ExtractionError>) {
        let applied = {
            let mut inner = lock_inner(&self.inner);
            if inner.in_flight != Some(tag) {
                // Already settled.
                return;
            }
            inner.in_flight = None;

            let current = inner.image.as_ref().map(|i| i.id);
            if self.policy == ResponsePolicy::ImageTagged && current != Some(tag) {
                None
            } else {
                match outcome {
                    Ok(latex) => {
                        info!("Image {}: extracted {} chars of LaTeX", tag, latex.len());
                        inner.latex = latex.clone();
                        inner.state = ExtractionState::Succeeded(latex);
                    }
                    Err(e) => {
                        warn!("Image {}: extraction failed: {}", tag, e);
                        inner.state = ExtractionState::Failed(e.failure_message());
                    }
                }
                Some(inner.state.clone())
            }
        };

        match applied {
            Some(state) => {
                if let Some(ref o) = self.observer {
                    o.on_extraction_settled(tag, &state);
                }
            }
            None => {
                warn!("Discarding stale response for replaced image {}", tag);
                if let Some(ref o) = self.observer {
                    o.on_stale_response(tag);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoModel;

    impl VisionModel for EchoModel {
        fn label(&self) -> &str {
            "echo"
        }

        async fn extract(&self, request: &VisionRequest) -> Result<String, ExtractionError> {
            Ok(format!("```latex\n{}\n```", request.mime_type))
        }
    }

    fn session() -> Session<EchoModel> {
        Session::new(EchoModel, &OcrConfig::default())
    }

    #[test]
    fn starts_idle_and_empty() {
        let s = session();
        assert_eq!(s.state(), ExtractionState::Idle);
        assert!(s.latex().is_empty());
        assert!(s.image().is_none());
        assert!(!s.can_extract());
    }

    #[test]
    fn image_ids_increase() {
        let s = session();
        let a = s.load_image(ImageBlob::new(vec![1], "image/png"));
        let b = s.load_image(ImageBlob::new(vec![2], "image/png"));
        assert!(b > a);
        assert_eq!(s.image().unwrap().id, b);
    }

    #[test]
    fn extract_without_image_is_noop() {
        let s = session();
        assert!(s.extract().is_none());
        assert_eq!(s.state(), ExtractionState::Idle);
    }

    #[test]
    fn edits_do_not_touch_state() {
        let s = session();
        s.set_latex("a+b");
        assert_eq!(s.latex(), "a+b");
        assert_eq!(s.state(), ExtractionState::Idle);
    }

    #[tokio::test]
    async fn reply_is_normalized() {
        let s = session();
        s.load_image(ImageBlob::new(vec![1, 2, 3], "image/gif"));
        let state = s.extract_and_wait().await.unwrap();
        assert_eq!(state, ExtractionState::Succeeded("image/gif".into()));
        assert_eq!(s.latex(), "image/gif");
        assert!(!s.is_busy());
    }

    #[test]
    fn snapshot_serialises_state_tag() {
        let s = session();
        s.load_image(ImageBlob::new(vec![1], "image/png"));
        let json = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(json["extraction"]["state"], "idle");
        assert_eq!(json["mime_type"], "image/png");
    }
}
