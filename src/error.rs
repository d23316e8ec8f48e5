//! Error types for the math-ocr library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`MathOcrError`] — **Fatal**: the operation cannot proceed at all
//!   (unreadable file, clipboard unavailable, provider not configured).
//!   Returned as `Err(MathOcrError)` from library entry points.
//!
//! * [`ExtractionError`] — **Non-fatal**: the remote model call failed.
//!   It never escapes as an `Err` from the session; it is converted into
//!   [`crate::session::ExtractionState::Failed`] at the point where the
//!   request settles, and the loaded image stays in place so the user can
//!   retry.
//!
//! * [`RenderError`] — the preview renderer could not produce output. Kept
//!   apart from extraction so a bad preview never changes extraction state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Message shown when a failed request carries no description of its own.
pub const FALLBACK_FAILURE_MESSAGE: &str = "Failed to extract LaTeX from image.";

/// All fatal errors returned by the math-ocr library.
#[derive(Debug, Error)]
pub enum MathOcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file could not be read for another I/O reason.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is neither named nor shaped like an image.
    #[error("File is not an image: '{path}'\nSupported: png, jpeg, gif, webp, bmp, tiff, ico, avif, svg, heic")]
    NotAnImage { path: PathBuf },

    /// The system clipboard could not be opened, read or written.
    #[error("Clipboard error: {0}")]
    Clipboard(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider could not be initialised.
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The extraction settled as a failure.
    ///
    /// Only returned by the one-shot helpers in [`crate::extract`] via
    /// [`crate::output::ExtractionOutput::into_result`]; the session itself
    /// keeps failures as state.
    #[error("Extraction failed: {message}")]
    ExtractionFailed { message: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed extraction request.
///
/// Distinguishes where the request broke so callers can tell a flaky network
/// from a rejected key or a reply the model garbled.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ExtractionError {
    /// The request never produced an HTTP response (DNS, TLS, timeout, ...).
    #[error("Network error: {0}")]
    Transport(String),

    /// The service answered with a non-success status or a provider error.
    #[error("API error{}: {message}", status_suffix(.status))]
    Api {
        status: Option<u16>,
        message: String,
    },

    /// The service answered 2xx but the body held no usable text.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The stored image could not be turned into a request payload.
    #[error("Malformed image data: {0}")]
    MalformedRequest(String),

    /// The background task driving the request died before settling.
    #[error("Extraction task aborted: {0}")]
    Aborted(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

impl ExtractionError {
    /// The underlying description, without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            ExtractionError::Transport(d)
            | ExtractionError::MalformedResponse(d)
            | ExtractionError::MalformedRequest(d)
            | ExtractionError::Aborted(d) => d,
            ExtractionError::Api { message, .. } => message,
        }
    }

    /// Text for the `Failed` state: the full description, or
    /// [`FALLBACK_FAILURE_MESSAGE`] when the error carries none.
    pub fn failure_message(&self) -> String {
        if self.detail().trim().is_empty() {
            FALLBACK_FAILURE_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }

    /// `true` for 401/403 replies; retrying with the same key won't help.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ExtractionError::Api {
                status: Some(401 | 403),
                ..
            }
        )
    }
}

/// The preview renderer could not produce output.
#[derive(Debug, Error)]
pub enum RenderError {
    /// There is no LaTeX to typeset.
    #[error("Nothing to render: LaTeX text is empty")]
    Empty,

    /// The LaTeX could not be embedded into the output document.
    #[error("Failed to embed LaTeX into preview: {0}")]
    Embed(String),
}
