//! # math-ocr
//!
//! Convert images of mathematical expressions to LaTeX using Vision
//! Language Models (VLMs).
//!
//! Hand an image of a handwritten or printed formula (from a file, a drop or
//! the clipboard) to a vision model, get back LaTeX source with any stray
//! markdown fences removed, and show it next to a KaTeX-rendered preview.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image
//!  │
//!  ├─ 1. Acquire    file picker / drop (image/* only) / clipboard paste
//!  ├─ 2. Encode     bytes → data:<mime>;base64,<payload>
//!  ├─ 3. VLM        one request: image + fixed OCR instruction
//!  ├─ 4. Normalize  strip ```latex fences, trim
//!  └─ 5. Present    editable LaTeX, KaTeX preview, copy to clipboard
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use math_ocr::{extract_file, OcrConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Gemini key read from GEMINI_API_KEY / GOOGLE_API_KEY
//!     let config = OcrConfig::default();
//!     let output = extract_file("equation.png", &config).await?;
//!     println!("{}", output.into_result()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Interactive use
//!
//! [`Session`] is the state machine behind the CLI: load an image, trigger
//! [`Session::extract`], edit the result with [`Session::set_latex`], copy it
//! with [`Session::copy_latex`]. Only one request runs at a time. By default a
//! late reply is applied even if the image was replaced meanwhile;
//! [`ResponsePolicy::ImageTagged`] drops it instead.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `math-ocr` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod clipboard;
pub mod config;
pub mod error;
pub mod extract;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod preview;
pub mod prompts;
pub mod session;
pub mod watch;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use clipboard::{ClipboardReader, ClipboardSink, ClipboardSource, ClipboardWriter, CopyFeedback};
pub use config::{check_credentials, OcrConfig, OcrConfigBuilder, ResponsePolicy};
pub use error::{ExtractionError, MathOcrError, RenderError};
pub use extract::{extract_blob, extract_clipboard, extract_file, extract_sync, extract_to_file};
pub use observer::{NoopObserver, SessionObserver, SharedObserver};
pub use output::ExtractionOutput;
pub use pipeline::acquire::ImageBlob;
pub use pipeline::data_url::DataUrl;
pub use pipeline::model::{Backend, GeminiClient, ProviderModel, VisionModel, VisionRequest};
pub use pipeline::normalize::strip_fences;
pub use preview::{KatexHtmlRenderer, MathRenderer};
pub use session::{ExtractionState, ImageId, LoadedImage, Session, SessionSnapshot};
pub use watch::{subscribe_paste, PasteStream, PasteSubscription};
