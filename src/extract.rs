//! One-shot extraction entry points.
//!
//! These wrap a throwaway [`Session`]: acquire one image, run one request,
//! return the settled state. Use [`Session`] directly when the image may be
//! replaced, edited or copied afterwards.

use crate::clipboard::ClipboardSource;
use crate::config::OcrConfig;
use crate::error::MathOcrError;
use crate::output::{write_atomic, ExtractionOutput};
use crate::pipeline::acquire::ImageBlob;
use crate::pipeline::model::VisionModel;
use crate::session::{ExtractionState, ImageId, Session};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Extract LaTeX from an image file.
///
/// # Errors
/// Returns `Err(MathOcrError)` only for fatal errors (file missing or not an
/// image, provider not configured). A failed request is reported as
/// `Ok` with [`ExtractionState::Failed`].
///
/// # Example
/// ```rust,no_run
/// use math_ocr::{extract_file, OcrConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Reads GEMINI_API_KEY from the environment
/// let output = extract_file("equation.png", &OcrConfig::default()).await?;
/// println!("{}", output.into_result()?);
/// # Ok(())
/// # }
/// ```
pub async fn extract_file(
    path: impl AsRef<Path>,
    config: &OcrConfig,
) -> Result<ExtractionOutput, MathOcrError> {
    let session = Session::from_config(config)?;
    let image = session.acquire_file(path).await?;
    run(&session, image).await
}

/// Extract LaTeX from in-memory image bytes.
pub async fn extract_blob(
    blob: ImageBlob,
    config: &OcrConfig,
) -> Result<ExtractionOutput, MathOcrError> {
    let session = Session::from_config(config)?;
    let image = session.load_image(blob);
    run(&session, image).await
}

/// Extract LaTeX from the image on the clipboard.
///
/// Returns `Ok(None)` when the clipboard holds no image.
pub async fn extract_clipboard<S>(
    source: &S,
    config: &OcrConfig,
) -> Result<Option<ExtractionOutput>, MathOcrError>
where
    S: ClipboardSource + Clone,
{
    let session = Session::from_config(config)?;
    match session.acquire_clipboard(source).await? {
        Some(image) => run(&session, image).await.map(Some),
        None => Ok(None),
    }
}

/// Extract LaTeX from an image file and write it to `output_path`.
///
/// Uses atomic write (temp file + rename). Nothing is written when the
/// extraction fails; the failure comes back as
/// [`MathOcrError::ExtractionFailed`].
pub async fn extract_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &OcrConfig,
) -> Result<ExtractionOutput, MathOcrError> {
    let output = extract_file(input, config).await?;
    let latex = output.clone().into_result()?;
    write_atomic(output_path.as_ref(), latex.as_bytes()).await?;
    Ok(output)
}

/// Synchronous wrapper around [`extract_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    path: impl AsRef<Path>,
    config: &OcrConfig,
) -> Result<ExtractionOutput, MathOcrError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MathOcrError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_file(path, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

pub(crate) async fn run<M: VisionModel>(
    session: &Session<M>,
    image: ImageId,
) -> Result<ExtractionOutput, MathOcrError> {
    let start = Instant::now();
    let state = session
        .extract_and_wait()
        .await
        .ok_or_else(|| MathOcrError::Internal("extraction was not started".into()))?;
    let duration_ms = start.elapsed().as_millis() as u64;

    let mime_type = session
        .image()
        .map(|i| i.mime_type)
        .unwrap_or_default();

    if let ExtractionState::Succeeded(ref latex) = state {
        info!("Extraction complete: {} chars in {}ms", latex.len(), duration_ms);
    }

    Ok(ExtractionOutput {
        image,
        mime_type,
        model: session.model().label().to_string(),
        state,
        duration_ms,
    })
}
