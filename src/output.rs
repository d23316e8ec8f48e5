//! Result types for one-shot extraction and atomic file output.

use crate::error::MathOcrError;
use crate::session::{ExtractionState, ImageId};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of a one-shot extraction ([`crate::extract::extract_file`] and
/// friends).
///
/// A failed request is still `Ok(ExtractionOutput)` with a `Failed` state;
/// call [`ExtractionOutput::into_result`] to treat it as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Identity of the image within its session.
    pub image: ImageId,
    /// MIME type of the image that was sent.
    pub mime_type: String,
    /// Backend label, e.g. `gemini/gemini-2.5-flash`.
    pub model: String,
    /// Final state after settlement.
    pub state: ExtractionState,
    /// Wall-clock time of the request, in milliseconds.
    pub duration_ms: u64,
}

impl ExtractionOutput {
    /// The normalized LaTeX, if the extraction succeeded.
    pub fn latex(&self) -> Option<&str> {
        match &self.state {
            ExtractionState::Succeeded(latex) => Some(latex),
            _ => None,
        }
    }

    /// Return the LaTeX, or the failure as [`MathOcrError::ExtractionFailed`].
    pub fn into_result(self) -> Result<String, MathOcrError> {
        match self.state {
            ExtractionState::Succeeded(latex) => Ok(latex),
            ExtractionState::Failed(message) => Err(MathOcrError::ExtractionFailed { message }),
            other => Err(MathOcrError::Internal(format!(
                "extraction did not settle (state: {other:?})"
            ))),
        }
    }
}

/// Write `contents` to `path` via a temp file and rename, so readers never
/// see a partial file. Parent directories are created as needed.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), MathOcrError> {
    let write_err = |e: std::io::Error| MathOcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}
