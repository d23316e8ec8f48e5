//! Image acquisition: turn a file, a drop or a clipboard paste into an
//! [`ImageBlob`].
//!
//! Three sources, three policies:
//!
//! * **File picker** — the picker only offers images, so a file that is
//!   neither named nor shaped like one is an error ([`MathOcrError::NotAnImage`]).
//! * **Drop** — anything whose declared type is not `image/*` is silently
//!   ignored.
//! * **Clipboard paste** — no image on the clipboard is silently ignored.
//!
//! Content, dimensions and size are never validated; the remote model is
//! the judge of whether an image is readable.

use crate::clipboard::ClipboardSource;
use crate::error::MathOcrError;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Raw image bytes plus their declared MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageBlob {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBlob")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// `true` if a declared type names an image (`image/...`).
pub fn is_image_type(declared_type: &str) -> bool {
    declared_type.starts_with("image/")
}

/// MIME type implied by a file's extension, if it is an image extension.
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" | "jfif" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => return None,
    };
    Some(mime)
}

/// MIME type guessed from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

/// Read an image chosen through a file picker.
///
/// The MIME type comes from the extension, falling back to the magic bytes.
pub async fn acquire_file(path: impl AsRef<Path>) -> Result<ImageBlob, MathOcrError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| read_error(path, e))?;

    let mime = mime_from_extension(path)
        .or_else(|| sniff_mime(&bytes))
        .ok_or_else(|| MathOcrError::NotAnImage {
            path: path.to_path_buf(),
        })?;

    info!("Loaded {} ({}, {} bytes)", path.display(), mime, bytes.len());
    Ok(ImageBlob::new(bytes, mime))
}

fn read_error(path: &Path, e: std::io::Error) -> MathOcrError {
    let path: PathBuf = path.to_path_buf();
    match e.kind() {
        std::io::ErrorKind::NotFound => MathOcrError::FileNotFound { path },
        std::io::ErrorKind::PermissionDenied => MathOcrError::PermissionDenied { path },
        _ => MathOcrError::ReadFailed { path, source: e },
    }
}

/// Accept a dropped file only if its declared type is an image.
pub fn acquire_drop(declared_type: &str, bytes: Vec<u8>) -> Option<ImageBlob> {
    if !is_image_type(declared_type) {
        debug!("Ignoring drop of type '{}'", declared_type);
        return None;
    }
    Some(ImageBlob::new(bytes, declared_type))
}

/// Read the image currently on the clipboard, if any.
///
/// Clipboard access blocks, so it runs on the blocking pool.
pub async fn acquire_clipboard<S>(source: &S) -> Result<Option<ImageBlob>, MathOcrError>
where
    S: ClipboardSource + Clone,
{
    let source = source.clone();
    let blob = tokio::task::spawn_blocking(move || source.read_image())
        .await
        .map_err(|e| MathOcrError::Internal(format!("clipboard task failed: {e}")))??;

    match &blob {
        Some(b) => info!("Pasted {} image ({} bytes)", b.mime_type, b.bytes.len()),
        None => debug!("Clipboard holds no image; paste ignored"),
    }
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn image_type_filter() {
        assert!(is_image_type("image/png"));
        assert!(is_image_type("image/svg+xml"));
        assert!(!is_image_type("text/plain"));
        assert!(!is_image_type("application/pdf"));
        assert!(!is_image_type(""));
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        assert_eq!(mime_from_extension(Path::new("eq.PNG")), Some("image/png"));
        assert_eq!(mime_from_extension(Path::new("eq.Jpeg")), Some("image/jpeg"));
        assert_eq!(mime_from_extension(Path::new("eq.txt")), None);
        assert_eq!(mime_from_extension(Path::new("eq")), None);
    }

    #[test]
    fn sniff_recognises_png() {
        assert_eq!(sniff_mime(PNG_MAGIC), Some("image/png"));
        assert_eq!(sniff_mime(b"hello world"), None);
    }

    #[test]
    fn drop_ignores_non_images() {
        assert!(acquire_drop("text/plain", b"x^2".to_vec()).is_none());
        let blob = acquire_drop("image/webp", vec![1, 2]).unwrap();
        assert_eq!(blob.mime_type, "image/webp");
        assert_eq!(blob.bytes, vec![1, 2]);
    }

    #[tokio::test]
    async fn file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equation.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();

        let blob = acquire_file(&path).await.unwrap();
        assert_eq!(blob.mime_type, "image/jpeg");
        assert_eq!(blob.bytes, b"not really a jpeg");
    }

    #[tokio::test]
    async fn file_by_magic_bytes() {
        let mut tmp = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        tmp.write_all(PNG_MAGIC).unwrap();

        let blob = acquire_file(tmp.path()).await.unwrap();
        assert_eq!(blob.mime_type, "image/png");
    }

    #[tokio::test]
    async fn file_that_is_not_an_image() {
        let mut tmp = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        tmp.write_all(b"E=mc^2").unwrap();

        let err = acquire_file(tmp.path()).await.unwrap_err();
        assert!(matches!(err, MathOcrError::NotAnImage { .. }));
    }

    #[tokio::test]
    async fn missing_file() {
        let err = acquire_file("/definitely/not/here.png").await.unwrap_err();
        assert!(matches!(err, MathOcrError::FileNotFound { .. }));
    }
}
