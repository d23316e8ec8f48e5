//! Data URLs: the in-memory form of an acquired image.
//!
//! An acquired image is held as `data:<mime>;base64,<payload>`, the same
//! string a browser `FileReader` would hand back. Vision APIs want the two
//! halves separately (base64 payload plus MIME type), so [`split_data_url`]
//! takes the string apart again just before a request is built.
//!
//! Clipboard images arrive as raw RGBA pixels with no container format;
//! [`encode_png`] wraps them as PNG first. PNG is lossless, and JPEG
//! artefacts around thin strokes (fraction bars, subscripts) hurt OCR.

use crate::error::ExtractionError;
use crate::pipeline::acquire::ImageBlob;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::fmt;
use std::io::Cursor;
use tracing::debug;

/// An image encoded as a `data:` URL.
#[derive(Clone, PartialEq, Eq)]
pub struct DataUrl(String);

impl DataUrl {
    /// Encode a blob as `data:<mime>;base64,<payload>`.
    pub fn encode(blob: &ImageBlob) -> Self {
        let payload = STANDARD.encode(&blob.bytes);
        debug!(
            "Encoded {} image: {} bytes → {} bytes base64",
            blob.mime_type,
            blob.bytes.len(),
            payload.len()
        );
        Self(format!("data:{};base64,{}", blob.mime_type, payload))
    }

    /// Wrap an existing data URL string without checking it.
    ///
    /// Problems surface later as [`ExtractionError::MalformedRequest`] when
    /// the request is built.
    pub fn from_string(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into base64 payload and MIME type.
    pub fn split(&self) -> Result<InlineImage<'_>, ExtractionError> {
        split_data_url(&self.0)
    }
}

impl fmt::Debug for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.0.chars().take(40).collect();
        write!(f, "DataUrl({head}… {} bytes)", self.0.len())
    }
}

/// Borrowed halves of a data URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineImage<'a> {
    /// Base64 payload (everything after the first `,`).
    pub payload: &'a str,
    /// MIME type (between the header's `:` and `;`).
    pub mime_type: &'a str,
}

/// Split a data URL into `(payload, mime_type)`.
///
/// The payload is everything after the first comma. The MIME type is the
/// header text after the first `:` up to the first `;` (or the end of the
/// header when there are no parameters).
pub fn split_data_url(url: &str) -> Result<InlineImage<'_>, ExtractionError> {
    let (header, payload) = url
        .split_once(',')
        .ok_or_else(|| ExtractionError::MalformedRequest("data URL has no ',' separator".into()))?;

    let (_, after_scheme) = header
        .split_once(':')
        .ok_or_else(|| ExtractionError::MalformedRequest("data URL header has no ':'".into()))?;

    let mime_type = after_scheme
        .split_once(';')
        .map_or(after_scheme, |(mime, _)| mime);

    if mime_type.is_empty() {
        return Err(ExtractionError::MalformedRequest(
            "data URL declares no MIME type".into(),
        ));
    }
    if payload.is_empty() {
        return Err(ExtractionError::MalformedRequest(
            "data URL has an empty payload".into(),
        ));
    }

    Ok(InlineImage { payload, mime_type })
}

/// Encode decoded pixels as a PNG blob.
pub fn encode_png(img: &DynamicImage) -> Result<ImageBlob, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} pixels → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(ImageBlob::new(buf, "image/png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_produces_base64_data_url() {
        let blob = ImageBlob::new(vec![1, 2, 3], "image/jpeg");
        let url = DataUrl::encode(&blob);
        assert_eq!(url.as_str(), "data:image/jpeg;base64,AQID");
    }

    #[test]
    fn split_reads_payload_and_mime() {
        let parts = split_data_url("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(parts.mime_type, "image/png");
        assert_eq!(parts.payload, "iVBORw0KGgo=");
    }

    #[test]
    fn split_takes_payload_after_first_comma_only() {
        let parts = split_data_url("data:image/svg+xml;base64,AA,BB").unwrap();
        assert_eq!(parts.payload, "AA,BB");
        assert_eq!(parts.mime_type, "image/svg+xml");
    }

    #[test]
    fn split_without_parameters_uses_whole_header() {
        let parts = split_data_url("data:image/gif,R0lG").unwrap();
        assert_eq!(parts.mime_type, "image/gif");
    }

    #[test]
    fn split_rejects_missing_comma() {
        let err = split_data_url("data:image/png;base64").unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedRequest(_)));
    }

    #[test]
    fn split_rejects_missing_mime() {
        assert!(split_data_url("data:;base64,AAAA").is_err());
        assert!(split_data_url("nonsense,AAAA").is_err());
    }

    #[test]
    fn split_rejects_empty_payload() {
        assert!(split_data_url("data:image/png;base64,").is_err());
    }

    #[test]
    fn debug_is_truncated() {
        let blob = ImageBlob::new(vec![0u8; 4096], "image/png");
        let dbg = format!("{:?}", DataUrl::encode(&blob));
        assert!(dbg.len() < 100, "got: {dbg}");
    }

    #[test]
    fn encode_png_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let blob = encode_png(&img).expect("encode should succeed");
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(&blob.bytes[1..4], b"PNG");

        let url = DataUrl::encode(&blob);
        let parts = url.split().unwrap();
        let decoded = STANDARD.decode(parts.payload).expect("valid base64");
        assert_eq!(decoded, blob.bytes);
    }
}
