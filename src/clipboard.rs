//! System clipboard access (via arboard) and the "copied" indicator.
//!
//! The clipboard is used in both directions: LaTeX text goes out through a
//! [`ClipboardSink`], pasted images come in through a [`ClipboardSource`].
//! Both are traits so the session and the paste watcher can be driven by
//! in-memory fakes in tests.

use crate::error::MathOcrError;
use crate::pipeline::acquire::ImageBlob;
use crate::pipeline::data_url::encode_png;
use image::{DynamicImage, RgbaImage};
use std::time::{Duration, Instant};

/// Somewhere LaTeX text can be copied to.
pub trait ClipboardSink {
    /// Replace the clipboard contents with `text`, verbatim.
    fn write_text(&mut self, text: &str) -> Result<(), MathOcrError>;
}

/// Somewhere images can be pasted from.
///
/// Reads may block; callers run them on the blocking pool.
pub trait ClipboardSource: Send + Sync + 'static {
    /// The image currently on the clipboard, or `None` if it holds
    /// something else (or nothing).
    fn read_image(&self) -> Result<Option<ImageBlob>, MathOcrError>;
}

/// Writes text to the OS clipboard.
///
/// Keeps the arboard handle open after the first write: on X11 and Wayland
/// the copied text only lives as long as the process that owns it. A
/// short-lived process should use [`ClipboardWriter::holding`], which makes
/// each write block until another application takes over the clipboard or
/// the hold window runs out.
#[derive(Default)]
pub struct ClipboardWriter {
    handle: Option<arboard::Clipboard>,
    hold: Option<Duration>,
}

impl ClipboardWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer whose writes keep serving the text for up to `window` on
    /// Linux. A zero window means no hold. Other platforms keep clipboard
    /// contents after exit and ignore the window.
    pub fn holding(window: Duration) -> Self {
        Self {
            handle: None,
            hold: (!window.is_zero()).then_some(window),
        }
    }

    /// The hold window, if writes block to keep the text alive.
    pub fn hold(&self) -> Option<Duration> {
        self.hold
    }
}

impl ClipboardSink for ClipboardWriter {
    fn write_text(&mut self, text: &str) -> Result<(), MathOcrError> {
        if self.handle.is_none() {
            let clip = arboard::Clipboard::new().map_err(|e| MathOcrError::Clipboard(e.to_string()))?;
            self.handle = Some(clip);
        }
        let hold = self.hold;
        let Some(clip) = self.handle.as_mut() else {
            return Err(MathOcrError::Clipboard("clipboard handle unavailable".into()));
        };
        set_text(clip, text, hold).map_err(|e| MathOcrError::Clipboard(e.to_string()))
    }
}

#[cfg(all(
    unix,
    not(any(target_os = "macos", target_os = "android", target_os = "emscripten"))
))]
fn set_text(
    clip: &mut arboard::Clipboard,
    text: &str,
    hold: Option<Duration>,
) -> Result<(), arboard::Error> {
    use arboard::SetExtLinux;
    match hold {
        Some(window) => clip
            .set()
            .wait_until(Instant::now() + window)
            .text(text.to_owned()),
        None => clip.set_text(text.to_owned()),
    }
}

#[cfg(not(all(
    unix,
    not(any(target_os = "macos", target_os = "android", target_os = "emscripten"))
)))]
fn set_text(
    clip: &mut arboard::Clipboard,
    text: &str,
    _hold: Option<Duration>,
) -> Result<(), arboard::Error> {
    clip.set_text(text.to_owned())
}

/// Reads images from the OS clipboard.
///
/// Opens a fresh arboard handle per read so the reader itself stays `Send`
/// and can move onto the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClipboardReader;

impl ClipboardSource for ClipboardReader {
    fn read_image(&self) -> Result<Option<ImageBlob>, MathOcrError> {
        let mut clip = arboard::Clipboard::new().map_err(|e| MathOcrError::Clipboard(e.to_string()))?;
        let data = match clip.get_image() {
            Ok(data) => data,
            // Text or nothing on the clipboard: not an image, so not a paste.
            Err(arboard::Error::ContentNotAvailable) => return Ok(None),
            Err(e) => return Err(MathOcrError::Clipboard(e.to_string())),
        };

        // arboard hands back raw RGBA rows without a container format.
        let Some(pixels) = RgbaImage::from_raw(
            data.width as u32,
            data.height as u32,
            data.bytes.into_owned(),
        ) else {
            return Ok(None);
        };

        encode_png(&DynamicImage::ImageRgba8(pixels))
            .map(Some)
            .map_err(|e| MathOcrError::Internal(format!("PNG encoding of clipboard image failed: {e}")))
    }
}

/// Short-lived "copied" indicator.
///
/// Turns on at [`CopyFeedback::trigger`] and reverts to off by itself once
/// the window has elapsed. Re-triggering restarts the window.
#[derive(Debug, Clone)]
pub struct CopyFeedback {
    window: Duration,
    until: Option<Instant>,
}

impl CopyFeedback {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            until: None,
        }
    }

    pub fn trigger(&mut self) {
        self.until = Some(Instant::now() + self.window);
    }

    pub fn is_active(&self) -> bool {
        self.until.is_some_and(|t| Instant::now() < t)
    }

    pub fn reset(&mut self) {
        self.until = None;
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
