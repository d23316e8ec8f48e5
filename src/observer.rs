//! Observer trait for session transitions.
//!
//! Inject an [`Arc<dyn SessionObserver>`] via
//! [`crate::config::OcrConfigBuilder::observer`] to hear about image loads,
//! request starts and settlements as they happen. The CLI uses it to drive a
//! spinner; a GUI would repaint.
//!
//! # Example
//!
//! ```rust
//! use math_ocr::{ImageId, OcrConfig, SessionObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     started: AtomicUsize,
//! }
//!
//! impl SessionObserver for CountingObserver {
//!     fn on_extraction_start(&self, _image: ImageId) {
//!         self.started.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { started: AtomicUsize::new(0) });
//!
//! let config = OcrConfig::builder()
//!     .observer(observer as Arc<dyn SessionObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::session::{ExtractionState, ImageId};
use std::sync::Arc;

/// Called by [`crate::session::Session`] on every state transition.
///
/// Settlement callbacks run on the tokio worker that finished the request,
/// so implementations must be `Send + Sync`. All methods have no-op
/// defaults. Callbacks are invoked after the session lock is released and
/// may call back into the session.
pub trait SessionObserver: Send + Sync {
    /// A new image replaced the previous one.
    ///
    /// # Arguments
    /// * `image`     — identity assigned to the new image
    /// * `mime_type` — declared MIME type
    /// * `bytes`     — decoded size of the image
    fn on_image_loaded(&self, image: ImageId, mime_type: &str, bytes: usize) {
        let _ = (image, mime_type, bytes);
    }

    /// The image was cleared by the user.
    fn on_image_cleared(&self) {}

    /// A request was issued for `image`.
    fn on_extraction_start(&self, image: ImageId) {
        let _ = image;
    }

    /// A request settled and its outcome was applied.
    fn on_extraction_settled(&self, image: ImageId, state: &ExtractionState) {
        let _ = (image, state);
    }

    /// A request settled after its image was replaced; the outcome was
    /// dropped.
    fn on_stale_response(&self, image: ImageId) {
        let _ = image;
    }

    /// LaTeX text was written to the clipboard.
    fn on_copied(&self, chars: usize) {
        let _ = chars;
    }
}

/// A no-op implementation for callers that don't need events.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::OcrConfig`].
pub type SharedObserver = Arc<dyn SessionObserver>;
