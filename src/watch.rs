//! Clipboard paste watching as a scoped subscription.
//!
//! ## Why a guard?
//!
//! A paste listener is process-wide state. Registering one per view (or per
//! `--watch` run) without tearing it down leaks a handler that keeps
//! firing after its owner is gone. [`subscribe_paste`] therefore returns a
//! [`PasteSubscription`] guard next to the stream: dropping the guard stops
//! the background poller and ends the stream.
//!
//! Pasted images are detected by polling the clipboard. Whatever image is on
//! the clipboard when the subscription starts is taken as the baseline and
//! not reported; only images that appear afterwards are. The same image is
//! never reported twice in a row.

use crate::clipboard::ClipboardSource;
use crate::pipeline::acquire::ImageBlob;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// A stream of pasted images.
pub type PasteStream = Pin<Box<dyn Stream<Item = ImageBlob> + Send>>;

/// Default interval between clipboard polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Keeps the paste listener registered. Drop it to deregister.
#[derive(Debug)]
pub struct PasteSubscription {
    task: JoinHandle<()>,
}

impl PasteSubscription {
    /// Deregister the listener now. Same as dropping the guard.
    pub fn unsubscribe(self) {}

    /// `true` until the listener has stopped.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PasteSubscription {
    fn drop(&mut self) {
        self.task.abort();
        debug!("Paste listener deregistered");
    }
}

/// Start listening for pasted images.
///
/// Must be called inside a tokio runtime.
pub fn subscribe_paste<S>(source: S, poll_interval: Duration) -> (PasteSubscription, PasteStream)
where
    S: ClipboardSource + Clone,
{
    let (tx, rx) = mpsc::channel(4);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_seen: Option<u64> = None;
        let mut primed = false;

        loop {
            ticker.tick().await;
            let src = source.clone();
            let read = match tokio::task::spawn_blocking(move || src.read_image()).await {
                Ok(read) => read,
                Err(e) => {
                    warn!("Clipboard poll task failed: {e}");
                    break;
                }
            };

            let blob = match read {
                Ok(Some(blob)) => blob,
                Ok(None) => {
                    primed = true;
                    continue;
                }
                Err(e) => {
                    debug!("Clipboard read failed: {e}");
                    continue;
                }
            };

            let print = fingerprint(&blob);
            if last_seen == Some(print) {
                continue;
            }
            last_seen = Some(print);

            if !primed {
                primed = true;
                debug!("Clipboard already holds an image; waiting for a new paste");
                continue;
            }
            if tx.send(blob).await.is_err() {
                debug!("Paste stream dropped; stopping listener");
                break;
            }
        }
    });

    debug!("Paste listener registered (polling every {:?})", poll_interval);
    (PasteSubscription { task }, Box::pin(ReceiverStream::new(rx)))
}

fn fingerprint(blob: &ImageBlob) -> u64 {
    let mut h = DefaultHasher::new();
    blob.mime_type.hash(&mut h);
    blob.bytes.hash(&mut h);
    h.finish()
}
