//! Pipeline stages for image-to-LaTeX extraction.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the model backend can change without touching the
//! others.
//!
//! ## Data Flow
//!
//! ```text
//! acquire ──▶ data_url ──▶ model ──▶ normalize
//! (file/drop/  (base64 +    (VLM)     (fence strip
//!  clipboard)   MIME)                  + trim)
//! ```
//!
//! 1. [`acquire`]   — read a picked file, filter drops, pull clipboard images
//! 2. [`data_url`]  — hold the image as a `data:` URL and split it back into
//!    payload and MIME type for the request body
//! 3. [`model`]     — the single network call; Gemini REST or an
//!    edgequake-llm provider
//! 4. [`normalize`] — strip the code fences models add despite the prompt

pub mod acquire;
pub mod data_url;
pub mod model;
pub mod normalize;
