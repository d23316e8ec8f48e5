//! Configuration types for image-to-LaTeX extraction.
//!
//! All extraction behaviour is controlled through [`OcrConfig`], built via
//! its [`OcrConfigBuilder`]. The same struct feeds the Gemini client, the
//! provider adapter and the [`crate::session::Session`] state machine, so one
//! value describes a whole run.

use crate::error::MathOcrError;
use crate::observer::SessionObserver;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Base URL of the Gemini REST API.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Environment variables searched, in order, for the Gemini credential.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Configuration for an extraction session.
///
/// Built via [`OcrConfig::builder()`] or using [`OcrConfig::default()`].
///
/// # Example
/// ```rust
/// use math_ocr::OcrConfig;
///
/// let config = OcrConfig::builder()
///     .model("gemini-2.5-flash")
///     .request_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct OcrConfig {
    /// Model identifier. If None, [`DEFAULT_MODEL`] for the Gemini client or
    /// the provider's own default.
    pub model: Option<String>,

    /// edgequake-llm provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, Gemini is called directly.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Gemini API key. If None, read from [`API_KEY_VARS`] at startup.
    pub api_key: Option<String>,

    /// Gemini API base URL. Default: [`DEFAULT_API_BASE`].
    pub api_base: String,

    /// Instruction sent alongside the image. If None, uses
    /// [`crate::prompts::LATEX_OCR_PROMPT`].
    pub prompt: Option<String>,

    /// Sampling temperature. Range 0.0–2.0. Default: 0.0.
    ///
    /// Transcription wants the most likely reading, not a creative one.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 2048.
    pub max_tokens: usize,

    /// Per-request timeout in seconds. Default: 60.
    ///
    /// A timed-out request settles as a transport failure, so the session
    /// never stays in `Processing` forever.
    pub request_timeout_secs: u64,

    /// How long the "copied" indicator stays on after a copy. Default: 2 s.
    pub copy_feedback: Duration,

    /// What to do with a response that arrives after the image changed.
    pub response_policy: ResponsePolicy,

    /// Optional observer notified on every session transition.
    pub observer: Option<Arc<dyn SessionObserver>>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            prompt: None,
            temperature: 0.0,
            max_tokens: 2048,
            request_timeout_secs: 60,
            copy_feedback: Duration::from_secs(2),
            response_policy: ResponsePolicy::default(),
            observer: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("copy_feedback", &self.copy_feedback)
            .field("response_policy", &self.response_policy)
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }

    /// The Gemini credential: the explicit key, else the first non-empty
    /// variable in [`API_KEY_VARS`]. Surrounding whitespace is dropped.
    pub fn resolved_api_key(&self) -> Option<String> {
        let explicit = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty());
        if let Some(key) = explicit {
            return Some(key.to_string());
        }
        API_KEY_VARS.iter().find_map(|var| {
            std::env::var(var)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }

    /// Model name for the direct Gemini client.
    pub fn gemini_model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Report a missing Gemini credential on the operator log.
///
/// Never blocks startup: without a key every request fails at call time with
/// an authentication error, which the session surfaces as `Failed`.
pub fn check_credentials(config: &OcrConfig) -> bool {
    match config.resolved_api_key() {
        Some(_) => {
            debug!("Gemini API key found");
            true
        }
        None => {
            error!(
                "Gemini API key is empty or not set ({}); extraction requests will fail",
                API_KEY_VARS.join(" / ")
            );
            false
        }
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn copy_feedback(mut self, window: Duration) -> Self {
        self.config.copy_feedback = window;
        self
    }

    pub fn response_policy(mut self, policy: ResponsePolicy) -> Self {
        self.config.response_policy = policy;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, MathOcrError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(MathOcrError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.request_timeout_secs == 0 {
            return Err(MathOcrError::InvalidConfig(
                "request timeout must be ≥ 1 second".into(),
            ));
        }
        if !(c.api_base.starts_with("http://") || c.api_base.starts_with("https://")) {
            return Err(MathOcrError::InvalidConfig(format!(
                "API base must be an http(s) URL, got '{}'",
                c.api_base
            )));
        }
        if c.prompt.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(MathOcrError::InvalidConfig("prompt must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the session does with a response whose image has since been
/// replaced or cleared.
///
/// Requests cannot be cancelled, so a slow reply may land after the user
/// loaded a different image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponsePolicy {
    /// Apply every result as it arrives, even over a newer image. (default)
    #[default]
    LastRequestWins,
    /// Apply a result only if it was requested for the image currently
    /// loaded; stale results are logged and dropped.
    ImageTagged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = OcrConfig::default();
        assert_eq!(c.gemini_model(), DEFAULT_MODEL);
        assert_eq!(c.api_base, DEFAULT_API_BASE);
        assert_eq!(c.copy_feedback, Duration::from_secs(2));
        assert_eq!(c.response_policy, ResponsePolicy::LastRequestWins);
    }

    #[test]
    fn builder_clamps_temperature() {
        let c = OcrConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn builder_rejects_zero_tokens() {
        let err = OcrConfig::builder().max_tokens(0).build().unwrap_err();
        assert!(matches!(err, MathOcrError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_non_http_base() {
        let err = OcrConfig::builder()
            .api_base("ftp://example.com")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("ftp://example.com"));
    }

    #[test]
    fn builder_rejects_blank_prompt() {
        assert!(OcrConfig::builder().prompt("   ").build().is_err());
    }

    #[test]
    fn explicit_key_is_trimmed() {
        let c = OcrConfig::builder().api_key("  abc123 \n").build().unwrap();
        assert_eq!(c.resolved_api_key().as_deref(), Some("abc123"));
    }

    #[test]
    fn debug_redacts_key() {
        let c = OcrConfig::builder().api_key("secret-key").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }
}
