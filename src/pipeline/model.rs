//! Vision model calls: one image plus one instruction in, one text reply out.
//!
//! [`VisionModel`] is the seam between the session state machine and the
//! network. Two implementations ship with the crate:
//!
//! * [`GeminiClient`] — talks to the Gemini `generateContent` REST endpoint
//!   directly with reqwest. This is the default backend.
//! * [`ProviderModel`] — adapts any `edgequake_llm::LLMProvider` (OpenAI,
//!   Anthropic, Ollama, ...), for users who already run another VLM.
//!
//! Exactly one request is made per call. There is no retry: a failed
//! extraction is shown to the user, who decides whether to try again.

use crate::config::OcrConfig;
use crate::error::{ExtractionError, MathOcrError};
use crate::pipeline::data_url::DataUrl;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything a single extraction request carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionRequest {
    /// Base64-encoded image bytes.
    pub image_base64: String,
    /// MIME type of the image.
    pub mime_type: String,
    /// Instruction sent with the image.
    pub instruction: String,
}

impl VisionRequest {
    /// Build a request from a stored data URL.
    pub fn from_data_url(url: &DataUrl, instruction: &str) -> Result<Self, ExtractionError> {
        let parts = url.split()?;
        Ok(Self {
            image_base64: parts.payload.to_string(),
            mime_type: parts.mime_type.to_string(),
            instruction: instruction.to_string(),
        })
    }
}

/// A remote model that reads an image and answers with text.
pub trait VisionModel: Send + Sync + 'static {
    /// Human-readable backend label for logs, e.g. `gemini/gemini-2.5-flash`.
    fn label(&self) -> &str;

    /// Issue one request and return the raw reply text.
    fn extract(
        &self,
        request: &VisionRequest,
    ) -> impl Future<Output = Result<String, ExtractionError>> + Send;
}

// ── Gemini ───────────────────────────────────────────────────────────────

/// Direct client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: usize,
    label: String,
}

impl GeminiClient {
    /// Build a client from the config.
    ///
    /// A missing key is not an error here: it is logged by
    /// [`crate::config::check_credentials`] and requests fail at call time.
    pub fn from_config(config: &OcrConfig) -> Result<Self, MathOcrError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MathOcrError::Internal(format!("Failed to build HTTP client: {e}")))?;

        let model = config.gemini_model().to_string();
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            label: format!("gemini/{model}"),
            model,
            api_key: config.resolved_api_key().unwrap_or_default(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Full URL of the `generateContent` call.
    pub fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.api_base, self.model)
    }
}

impl VisionModel for GeminiClient {
    fn label(&self) -> &str {
        &self.label
    }

    async fn extract(&self, request: &VisionRequest) -> Result<String, ExtractionError> {
        let start = Instant::now();
        let body = GenerateContentRequest::new(request, self.temperature, self.max_tokens);
        debug!(
            "POST {} ({} base64 bytes, {})",
            self.endpoint(),
            request.image_base64.len(),
            request.mime_type
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;
        debug!("Gemini replied {} in {:?}", status, start.elapsed());

        if !status.is_success() {
            return Err(parse_error_body(status.as_u16(), &bytes));
        }
        parse_response_body(&bytes)
    }
}

fn transport_error(e: reqwest::Error) -> ExtractionError {
    if e.is_timeout() {
        ExtractionError::Transport(format!("request timed out: {e}"))
    } else {
        ExtractionError::Transport(e.to_string())
    }
}

// Wire types for `generateContent`. Field names follow the REST API's
// camelCase JSON.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 2],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPart<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

impl<'a> GenerateContentRequest<'a> {
    /// Image part first, instruction second.
    fn new(request: &'a VisionRequest, temperature: f32, max_tokens: usize) -> Self {
        Self {
            contents: [RequestContent {
                parts: [
                    RequestPart {
                        inline_data: Some(InlineData {
                            mime_type: &request.mime_type,
                            data: &request.image_base64,
                        }),
                        text: None,
                    },
                    RequestPart {
                        inline_data: None,
                        text: Some(&request.instruction),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: max_tokens,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    status: Option<String>,
}

/// Concatenate the text parts of the first candidate.
fn parse_response_body(body: &[u8]) -> Result<String, ExtractionError> {
    let parsed: GenerateContentResponse = serde_json::from_slice(body)
        .map_err(|e| ExtractionError::MalformedResponse(format!("invalid JSON: {e}")))?;

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ExtractionError::MalformedResponse(format!(
            "request blocked by the model: {reason}"
        )));
    }

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ExtractionError::MalformedResponse("reply has no candidates".into()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(ExtractionError::MalformedResponse(format!(
            "reply has no text (finish reason: {reason})"
        )));
    }
    Ok(text)
}

/// Turn a non-2xx reply into an [`ExtractionError::Api`].
fn parse_error_body(status: u16, body: &[u8]) -> ExtractionError {
    let message = match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(ApiErrorBody { error }) => match error.status {
            Some(code) if !error.message.is_empty() => format!("{} ({code})", error.message),
            _ => error.message,
        },
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    };
    ExtractionError::Api {
        status: Some(status),
        message,
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Adapter over an edgequake-llm provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, config: &OcrConfig) -> Self {
        Self {
            provider,
            label: label.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

impl VisionModel for ProviderModel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn extract(&self, request: &VisionRequest) -> Result<String, ExtractionError> {
        let image = ImageData::new(request.image_base64.clone(), request.mime_type.as_str());
        let messages = vec![ChatMessage::user_with_images(
            request.instruction.as_str(),
            vec![image],
        )];
        let options = self.options();

        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| {
                ExtractionError::Transport(format!("request timed out after {:?}", self.timeout))
            })?
            .map_err(|e| ExtractionError::Api {
                status: None,
                message: e.to_string(),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(ExtractionError::MalformedResponse(
                "provider returned no text".into(),
            ));
        }
        Ok(response.content)
    }
}

// ── Backend selection ────────────────────────────────────────────────────

/// The backend picked by [`resolve_model`].
pub enum Backend {
    Gemini(GeminiClient),
    Provider(ProviderModel),
}

impl VisionModel for Backend {
    fn label(&self) -> &str {
        match self {
            Backend::Gemini(c) => c.label(),
            Backend::Provider(p) => p.label(),
        }
    }

    async fn extract(&self, request: &VisionRequest) -> Result<String, ExtractionError> {
        match self {
            Backend::Gemini(c) => c.extract(request).await,
            Backend::Provider(p) => p.extract(request).await,
        }
    }
}

/// Resolve the backend, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is.
/// 2. **Named provider + model** (`config.provider_name`) — built through
///    [`ProviderFactory::create_llm_provider`], which reads that provider's
///    API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    both non-empty.
/// 4. **Gemini direct** — the default; a missing key is logged, not fatal.
pub fn resolve_model(config: &OcrConfig) -> Result<Backend, MathOcrError> {
    if let Some(ref provider) = config.provider {
        info!("Using caller-supplied vision provider");
        return Ok(Backend::Provider(ProviderModel::new(
            Arc::clone(provider),
            "custom",
            config,
        )));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or_else(|| default_model_for(name));
        return create_provider(name, model, config);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model, config);
        }
    }

    crate::config::check_credentials(config);
    let client = GeminiClient::from_config(config)?;
    info!("Using {}", client.label());
    Ok(Backend::Gemini(client))
}

fn create_provider(name: &str, model: &str, config: &OcrConfig) -> Result<Backend, MathOcrError> {
    let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        MathOcrError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    info!("Using {}/{}", name, model);
    Ok(Backend::Provider(ProviderModel::new(
        provider,
        format!("{name}/{model}"),
        config,
    )))
}

/// Vision-capable default model per provider name.
fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "openai" | "azure" => "gpt-4.1-mini",
        "anthropic" => "claude-sonnet-4-20250514",
        "ollama" | "lmstudio" => "llava",
        "mistral" => "pixtral-12b-2409",
        _ => crate::config::DEFAULT_MODEL,
    }
}
