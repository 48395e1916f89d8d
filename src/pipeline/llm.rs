//! VLM interaction: send one page image plus the prompt, get Markdown back.
//!
//! [`Extractor`] is the seam between the pipeline and the network. Two
//! implementations ship:
//!
//! * [`ChatCompletionsExtractor`] speaks the OpenAI-compatible
//!   `/chat/completions` wire format directly with `reqwest`, forwarding the
//!   caller's API key as the bearer token. This is the default backend.
//! * [`ProviderExtractor`] delegates to any `edgequake_llm` provider
//!   (OpenAI, Anthropic, Gemini, Ollama, ...). Those providers authenticate
//!   from their own environment configuration.
//!
//! Extractors make exactly one attempt. Timeouts are enforced by the caller
//! ([`crate::pipeline::invoke`]) so every backend gets the same limit.

use crate::config::{ExtractorBackend, ServiceConfig};
use crate::error::BatchError;
use crate::pipeline::encode::{data_uri, image_data, IMAGE_DETAIL};
use crate::pipeline::normalize::PageImage;
use crate::prompts::ExtractionPrompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// The caller-supplied VLM credential. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// `None` when the key is empty or whitespace.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Markdown produced for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub content: String,
    /// Total tokens reported by the VLM; 0 when it reports none.
    pub tokens_used: u64,
}

/// Why a single VLM call failed.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("provider error: {0}")]
    Provider(String),
}

/// Turns one image into Markdown.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        image: &PageImage,
        prompt: &ExtractionPrompt,
        credential: &ApiKey,
    ) -> Result<Extraction, ExtractError>;
}

/// Build the extractor the config asks for.
pub fn build_extractor(config: &ServiceConfig) -> Result<Arc<dyn Extractor>, BatchError> {
    match &config.backend {
        ExtractorBackend::ChatCompletions { api_base, model } => {
            let client = reqwest::Client::builder()
                .build()
                .map_err(|e| BatchError::Internal(format!("HTTP client: {e}")))?;
            Ok(Arc::new(ChatCompletionsExtractor {
                client,
                endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
                model: model.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            }))
        }
        ExtractorBackend::Provider { name, model } => {
            let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
                BatchError::ProviderNotConfigured {
                    provider: name.clone(),
                    hint: format!("{e}"),
                }
            })?;
            Ok(Arc::new(ProviderExtractor::new(
                provider,
                config.temperature,
                config.max_tokens,
            )))
        }
    }
}

// ── Chat completions over HTTP ───────────────────────────────────────────

/// Extractor for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: WireContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl ChatCompletionsExtractor {
    pub fn new(
        api_base: &str,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    fn request_body<'a>(&'a self, image_url: String, prompt: &'a ExtractionPrompt) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: WireContent::Text(&prompt.system),
                },
                WireMessage {
                    role: "user",
                    content: WireContent::Parts(vec![
                        ContentPart::Text { text: &prompt.user },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: image_url,
                                detail: IMAGE_DETAIL,
                            },
                        },
                    ]),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Interpret a chat-completions response body.
fn parse_chat_response(status: u16, body: &str) -> Result<Extraction, ExtractError> {
    let parsed: Result<ChatResponse, _> = serde_json::from_str(body);
    let success = (200..300).contains(&status);

    match parsed {
        Ok(resp) if success => {
            if let Some(content) = resp
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
            {
                return Ok(Extraction {
                    content,
                    tokens_used: resp.usage.map(|u| u.total_tokens).unwrap_or(0),
                });
            }
            match resp.error.and_then(|e| e.message) {
                Some(message) => Err(ExtractError::Api { status, message }),
                None => Err(ExtractError::Malformed("response has no choices".into())),
            }
        }
        Ok(resp) => Err(ExtractError::Api {
            status,
            message: resp
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {status}")),
        }),
        Err(_) if !success => Err(ExtractError::Api {
            status,
            message: format!("HTTP {status}"),
        }),
        Err(e) => Err(ExtractError::Malformed(e.to_string())),
    }
}

#[async_trait]
impl Extractor for ChatCompletionsExtractor {
    async fn extract(
        &self,
        image: &PageImage,
        prompt: &ExtractionPrompt,
        credential: &ApiKey,
    ) -> Result<Extraction, ExtractError> {
        let start = Instant::now();
        let body = self.request_body(data_uri(image), prompt);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        let extraction = parse_chat_response(status, &text)?;
        debug!(
            "VLM call: {} tokens, {} chars, {:?}",
            extraction.tokens_used,
            extraction.content.len(),
            start.elapsed()
        );
        Ok(extraction)
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Extractor backed by an `edgequake_llm` provider.
///
/// The per-request credential is not used; the provider was configured when
/// it was constructed.
pub struct ProviderExtractor {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl ProviderExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl Extractor for ProviderExtractor {
    async fn extract(
        &self,
        image: &PageImage,
        prompt: &ExtractionPrompt,
        _credential: &ApiKey,
    ) -> Result<Extraction, ExtractError> {
        let messages = vec![
            ChatMessage::system(prompt.system.as_str()),
            ChatMessage::user_with_images(prompt.user.as_str(), vec![image_data(image)]),
        ];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ExtractError::Provider(e.to_string()))?;
        debug!(
            "Provider call: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(Extraction {
            content: response.content,
            tokens_used: (response.prompt_tokens + response.completion_tokens) as u64,
        })
    }
}
