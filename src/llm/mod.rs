//! Generation backends.
//!
//! A backend is anything implementing [`GenerationBackend`]: a blocking
//! `generate` and a streaming `stream`. Backends are built from
//! [`BackendSettings`] by the [`ProviderRegistry`], which maps provider names
//! to factories and rejects unknown names before any network call is made.
//!
//! # Drivers
//!
//! - [`ChatCompletionsDriver`]: OpenAI-compatible chat (`/chat/completions`)
//! - [`CompletionsDriver`]: OpenAI completion mode (`/completions`)
//! - [`AnthropicDriver`]: Anthropic Messages API (`/messages`)
//!
//! # Example
//!
//! ```rust,ignore
//! use memloom::llm::{BackendSettings, ProviderRegistry};
//!
//! let settings = BackendSettings::new("groq", "llama-3.1-8b-instant").with_api_key("gsk-...");
//! let backend = ProviderRegistry::with_defaults().build(&settings)?;
//! let stream = backend.stream(request).await?;
//! ```

pub mod anthropic;
pub mod chat_completions;
pub mod completions;
pub mod provider;
pub mod registry;
mod sse;

pub use anthropic::AnthropicDriver;
pub use chat_completions::ChatCompletionsDriver;
pub use completions::CompletionsDriver;
pub use provider::ProviderPreset;
pub use registry::{BackendFactory, ProviderRegistry};

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::prompt::Message;
use crate::stream::{StreamChunk, Usage};

/// Calling convention of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    /// Message-based chat API.
    Chat,
    /// Single-prompt text completion API.
    Completion,
}

impl std::fmt::Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Completion => write!(f, "completion"),
        }
    }
}

/// Backend identity: provider, model, and provider-specific settings.
#[derive(Clone)]
pub struct BackendSettings {
    /// Provider name, looked up in the [`ProviderRegistry`].
    pub provider: String,
    /// Model identifier.
    pub model: String,
    pub api_key: Option<String>,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    /// Calling convention; `None` selects the provider's primary one.
    pub mode: Option<ModelMode>,
    pub max_tokens: Option<u32>,
    /// API version header, for providers that version their API (Anthropic).
    pub api_version: Option<String>,
    /// Extra fields merged into every request body.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("mode", &self.mode)
            .field("max_tokens", &self.max_tokens)
            .field("api_version", &self.api_version)
            .field("extra", &self.extra)
            .finish()
    }
}

impl BackendSettings {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            base_url: None,
            mode: None,
            max_tokens: None,
            api_version: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ModelMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Input to a backend call.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// The caller's structured prompt, unmodified.
    pub messages: Vec<Message>,
    /// Injected system text; empty when there is nothing to inject.
    pub system: String,
}

/// Output of a blocking backend call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedText {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Raw token stream returned by a backend.
pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// The generation capability the orchestrator dispatches to.
///
/// Implementations hold only credentials and configuration, so one instance
/// may serve concurrent calls.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync + std::fmt::Debug {
    /// Generate a complete response.
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<GeneratedText>;

    /// Start a streaming response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be started; failures after that
    /// arrive as items of the stream.
    async fn stream(&self, req: GenerationRequest) -> anyhow::Result<ChunkStream>;
}

/// Connection details shared by the HTTP drivers.
#[derive(Clone)]
pub(crate) struct Endpoint {
    pub http: reqwest::Client,
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    pub fn new(settings: &BackendSettings, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            provider: settings.provider.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            extra: settings.extra.clone(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Merge the provider-specific extras into a request body.
    pub fn with_extra(&self, mut body: serde_json::Value) -> serde_json::Value {
        if let Some(map) = body.as_object_mut() {
            for (k, v) in &self.extra {
                map.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        body
    }
}

/// Fail with the response body when the status is not a success.
pub(crate) async fn ensure_success(
    provider: &str,
    resp: reqwest::Response,
) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    anyhow::bail!("{provider} returned {status}: {body}")
}
