//! HTTP client for the memory service.
//!
//! Search is idempotent and retried on transient failures with exponential
//! backoff. Add is never retried, so a write is never duplicated.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::{MemoryRecord, MemoryScope, MemoryStore, RetrievalResult};
use crate::error::{ConfigError, MemoryError};
use crate::prompt::Message;

/// Connection settings for [`HttpMemoryClient`].
#[derive(Clone)]
pub struct MemoryClientSettings {
    /// Service root, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Sent as `Authorization: Token <key>` when set.
    pub api_key: Option<String>,
    pub search_path: String,
    pub add_path: String,
    /// Extra attempts after a transient search failure.
    pub search_retries: u32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
}

impl std::fmt::Debug for MemoryClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClientSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("search_path", &self.search_path)
            .field("add_path", &self.add_path)
            .field("search_retries", &self.search_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MemoryClientSettings {
    /// Settings with the default paths and retry policy.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            search_path: "/search/".to_string(),
            add_path: "/memories/".to_string(),
            search_retries: 2,
            retry_backoff: Duration::from_millis(200),
            timeout: Duration::from_secs(60),
        }
    }
}

/// [`MemoryStore`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMemoryClient {
    http: reqwest::Client,
    search_url: Url,
    add_url: Url,
    settings: MemoryClientSettings,
}

impl HttpMemoryClient {
    pub fn new(settings: MemoryClientSettings) -> Result<Self, ConfigError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|e| ConfigError::Invalid(format!("memory base_url: {e}")))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| ConfigError::Invalid(format!("memory path `{path}`: {e}")))
        };
        let search_url = join(&settings.search_path)?;
        let add_url = join(&settings.add_path)?;

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("memory HTTP client: {e}")))?;

        Ok(Self {
            http,
            search_url,
            add_url,
            settings,
        })
    }

    fn post(&self, url: &Url) -> reqwest::RequestBuilder {
        let rb = self.http.post(url.clone());
        match &self.settings.api_key {
            Some(key) => rb.header(reqwest::header::AUTHORIZATION, format!("Token {key}")),
            None => rb,
        }
    }

    /// Send a POST and return the parsed JSON body of a success response.
    async fn post_json(
        &self,
        url: &Url,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, MemoryError> {
        let response = self.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(MemoryError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| MemoryError::Format(e.to_string()))
    }

    async fn search_once(&self, body: &serde_json::Value) -> Result<RetrievalResult, MemoryError> {
        let value = self.post_json(&self.search_url, body).await?;
        parse_results(value)
    }
}

/// Build the search request body.
pub fn search_body(query: &str, scope: &MemoryScope) -> serde_json::Value {
    let filters: serde_json::Map<_, _> = scope
        .identity_fields()
        .into_iter()
        .filter(|(k, _)| matches!(k.as_str(), "user_id" | "app_id" | "agent_id" | "run_id"))
        .collect();

    let mut body = json!({
        "query": query,
        "filters": filters,
        "top_k": scope.top_k,
        "version": "v2",
    });
    if let Some(org_id) = &scope.org_id {
        body["org_id"] = json!(org_id);
    }
    if let Some(project_id) = &scope.project_id {
        body["project_id"] = json!(project_id);
    }
    body
}

/// Build the add request body: messages plus the scope spread at top level.
pub fn add_body(messages: &[Message], scope: &MemoryScope) -> serde_json::Value {
    let mut body = scope.identity_fields();
    body.insert("messages".to_string(), json!(messages));
    serde_json::Value::Object(body)
}

fn parse_results(mut value: serde_json::Value) -> Result<RetrievalResult, MemoryError> {
    let results = value
        .get_mut("results")
        .map(serde_json::Value::take)
        .ok_or_else(|| MemoryError::Format("response has no `results` field".to_string()))?;
    let results: Vec<MemoryRecord> =
        serde_json::from_value(results).map_err(|e| MemoryError::Format(e.to_string()))?;
    Ok(RetrievalResult { results })
}

#[async_trait::async_trait]
impl MemoryStore for HttpMemoryClient {
    async fn search(
        &self,
        query: &str,
        scope: &MemoryScope,
    ) -> Result<RetrievalResult, MemoryError> {
        let body = search_body(query, scope);
        let mut attempt = 0;

        loop {
            match self.search_once(&body).await {
                Ok(result) => {
                    debug!(record_count = result.len(), attempt, "Memory search completed");
                    return Ok(result);
                }
                Err(e) if e.is_transient() && attempt < self.settings.search_retries => {
                    let delay = self.settings.retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(attempt, delay = ?delay, error = %e, "Memory search failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn add(
        &self,
        messages: &[Message],
        scope: &MemoryScope,
    ) -> Result<serde_json::Value, MemoryError> {
        let body = add_body(messages, scope);
        let confirmation = self.post_json(&self.add_url, &body).await?;
        debug!(message_count = messages.len(), "Memory add accepted");
        Ok(confirmation)
    }
}
