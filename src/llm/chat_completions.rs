//! OpenAI Chat Completions API driver.
//!
//! This module implements [`GenerationBackend`] for the OpenAI Chat Completions
//! API (`/chat/completions`), which most hosted providers also speak.

use futures::StreamExt;
use serde_json::{Value, json};

use crate::prompt::{ContentPart, Message, MessageContent, MessageRole};
use crate::stream::{StreamChunk, Usage};

use super::{
    BackendSettings, ChunkStream, Endpoint, GeneratedText, GenerationBackend, GenerationRequest,
    ensure_success, sse,
};

/// Driver for the OpenAI Chat Completions API.
#[derive(Debug, Clone)]
pub struct ChatCompletionsDriver {
    endpoint: Endpoint,
}

impl ChatCompletionsDriver {
    /// Create a driver talking to `base_url` (API root including `/v1`).
    #[must_use]
    pub fn new(settings: &BackendSettings, base_url: String) -> Self {
        Self {
            endpoint: Endpoint::new(settings, base_url),
        }
    }

    fn body(&self, req: &GenerationRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.endpoint.model,
            "stream": stream,
            "messages": wire_messages(req),
        });
        if let Some(max_tokens) = self.endpoint.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        self.endpoint.with_extra(body)
    }

    async fn send(&self, body: Value) -> anyhow::Result<reqwest::Response> {
        let mut rb = self
            .endpoint
            .http
            .post(self.endpoint.url("chat/completions"))
            .json(&body);
        if let Some(k) = &self.endpoint.api_key {
            rb = rb.bearer_auth(k);
        }
        ensure_success(&self.endpoint.provider, rb.send().await?).await
    }
}

#[async_trait::async_trait]
impl GenerationBackend for ChatCompletionsDriver {
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<GeneratedText> {
        let resp = self.send(self.body(&req, false)).await?;
        let v: Value = resp.json().await?;

        let Some(choice) = v["choices"].get(0) else {
            anyhow::bail!("{} response has no choices", self.endpoint.provider);
        };

        Ok(GeneratedText {
            text: choice["message"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            finish_reason: Some(map_finish_reason(choice["finish_reason"].as_str()).to_string()),
            usage: parse_usage(&v["usage"]),
        })
    }

    async fn stream(&self, req: GenerationRequest) -> anyhow::Result<ChunkStream> {
        let resp = self.send(self.body(&req, true)).await?;
        Ok(openai_chunk_stream(
            self.endpoint.provider.clone(),
            resp,
            chat_delta,
        ))
    }
}

fn chat_delta(choice: &Value) -> Option<&str> {
    choice["delta"]["content"].as_str()
}

/// Map an `OpenAI`-style SSE response onto the chunk vocabulary.
///
/// `delta_text` extracts the new text from `choices[0]` of each event; the
/// rest (`[DONE]`, inline errors, usage, finish reason) is shared by the chat
/// and completion endpoints.
pub(crate) fn openai_chunk_stream(
    provider: String,
    resp: reqwest::Response,
    delta_text: fn(&Value) -> Option<&str>,
) -> ChunkStream {
    let frames = sse::frames(resp);

    let out = async_stream::try_stream! {
        let mut finish_reason: Option<String> = None;
        let mut usage: Option<Usage> = None;

        yield StreamChunk::step_start();

        futures::pin_mut!(frames);
        while let Some(frame) = frames.next().await {
            let frame = frame?;
            if frame.data == "[DONE]" {
                break;
            }

            let v: Value = serde_json::from_str(&frame.data)?;
            if let Some(err) = v.get("error") {
                Err::<(), _>(anyhow::anyhow!("{provider} stream error: {err}"))?;
            }

            if let Some(u) = parse_usage(&v["usage"]) {
                usage = Some(u);
            }

            let choice = &v["choices"][0];
            if let Some(s) = delta_text(choice) {
                if !s.is_empty() {
                    yield StreamChunk::text_delta(s);
                }
            }
            if let Some(fr) = choice["finish_reason"].as_str() {
                finish_reason = Some(fr.to_string());
            }
        }

        let reason = map_finish_reason(finish_reason.as_deref());
        yield StreamChunk::step_finish(reason, usage);
        yield StreamChunk::finish(reason, usage);
    };

    Box::pin(out)
}

/// Translate a chat request into the `messages` array of the wire format.
///
/// The system text, when present, goes first. Text-only content is sent as a
/// string; images switch the message to the array form. Tool parts map to
/// `tool_calls` on assistant turns and to one `tool` message per result.
pub(crate) fn wire_messages(req: &GenerationRequest) -> Vec<Value> {
    let mut out = Vec::with_capacity(req.messages.len() + 1);
    if !req.system.is_empty() {
        out.push(json!({ "role": "system", "content": req.system }));
    }

    for msg in &req.messages {
        match (&msg.role, &msg.content) {
            (MessageRole::Tool, MessageContent::Parts(parts)) => {
                out.extend(parts.iter().filter_map(|p| match p {
                    ContentPart::ToolResult {
                        tool_call_id,
                        result,
                        ..
                    } => Some(json!({
                        "role": "tool",
                        "tool_call_id": tool_call_id,
                        "content": value_text(result),
                    })),
                    _ => None,
                }));
            }
            (MessageRole::Assistant, MessageContent::Parts(parts))
                if parts.iter().any(|p| matches!(p, ContentPart::ToolCall { .. })) =>
            {
                out.push(assistant_with_tool_calls(msg, parts));
            }
            _ => out.push(json!({
                "role": msg.role,
                "content": wire_content(&msg.content),
            })),
        }
    }
    out
}

fn assistant_with_tool_calls(msg: &Message, parts: &[ContentPart]) -> Value {
    let calls: Vec<Value> = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => Some(json!({
                "id": tool_call_id,
                "type": "function",
                "function": { "name": tool_name, "arguments": args.to_string() },
            })),
            _ => None,
        })
        .collect();

    let text = msg.content.joined_text();
    json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { Value::String(text) },
        "tool_calls": calls,
    })
}

fn wire_content(content: &MessageContent) -> Value {
    let MessageContent::Parts(parts) = content else {
        return Value::String(content.joined_text());
    };
    if !parts.iter().any(|p| matches!(p, ContentPart::Image { .. })) {
        return Value::String(content.joined_text());
    }

    let items: Vec<Value> = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
            ContentPart::Image { image, mime_type } => Some(json!({
                "type": "image_url",
                "image_url": { "url": image_url(image, mime_type.as_deref()) },
            })),
            _ => None,
        })
        .collect();
    Value::Array(items)
}

/// URLs pass through; bare base64 payloads become data URLs.
fn image_url(image: &str, mime_type: Option<&str>) -> String {
    if image.starts_with("http://") || image.starts_with("https://") || image.starts_with("data:") {
        image.to_string()
    } else {
        format!("data:{};base64,{image}", mime_type.unwrap_or("image/jpeg"))
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize an `OpenAI` finish reason.
pub(crate) fn map_finish_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("stop") => "stop",
        Some("length") => "length",
        Some("tool_calls" | "function_call") => "tool-calls",
        Some("content_filter") => "content-filter",
        Some(_) => "other",
        None => "unknown",
    }
}

pub(crate) fn parse_usage(v: &Value) -> Option<Usage> {
    let prompt = v.get("prompt_tokens")?.as_u64()?;
    let completion = v.get("completion_tokens")?.as_u64()?;
    Some(Usage::new(prompt, completion))
}
