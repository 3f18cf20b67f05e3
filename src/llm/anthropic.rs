//! Anthropic Messages API driver.
//!
//! Authentication and versioning travel as default headers (`x-api-key`,
//! `anthropic-version`). System text is a top-level field rather than a
//! message, and streaming uses named SSE events which are mapped onto the
//! crate's chunk vocabulary:
//!
//! | SSE event             | chunk         |
//! |-----------------------|---------------|
//! | `message_start`       | `step-start`  |
//! | `content_block_delta` | `text-delta`  |
//! | `message_delta`       | (finish reason, usage) |
//! | `message_stop`        | `step-finish`, `finish` |
//! | `error`               | stream error  |

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::ConfigError;
use crate::prompt::{ContentPart, MessageContent, MessageRole};
use crate::stream::{StreamChunk, Usage};

use super::{
    BackendSettings, ChunkStream, Endpoint, GeneratedText, GenerationBackend, GenerationRequest,
    ensure_success, sse,
};

/// Version sent when none is configured.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory on this API.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Driver for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicDriver {
    endpoint: Endpoint,
}

impl AnthropicDriver {
    /// Create a driver talking to `base_url` (API root including `/v1`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the key is missing or not a valid header value.
    pub fn new(settings: &BackendSettings, base_url: String) -> Result<Self, ConfigError> {
        let api_key = settings
            .api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingCredential {
                provider: settings.provider.clone(),
            })?;
        let version = settings.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| ConfigError::Invalid(format!("invalid API key header value: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(version).map_err(|e| {
                ConfigError::Invalid(format!("invalid API version header value: {e}"))
            })?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;

        let mut endpoint = Endpoint::new(settings, base_url);
        endpoint.http = http;
        Ok(Self { endpoint })
    }

    fn body(&self, req: &GenerationRequest, stream: bool) -> Value {
        let (system, messages) = wire_messages(req);
        let mut body = json!({
            "model": self.endpoint.model,
            "stream": stream,
            "max_tokens": self.endpoint.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        self.endpoint.with_extra(body)
    }

    async fn send(&self, body: Value) -> anyhow::Result<reqwest::Response> {
        let resp = self
            .endpoint
            .http
            .post(self.endpoint.url("messages"))
            .json(&body)
            .send()
            .await?;
        ensure_success(&self.endpoint.provider, resp).await
    }
}

#[async_trait::async_trait]
impl GenerationBackend for AnthropicDriver {
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<GeneratedText> {
        let resp = self.send(self.body(&req, false)).await?;
        let v: Value = resp.json().await?;

        let text: String = v["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect()
            })
            .unwrap_or_default();

        Ok(GeneratedText {
            text,
            finish_reason: Some(map_stop_reason(v["stop_reason"].as_str()).to_string()),
            usage: parse_usage(&v["usage"]),
        })
    }

    async fn stream(&self, req: GenerationRequest) -> anyhow::Result<ChunkStream> {
        let resp = self.send(self.body(&req, true)).await?;
        let frames = sse::frames(resp);
        let provider = self.endpoint.provider.clone();

        let out = async_stream::try_stream! {
            let mut stop_reason: Option<String> = None;
            let mut input_tokens = 0;
            let mut output_tokens = 0;

            futures::pin_mut!(frames);
            while let Some(frame) = frames.next().await {
                let frame = frame?;
                let event = frame.event.as_deref().unwrap_or_default();
                match event {
                    "message_start" => {
                        let v: Value = serde_json::from_str(&frame.data)?;
                        input_tokens = v["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0);
                        yield StreamChunk::step_start();
                    }
                    "content_block_delta" => {
                        let v: Value = serde_json::from_str(&frame.data)?;
                        if let Some(text) = v["delta"]["text"].as_str() {
                            if !text.is_empty() {
                                yield StreamChunk::text_delta(text);
                            }
                        }
                    }
                    "message_delta" => {
                        let v: Value = serde_json::from_str(&frame.data)?;
                        if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                            stop_reason = Some(reason.to_string());
                        }
                        if let Some(n) = v["usage"]["output_tokens"].as_u64() {
                            output_tokens = n;
                        }
                    }
                    "message_stop" => {
                        let reason = map_stop_reason(stop_reason.as_deref());
                        let usage = Some(Usage::new(input_tokens, output_tokens));
                        yield StreamChunk::step_finish(reason, usage);
                        yield StreamChunk::finish(reason, usage);
                        break;
                    }
                    "error" => {
                        let v: Value = serde_json::from_str(&frame.data).unwrap_or(Value::Null);
                        let message = v["error"]["message"].as_str().unwrap_or(&frame.data);
                        Err::<(), _>(anyhow::anyhow!("{provider} stream error: {message}"))?;
                    }
                    // ping, content_block_start/stop, and future event types
                    _ => {}
                }
            }
        };

        Ok(Box::pin(out))
    }
}

/// Split a request into the top-level `system` text and the `messages` array.
///
/// System-role turns are folded into the system text after the injected
/// preamble. Tool results travel as user turns. Empty text is dropped, and
/// turns left without content are skipped since the API rejects them.
pub(crate) fn wire_messages(req: &GenerationRequest) -> (String, Vec<Value>) {
    let mut system: Vec<String> = Vec::new();
    if !req.system.is_empty() {
        system.push(req.system.clone());
    }

    let mut messages = Vec::with_capacity(req.messages.len());
    for msg in &req.messages {
        let role = match msg.role {
            MessageRole::System => {
                let text = msg.content.joined_text();
                if !text.is_empty() {
                    system.push(text);
                }
                continue;
            }
            MessageRole::User | MessageRole::Tool => "user",
            MessageRole::Assistant => "assistant",
        };

        let content = match &msg.content {
            MessageContent::Text(text) if text.is_empty() => continue,
            MessageContent::Text(text) => Value::String(text.clone()),
            MessageContent::Parts(parts) => {
                let blocks: Vec<Value> = parts.iter().filter_map(content_block).collect();
                if blocks.is_empty() {
                    continue;
                }
                Value::Array(blocks)
            }
        };
        messages.push(json!({ "role": role, "content": content }));
    }

    (system.join("\n\n"), messages)
}

fn content_block(part: &ContentPart) -> Option<Value> {
    match part {
        ContentPart::Text { text } if text.is_empty() => None,
        ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
        ContentPart::Image { image, mime_type } => {
            let source = if image.starts_with("http://") || image.starts_with("https://") {
                json!({ "type": "url", "url": image })
            } else {
                json!({
                    "type": "base64",
                    "media_type": mime_type.as_deref().unwrap_or("image/jpeg"),
                    "data": image,
                })
            };
            Some(json!({ "type": "image", "source": source }))
        }
        ContentPart::ToolCall {
            tool_call_id,
            tool_name,
            args,
        } => Some(json!({
            "type": "tool_use",
            "id": tool_call_id,
            "name": tool_name,
            "input": args,
        })),
        ContentPart::ToolResult {
            tool_call_id,
            result,
            ..
        } => Some(json!({
            "type": "tool_result",
            "tool_use_id": tool_call_id,
            "content": match result {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        })),
        ContentPart::File { .. } | ContentPart::Unsupported => None,
    }
}

fn map_stop_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("end_turn" | "stop_sequence") => "stop",
        Some("max_tokens") => "length",
        Some("tool_use") => "tool-calls",
        Some(_) => "other",
        None => "unknown",
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()?;
    let output = v.get("output_tokens")?.as_u64()?;
    Some(Usage::new(input, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Message;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver(base_url: &str) -> AnthropicDriver {
        let settings =
            BackendSettings::new("anthropic", "claude-3-5-haiku-latest").with_api_key("test-api-key");
        AnthropicDriver::new(&settings, format!("{base_url}/v1")).unwrap()
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            messages: vec![Message::user("Hello")],
            system: "System Message: memories".into(),
        }
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let settings = BackendSettings::new("anthropic", "claude-3-5-haiku-latest");
        let err = AnthropicDriver::new(&settings, "https://api.anthropic.com/v1".into()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { .. }));
    }

    #[test]
    fn test_wire_messages_fold_system_turns() {
        let req = GenerationRequest {
            messages: vec![
                Message::text(MessageRole::System, "Be brief."),
                Message::user("hi"),
                Message::assistant(""),
            ],
            system: "System Message: memories".into(),
        };
        let (system, messages) = wire_messages(&req);
        assert_eq!(system, "System Message: memories\n\nBe brief.");
        assert_eq!(messages, vec![json!({"role": "user", "content": "hi"})]);
    }

    #[test]
    fn test_wire_messages_base64_image() {
        let req = GenerationRequest {
            messages: vec![Message::parts(
                MessageRole::User,
                vec![ContentPart::Image {
                    image: "aGVsbG8=".into(),
                    mime_type: Some("image/png".into()),
                }],
            )],
            system: String::new(),
        };
        let (_, messages) = wire_messages(&req);
        assert_eq!(messages[0]["content"][0]["source"]["media_type"], "image/png");
    }

    #[tokio::test]
    async fn test_generate_sends_headers_and_system() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-api-key"))
            .and(header("anthropic-version", DEFAULT_API_VERSION))
            .and(body_partial_json(json!({
                "system": "System Message: memories",
                "max_tokens": 1024,
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_test",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "Hi there!"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = driver(&server.uri()).generate(request()).await.unwrap();
        assert_eq!(out.text, "Hi there!");
        assert_eq!(out.finish_reason.as_deref(), Some("stop"));
        assert_eq!(out.usage, Some(Usage::new(10, 5)));
    }

    #[tokio::test]
    async fn test_stream_maps_events() {
        let server = MockServer::start().await;
        let sse = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":7}}}\n\n",
            "event: ping\ndata: {}\n\n",
            "event: content_block_delta\n",
            "data: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_delta\n",
            "data: {\"delta\":{\"stop_reason\":\"max_tokens\"},\"usage\":{\"output_tokens\":2}}\n\n",
            "event: message_stop\ndata: {}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let chunks: Vec<StreamChunk> = driver(&server.uri())
            .stream(request())
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;

        let kinds: Vec<_> = chunks.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["step-start", "text-delta", "text-delta", "step-finish", "finish"]
        );
        assert_eq!(chunks[4].payload["finishReason"], "length");
        assert_eq!(chunks[4].payload["usage"]["totalTokens"], 9);
    }

    #[tokio::test]
    async fn test_stream_error_event() {
        let server = MockServer::start().await;
        let sse = "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse))
            .mount(&server)
            .await;

        let items: Vec<_> = driver(&server.uri()).stream(request()).await.unwrap().collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().is_err_and(|e| e.to_string().contains("Overloaded")));
    }
}
