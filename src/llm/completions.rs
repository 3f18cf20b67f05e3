//! OpenAI Completions API driver.
//!
//! Completion mode sends one flat text prompt to `/completions` instead of a
//! message list. The conversation is rendered as a role-labelled transcript
//! ending in an open assistant turn.

use serde_json::{Value, json};

use crate::prompt::MessageRole;

use super::chat_completions::{map_finish_reason, openai_chunk_stream, parse_usage};
use super::{
    BackendSettings, ChunkStream, Endpoint, GeneratedText, GenerationBackend, GenerationRequest,
    ensure_success,
};

/// Driver for the OpenAI Completions API.
#[derive(Debug, Clone)]
pub struct CompletionsDriver {
    endpoint: Endpoint,
}

impl CompletionsDriver {
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
            "prompt": render_transcript(req),
            "stop": ["\nuser:"],
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
            .post(self.endpoint.url("completions"))
            .json(&body);
        if let Some(k) = &self.endpoint.api_key {
            rb = rb.bearer_auth(k);
        }
        ensure_success(&self.endpoint.provider, rb.send().await?).await
    }
}

#[async_trait::async_trait]
impl GenerationBackend for CompletionsDriver {
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<GeneratedText> {
        let resp = self.send(self.body(&req, false)).await?;
        let v: Value = resp.json().await?;

        let Some(choice) = v["choices"].get(0) else {
            anyhow::bail!("{} response has no choices", self.endpoint.provider);
        };

        Ok(GeneratedText {
            text: choice["text"].as_str().unwrap_or_default().to_string(),
            finish_reason: Some(map_finish_reason(choice["finish_reason"].as_str()).to_string()),
            usage: parse_usage(&v["usage"]),
        })
    }

    async fn stream(&self, req: GenerationRequest) -> anyhow::Result<ChunkStream> {
        let resp = self.send(self.body(&req, true)).await?;
        Ok(openai_chunk_stream(
            self.endpoint.provider.clone(),
            resp,
            completion_text,
        ))
    }
}

fn completion_text(choice: &Value) -> Option<&str> {
    choice["text"].as_str()
}

/// Render a chat request as a completion prompt.
///
/// System text (injected and system-role turns) leads the prompt unlabelled.
/// User and assistant turns follow as `user:`/`assistant:` blocks; only their
/// text parts are kept.
pub(crate) fn render_transcript(req: &GenerationRequest) -> String {
    let mut out = String::new();
    if !req.system.is_empty() {
        out.push_str(&req.system);
        out.push_str("\n\n");
    }

    for msg in &req.messages {
        let text = msg.content.joined_text();
        match msg.role {
            MessageRole::System => {
                out.push_str(&text);
                out.push_str("\n\n");
            }
            MessageRole::User => out.push_str(&format!("user:\n{text}\n\n")),
            MessageRole::Assistant => out.push_str(&format!("assistant:\n{text}\n\n")),
            MessageRole::Tool => {}
        }
    }

    out.push_str("assistant:\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Message;
    use crate::stream::StreamChunk;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver(base_url: &str) -> CompletionsDriver {
        let settings =
            BackendSettings::new("openai", "gpt-3.5-turbo-instruct").with_api_key("sk-test");
        CompletionsDriver::new(&settings, format!("{base_url}/v1"))
    }

    #[test]
    fn test_render_transcript() {
        let req = GenerationRequest {
            messages: vec![
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("suggest a car"),
            ],
            system: "System Message: memories".into(),
        };
        assert_eq!(
            render_transcript(&req),
            "System Message: memories\n\nuser:\nhi\n\nassistant:\nhello\n\nuser:\nsuggest a car\n\nassistant:\n"
        );
    }

    #[test]
    fn test_render_transcript_without_system() {
        let req = GenerationRequest {
            messages: vec![Message::user("q")],
            system: String::new(),
        };
        assert_eq!(render_transcript(&req), "user:\nq\n\nassistant:\n");
    }

    #[tokio::test]
    async fn test_generate_reads_text_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .and(body_partial_json(json!({"prompt": "user:\nq\n\nassistant:\n"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"text": "An SUV.", "finish_reason": "length"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let req = GenerationRequest {
            messages: vec![Message::user("q")],
            system: String::new(),
        };
        let out = driver(&server.uri()).generate(req).await.unwrap();
        assert_eq!(out.text, "An SUV.");
        assert_eq!(out.finish_reason.as_deref(), Some("length"));
        assert_eq!(out.usage, None);
    }

    #[tokio::test]
    async fn test_stream_reads_text_deltas() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"text\":\"An \"}]}\n\n",
            "data: {\"choices\":[{\"text\":\"SUV.\",\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse))
            .mount(&server)
            .await;

        let req = GenerationRequest {
            messages: vec![Message::user("q")],
            system: String::new(),
        };
        let chunks: Vec<StreamChunk> = driver(&server.uri())
            .stream(req)
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;

        let text: String = chunks.iter().filter_map(StreamChunk::text).collect();
        assert_eq!(text, "An SUV.");
        assert_eq!(chunks.last().map(|c| c.kind.as_str()), Some("finish"));
    }
}
