//! HTTP surface tests over in-process fakes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::stream;
use http_body_util::BodyExt;
use memloom::AppState;
use memloom::error::MemoryError;
use memloom::llm::{
    BackendSettings, ChunkStream, GeneratedText, GenerationBackend, GenerationRequest,
};
use memloom::memory::{
    MemoryRecord, MemoryScope, MemoryStore, PersistenceWorker, RetrievalResult,
};
use memloom::orchestrator::MemoryOrchestrator;
use memloom::prompt::Message;
use memloom::server::router;
use memloom::stream::StreamChunk;
use serde_json::{Value, json};
use tower::ServiceExt;

#[derive(Debug)]
struct ScriptedBackend {
    fail: bool,
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<GeneratedText> {
        if self.fail {
            anyhow::bail!("backend unavailable");
        }
        Ok(GeneratedText {
            text: format!("system=[{}]", req.system),
            finish_reason: Some("stop".into()),
            usage: None,
        })
    }

    async fn stream(&self, _req: GenerationRequest) -> anyhow::Result<ChunkStream> {
        if self.fail {
            anyhow::bail!("backend unavailable");
        }
        Ok(Box::pin(stream::iter(vec![
            Ok::<_, anyhow::Error>(StreamChunk::step_start()),
            Ok(StreamChunk::text_delta("Hel")),
            Ok(StreamChunk::text_delta("lo")),
            Ok(StreamChunk::step_finish("stop", None)),
            Ok(StreamChunk::finish("stop", None)),
        ])))
    }
}

#[derive(Debug, Default)]
struct RecordingStore {
    search_fails: bool,
    searches: Mutex<Vec<(String, MemoryScope)>>,
    adds: Mutex<Vec<Vec<Message>>>,
}

#[async_trait]
impl MemoryStore for RecordingStore {
    async fn search(
        &self,
        query: &str,
        scope: &MemoryScope,
    ) -> Result<RetrievalResult, MemoryError> {
        self.searches
            .lock()
            .unwrap()
            .push((query.to_string(), scope.clone()));
        if self.search_fails {
            return Err(MemoryError::Status {
                status: 503,
                body: "down".into(),
            });
        }
        Ok(RetrievalResult {
            results: vec![MemoryRecord {
                id: Some("m1".into()),
                memory: "likes tea".into(),
                categories: None,
                score: None,
            }],
        })
    }

    async fn add(
        &self,
        messages: &[Message],
        _scope: &MemoryScope,
    ) -> Result<Value, MemoryError> {
        self.adds.lock().unwrap().push(messages.to_vec());
        Ok(json!({"results": []}))
    }
}

fn app(backend_fails: bool, store: Arc<RecordingStore>) -> axum::Router {
    let store: Arc<dyn MemoryStore> = store;
    let (handle, _worker) = PersistenceWorker::spawn(Arc::clone(&store), 8);
    let orchestrator = MemoryOrchestrator::with_backend(
        BackendSettings::new("scripted", "test-model"),
        Arc::new(ScriptedBackend {
            fail: backend_fails,
        }),
        store,
        handle,
    );
    router(AppState {
        orchestrator: Arc::new(orchestrator),
        default_top_k: 3,
    })
}

async fn post(app: axum::Router, uri: &str, body: Value) -> (StatusCode, String) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Background adds land after the response; poll until `n` have arrived.
async fn wait_for_adds(store: &RecordingStore, n: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.adds.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_health_reports_backend() {
    let response = app(false, Arc::default())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["provider"], "scripted");
    assert_eq!(body["model"], "test-model");
}

#[tokio::test]
async fn test_generate_returns_augmented_output() {
    let store = Arc::new(RecordingStore::default());
    let (status, body) = post(
        app(false, Arc::clone(&store)),
        "/api/generate",
        json!({"prompt": "what do I drink?", "scope": {"user_id": "u1"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert!(body["text"].as_str().unwrap().contains("Memory: likes tea"));
    assert_eq!(body["finishReason"], "stop");
    assert_eq!(body["memoryUpdate"]["status"], "scheduled");
    assert!(body["requestId"].is_string());

    let searches = store.searches.lock().unwrap();
    assert_eq!(searches[0].0, "what do I drink?");
    assert_eq!(searches[0].1.user_id.as_deref(), Some("u1"));
    assert_eq!(searches[0].1.top_k, 3);
    drop(searches);

    wait_for_adds(&store, 1).await;
    assert_eq!(store.adds.lock().unwrap()[0], vec![Message::user("what do I drink?")]);
}

#[tokio::test]
async fn test_generate_backend_failure_is_bad_gateway() {
    let store = Arc::new(RecordingStore::default());
    let (status, body) = post(
        app(true, Arc::clone(&store)),
        "/api/generate",
        json!({"prompt": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let body: Value = serde_json::from_str(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("backend unavailable"));
    assert!(store.adds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_omits_step_markers() {
    let (status, body) = post(
        app(false, Arc::default()),
        "/api/stream",
        json!({"prompt": "hi", "scope": {"user_id": "u1"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let events: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(events, vec!["text-delta", "text-delta", "finish"]);
    assert!(!body.contains("step-start"));
    assert!(!body.contains("step-finish"));
}

#[tokio::test]
async fn test_stream_start_failure_is_single_error_event() {
    let (status, body) = post(app(true, Arc::default()), "/api/stream", json!({"prompt": "hi"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("event: error\n"));
    assert!(body.contains("backend unavailable"));
}

#[tokio::test]
async fn test_search_failure_is_bad_gateway_but_retrieve_degrades() {
    let store = Arc::new(RecordingStore {
        search_fails: true,
        ..RecordingStore::default()
    });

    let (status, _) = post(
        app(false, Arc::clone(&store)),
        "/api/memories/search",
        json!({"prompt": "tea"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, body) = post(
        app(false, Arc::clone(&store)),
        "/api/memories/retrieve",
        json!({"prompt": "tea"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"preamble": ""}));
}

#[tokio::test]
async fn test_search_returns_records() {
    let (status, body) = post(
        app(false, Arc::default()),
        "/api/memories/search",
        json!({"prompt": [{"role": "user", "content": "tea"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["results"][0]["memory"], "likes tea");
}

#[tokio::test]
async fn test_add_stores_each_text_part() {
    let store = Arc::new(RecordingStore::default());
    let (status, _) = post(
        app(false, Arc::clone(&store)),
        "/api/memories",
        json!({
            "prompt": [{"role": "user", "content": [
                {"type": "text", "text": "I like tea."},
                {"type": "text", "text": "I live in Oslo."}
            ]}],
            "scope": {"user_id": "u1"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        store.adds.lock().unwrap()[0],
        vec![Message::user("I like tea."), Message::user("I live in Oslo.")]
    );
}

#[tokio::test]
async fn test_non_object_scope_is_bad_request() {
    let (status, body) = post(
        app(false, Arc::default()),
        "/api/generate",
        json!({"prompt": "hi", "scope": "u1"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("scope must be an object"));
}
