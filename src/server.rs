use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::error::Error;
use crate::llm::ProviderRegistry;
use crate::memory::{HttpMemoryClient, MemoryScope, MemoryStore, PersistenceWorker};
use crate::orchestrator::MemoryOrchestrator;
use crate::prompt::Prompt;
use crate::stream::{StreamChunk, sse_event};

/// Start the Axum server with the provided configuration.
///
/// Returns after a shutdown signal once queued memory updates have drained.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let settings = config.generation.backend_settings();
    info!(
        name: "llm.config.loaded",
        provider = %settings.provider,
        model = %settings.model,
        mode = ?settings.mode,
        "Generation configuration loaded"
    );

    let store: Arc<dyn MemoryStore> =
        Arc::new(HttpMemoryClient::new(config.memory.client_settings())?);
    info!(
        name: "memory.config.loaded",
        base_url = %config.memory.base_url,
        "Memory service configured"
    );

    let (persistence, worker) =
        PersistenceWorker::spawn(Arc::clone(&store), config.memory.queue_capacity);
    let orchestrator = MemoryOrchestrator::new(
        settings,
        &ProviderRegistry::with_defaults(),
        store,
        persistence,
    )?;

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        default_top_k: config.memory.default_top_k,
    };
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(name: "server.stopping", "Draining memory updates");
    worker.join().await;
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Build the HTTP routes over an application state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(api_generate))
        .route("/api/stream", post(api_stream))
        .route("/api/memories", post(api_add_memories))
        .route("/api/memories/search", post(api_search_memories))
        .route("/api/memories/retrieve", post(api_retrieve_memories))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // 10MB limit
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body shared by every API route.
#[derive(Debug, Deserialize)]
struct MemoryRequest {
    prompt: Prompt,
    /// Raw scope; `top_k` falls back to the configured default.
    #[serde(default)]
    scope: Option<Value>,
}

impl MemoryRequest {
    fn into_parts(self, default_top_k: usize) -> Result<(Prompt, MemoryScope), ApiError> {
        let mut raw = match self.scope {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(ApiError::BadRequest("scope must be an object".into())),
        };
        raw.entry("top_k").or_insert_with(|| json!(default_top_k));

        let scope = serde_json::from_value(Value::Object(raw))
            .map_err(|e| ApiError::BadRequest(format!("invalid scope: {e}")))?;
        Ok((self.prompt, scope))
    }
}

/// Error body: `{"error": "..."}`.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Orchestrator(Error),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Orchestrator(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Orchestrator(e @ Error::Config(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Orchestrator(e @ (Error::Memory(_) | Error::Generation(_))) => {
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// GET /health - Liveness and backend identity.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let settings = state.orchestrator.settings();
    Json(json!({
        "status": "ok",
        "provider": settings.provider,
        "model": settings.model,
    }))
}

/// POST /api/generate - Blocking memory-augmented generation.
async fn api_generate(
    State(state): State<AppState>,
    Json(req): Json<MemoryRequest>,
) -> Result<Response, ApiError> {
    let (prompt, scope) = req.into_parts(state.default_top_k)?;
    let generated = state.orchestrator.generate(&prompt, &scope).await?;
    Ok(Json(generated).into_response())
}

/// POST /api/stream - Streaming generation as SSE, step markers removed.
async fn api_stream(
    State(state): State<AppState>,
    Json(req): Json<MemoryRequest>,
) -> Result<Response, ApiError> {
    let (prompt, scope) = req.into_parts(state.default_top_k)?;

    let chunks = match state.orchestrator.stream_filtered(&prompt, &scope).await {
        Ok(chunks) => chunks,
        Err(e @ Error::Generation(_)) => return Ok(single_error_sse(&e.to_string())),
        Err(e) => return Err(e.into()),
    };

    let sse_stream = async_stream::stream! {
        futures::pin_mut!(chunks);
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => yield Ok::<String, Infallible>(sse_event(&chunk)),
                Err(e) => {
                    tracing::error!(error = %e, "Stream error");
                    yield Ok(sse_event(&StreamChunk::error(format!("{e:#}"))));
                }
            }
        }
    };

    let body = axum::body::Body::from_stream(sse_stream);
    Ok(build_sse_response(body))
}

/// POST /api/memories - Store a prompt explicitly.
async fn api_add_memories(
    State(state): State<AppState>,
    Json(req): Json<MemoryRequest>,
) -> Result<Json<Value>, ApiError> {
    let (prompt, scope) = req.into_parts(state.default_top_k)?;
    Ok(Json(state.orchestrator.add_memories(&prompt, &scope).await?))
}

/// POST /api/memories/search - Raw retrieval results.
async fn api_search_memories(
    State(state): State<AppState>,
    Json(req): Json<MemoryRequest>,
) -> Result<Response, ApiError> {
    let (prompt, scope) = req.into_parts(state.default_top_k)?;
    let result = state.orchestrator.search_memories(&prompt, &scope).await?;
    Ok(Json(result).into_response())
}

/// POST /api/memories/retrieve - The preamble a generation would inject.
async fn api_retrieve_memories(
    State(state): State<AppState>,
    Json(req): Json<MemoryRequest>,
) -> Result<Json<Value>, ApiError> {
    let (prompt, scope) = req.into_parts(state.default_top_k)?;
    let preamble = state.orchestrator.retrieve_memories(&prompt, &scope).await;
    Ok(Json(json!({ "preamble": preamble })))
}

fn single_error_sse(message: &str) -> Response {
    let body = axum::body::Body::from(sse_event(&StreamChunk::error(message)));
    build_sse_response(body)
}

fn build_sse_response(body: axum::body::Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert("Content-Type", HeaderValue::from_static("text/event-stream"));
    h.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    h.insert("Connection", HeaderValue::from_static("keep-alive"));
    h.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    resp
}
