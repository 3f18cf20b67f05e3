//! Memory-augmented text generation.
//!
//! Every generation call is wrapped in a retrieve → generate → persist cycle
//! against an external memory service: relevant facts about the caller are
//! searched before generation and injected as system text, and the new turn
//! is stored back afterwards (or, for streaming calls, before the stream
//! starts).
//!
//! # Architecture
//!
//! - **Orchestrator**: retrieval, backend dispatch, and persistence per call
//! - **Backends**: OpenAI-compatible chat and completion, Anthropic Messages
//! - **Memory**: HTTP client, preamble rendering, background persistence worker
//! - **Server**: Axum-based HTTP surface with SSE streaming
//!
//! # Modules
//!
//! - [`prompt`]: prompt data model and flattening
//! - [`memory`]: memory scope, store contract, augmentation, persistence
//! - [`llm`]: generation backend trait, registry, and drivers
//! - [`orchestrator`]: the memory-augmented generation flow
//! - [`stream`]: stream chunks and lifecycle filtering

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod prompt;
pub mod server;
pub mod stream;

use std::sync::Arc;

use orchestrator::MemoryOrchestrator;

pub use error::{Error, Result};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Memory-augmented generation for the configured backend.
    pub orchestrator: Arc<MemoryOrchestrator>,
    /// `top_k` applied when a request scope leaves it out.
    pub default_top_k: usize,
}
