//! Memory-augmented generation.
//!
//! The orchestrator wraps a [`GenerationBackend`] and adds:
//! - retrieval of relevant memories before generation
//! - injection of those memories as system text
//! - persistence of the new turn through the [`PersistenceWorker`]
//! - request ID tracking
//!
//! The two calling conventions persist at different points. Blocking
//! [`generate`](MemoryOrchestrator::generate) queues the converted prompt after
//! the backend answered. Streaming
//! [`stream_begin`](MemoryOrchestrator::stream_begin) schedules the store
//! before the stream starts, pairing the flattened user turn with the
//! [`STREAM_ACKNOWLEDGMENT`] placeholder because the real reply is not known
//! yet.
//!
//! [`PersistenceWorker`]: crate::memory::PersistenceWorker
//!
//! # Example
//!
//! ```rust,ignore
//! use memloom::llm::{BackendSettings, ProviderRegistry};
//! use memloom::memory::{HttpMemoryClient, MemoryScope, MemoryStore, PersistenceWorker};
//! use memloom::orchestrator::MemoryOrchestrator;
//!
//! let store: Arc<dyn MemoryStore> = Arc::new(HttpMemoryClient::new(memory_settings)?);
//! let (handle, worker) = PersistenceWorker::spawn(Arc::clone(&store), 256);
//! let orchestrator = MemoryOrchestrator::new(settings, &ProviderRegistry::with_defaults(), store, handle)?;
//!
//! let out = orchestrator.generate(&"Suggest a car".into(), &MemoryScope::for_user("u1")).await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::{
    BackendSettings, ChunkStream, GeneratedText, GenerationBackend, GenerationRequest,
    ProviderRegistry,
};
use crate::memory::{
    CallSite, MemoryScope, MemoryStore, MemoryUpdate, PersistenceHandle, RetrievalAugmenter,
    RetrievalResult,
};
use crate::prompt::{self, Message, Prompt};
use crate::stream::filter_lifecycle;

/// Assistant turn stored for a streamed exchange in place of the real reply.
pub const STREAM_ACKNOWLEDGMENT: &str = "Thank You!";

/// Result of a blocking generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Generated {
    pub request_id: String,
    #[serde(flatten)]
    pub output: GeneratedText,
    /// Whether the turn was queued for storage. Informational only.
    pub memory_update: MemoryUpdate,
}

/// Coordinates retrieval, generation, and persistence for one backend.
#[derive(Clone)]
pub struct MemoryOrchestrator {
    settings: BackendSettings,
    backend: Arc<dyn GenerationBackend>,
    store: Arc<dyn MemoryStore>,
    augmenter: RetrievalAugmenter,
    persistence: PersistenceHandle,
}

#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for MemoryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryOrchestrator")
            .field("settings", &self.settings)
            .field("backend", &self.backend)
            .finish()
    }
}

impl MemoryOrchestrator {
    /// Build the backend named by `settings` and wire it to the memory store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown providers, missing credentials,
    /// or unsupported modes. Nothing is sent over the network.
    pub fn new(
        settings: BackendSettings,
        registry: &ProviderRegistry,
        store: Arc<dyn MemoryStore>,
        persistence: PersistenceHandle,
    ) -> Result<Self> {
        let backend = registry.build(&settings)?;
        Ok(Self::with_backend(settings, backend, store, persistence))
    }

    /// Wire an already built backend.
    pub fn with_backend(
        settings: BackendSettings,
        backend: Arc<dyn GenerationBackend>,
        store: Arc<dyn MemoryStore>,
        persistence: PersistenceHandle,
    ) -> Self {
        Self {
            settings,
            backend,
            augmenter: RetrievalAugmenter::new(Arc::clone(&store)),
            store,
            persistence,
        }
    }

    /// The backend settings this orchestrator was built with.
    #[must_use]
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    /// Generate a complete response.
    ///
    /// Retrieval is awaited before the backend is called. After a successful
    /// generation the converted prompt is handed to the persistence queue
    /// with the same scope. The call does not wait for the store;
    /// [`Generated::memory_update`] only says whether the job was queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] if the backend fails. Memory failures on
    /// this path are never returned.
    pub async fn generate(&self, prompt: &Prompt, scope: &MemoryScope) -> Result<Generated> {
        let request_id = Uuid::new_v4().to_string();
        let query = prompt::flatten(prompt);
        let system = self.augmenter.augment(&query, scope).await;

        info!(
            request_id = %request_id,
            provider = %self.settings.provider,
            model = %self.settings.model,
            augmented = !system.is_empty(),
            "Starting generation"
        );

        let output = self
            .backend
            .generate(GenerationRequest {
                messages: prompt.to_messages(),
                system,
            })
            .await
            .map_err(|e| {
                error!(request_id = %request_id, error = %e, "Generation failed");
                Error::Generation(e)
            })?;

        let memory_update = self.persistence.schedule(
            &request_id,
            prompt::convert(prompt),
            scope.clone(),
        );
        debug!(request_id = %request_id, update = ?memory_update, "Generation complete");

        Ok(Generated {
            request_id,
            output,
            memory_update,
        })
    }

    /// Start a streaming response and return the raw backend stream.
    ///
    /// Retrieval is awaited before the stream starts. The memory update is
    /// scheduled before the backend is called and is not awaited. Lifecycle
    /// chunks are left in; see [`stream_filtered`](Self::stream_filtered).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] if the backend cannot start the stream.
    pub async fn stream_begin(&self, prompt: &Prompt, scope: &MemoryScope) -> Result<ChunkStream> {
        let request_id = Uuid::new_v4().to_string();
        let query = prompt::flatten(prompt);
        let system = self.augmenter.augment(&query, scope).await;

        info!(
            request_id = %request_id,
            provider = %self.settings.provider,
            model = %self.settings.model,
            augmented = !system.is_empty(),
            "Starting stream"
        );

        let turn = vec![
            Message::user(query),
            Message::assistant(STREAM_ACKNOWLEDGMENT),
        ];
        let memory_update = self.persistence.schedule(&request_id, turn, scope.clone());
        debug!(request_id = %request_id, update = ?memory_update, "Placeholder turn handed off");

        self.backend
            .stream(GenerationRequest {
                messages: prompt.to_messages(),
                system,
            })
            .await
            .map_err(|e| {
                error!(request_id = %request_id, error = %e, "Stream failed to start");
                Error::Generation(e)
            })
    }

    /// [`stream_begin`](Self::stream_begin) with step markers stripped.
    ///
    /// # Errors
    ///
    /// Same as [`stream_begin`](Self::stream_begin).
    pub async fn stream_filtered(
        &self,
        prompt: &Prompt,
        scope: &MemoryScope,
    ) -> Result<ChunkStream> {
        Ok(Box::pin(filter_lifecycle(self.stream_begin(prompt, scope).await?)))
    }

    /// Store a prompt explicitly, one memory turn per text part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Memory`] if the store rejects or cannot be reached.
    pub async fn add_memories(&self, prompt: &Prompt, scope: &MemoryScope) -> Result<serde_json::Value> {
        let messages = prompt::convert_per_part(prompt);
        debug!(message_count = messages.len(), "Adding memories");
        let confirmation = CallSite::ExplicitAdd.settle(self.store.add(&messages, scope).await)?;
        Ok(confirmation)
    }

    /// Search memories for a prompt and return the records unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Memory`] on transport, status, or format failures.
    pub async fn search_memories(&self, prompt: &Prompt, scope: &MemoryScope) -> Result<RetrievalResult> {
        let query = prompt::flatten(prompt);
        let result = CallSite::DirectSearch.settle(self.store.search(&query, scope).await)?;
        Ok(result)
    }

    /// The memory preamble a generation call would inject for this prompt.
    ///
    /// Degrades to the empty string like the generation paths do.
    pub async fn retrieve_memories(&self, prompt: &Prompt, scope: &MemoryScope) -> String {
        self.augmenter.augment(&prompt::flatten(prompt), scope).await
    }
}
