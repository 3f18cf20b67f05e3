//! Turning retrieved memories into a system preamble.

use std::sync::Arc;

use super::{CallSite, MemoryRecord, MemoryScope, MemoryStore, RetrievalResult};

/// Instruction header placed in front of the memory blocks.
pub const MEMORY_INSTRUCTIONS: &str = "These are the memories I have stored. \
Give more weight to the question asked by the user and answer that first. \
Treat the memories as optional context and adjust your answer with them where they apply. \
If the memories are irrelevant, ignore them. \
Do not reply to this section of the prompt or to the memories; they are only for your reference.";

/// Builds the memory preamble injected as system text.
#[derive(Debug, Clone)]
pub struct RetrievalAugmenter {
    store: Arc<dyn MemoryStore>,
}

impl RetrievalAugmenter {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    /// Search memories for `prompt_text` and render them as system text.
    ///
    /// Search failures degrade to an empty result, so this never fails and
    /// never blocks generation on the memory service being healthy.
    pub async fn augment(&self, prompt_text: &str, scope: &MemoryScope) -> String {
        let result = CallSite::AugmentSearch
            .settle(self.store.search(prompt_text, scope).await)
            .unwrap_or_default();

        tracing::debug!(
            record_count = result.len(),
            global = scope.is_global(),
            "Retrieved memories for augmentation"
        );
        render_preamble(&result)
    }
}

/// Render a retrieval result. Empty results render to the empty string.
pub fn render_preamble(result: &RetrievalResult) -> String {
    if result.is_empty() {
        return String::new();
    }

    let blocks: Vec<String> = result.results.iter().map(render_record).collect();
    format!("System Message: {MEMORY_INSTRUCTIONS}\n\n{}", blocks.join("\n\n"))
}

fn render_record(record: &MemoryRecord) -> String {
    match record.categories() {
        Some(categories) => format!(
            "Memory: {} (Categories: {})",
            record.memory,
            categories.join(", ")
        ),
        None => format!("Memory: {}", record.memory),
    }
}
