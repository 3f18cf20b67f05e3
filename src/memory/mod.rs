//! Conversational memory: scope, records, and the external store contract.
//!
//! The memory service itself (vector search, embeddings, deduplication) lives
//! outside this crate. This module describes how the orchestrator talks to it:
//!
//! - [`MemoryStore`]: search and add over the wire
//! - [`client::HttpMemoryClient`]: the HTTP implementation
//! - [`augment::RetrievalAugmenter`]: search results → system preamble
//! - [`worker`]: background persistence queue
//! - [`policy`]: fatal-or-degrade decision per call site

pub mod augment;
pub mod client;
pub mod policy;
pub mod worker;

pub use augment::RetrievalAugmenter;
pub use client::HttpMemoryClient;
pub use policy::{CallSite, FailureMode};
pub use worker::{MemoryUpdate, PersistenceHandle, PersistenceWorker};

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::prompt::Message;

/// Number of records requested when a scope does not say otherwise.
pub const DEFAULT_TOP_K: usize = 5;

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// Identity filter narrowing memory search and add to a caller.
///
/// Every identity field is optional; a scope without any of them is an
/// unscoped (global) query and is not rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Maximum number of records to retrieve.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for MemoryScope {
    fn default() -> Self {
        Self {
            user_id: None,
            agent_id: None,
            run_id: None,
            app_id: None,
            org_id: None,
            project_id: None,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl MemoryScope {
    /// A scope for a single user.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Whether no identity field is set.
    pub fn is_global(&self) -> bool {
        self.user_id.is_none()
            && self.agent_id.is_none()
            && self.run_id.is_none()
            && self.app_id.is_none()
            && self.org_id.is_none()
            && self.project_id.is_none()
    }

    /// The set identity fields as a JSON object, for spreading into add bodies.
    pub fn identity_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let pairs = [
            ("user_id", &self.user_id),
            ("agent_id", &self.agent_id),
            ("run_id", &self.run_id),
            ("app_id", &self.app_id),
            ("org_id", &self.org_id),
            ("project_id", &self.project_id),
        ];
        pairs
            .into_iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone().into())))
            .collect()
    }
}

/// A stored fact, owned by the memory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The remembered text.
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    /// Relevance score as reported by the service; never interpreted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<serde_json::Value>,
}

impl MemoryRecord {
    /// Categories, if the record has at least one.
    pub fn categories(&self) -> Option<&[String]> {
        self.categories.as_deref().filter(|c| !c.is_empty())
    }
}

/// Records in retrieval order. Never re-ranked locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub results: Vec<MemoryRecord>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}

/// Contract of the external memory service.
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync + std::fmt::Debug {
    /// Search memories relevant to `query` within `scope`.
    async fn search(&self, query: &str, scope: &MemoryScope)
    -> Result<RetrievalResult, MemoryError>;

    /// Ask the service to create memories from `messages`.
    ///
    /// The confirmation body is returned as-is.
    async fn add(
        &self,
        messages: &[Message],
        scope: &MemoryScope,
    ) -> Result<serde_json::Value, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scope_is_global() {
        let scope: MemoryScope = serde_json::from_str("{}").unwrap();
        assert!(scope.is_global());
        assert_eq!(scope.top_k, DEFAULT_TOP_K);
        assert!(scope.identity_fields().is_empty());
    }

    #[test]
    fn test_identity_fields_skip_unset() {
        let scope = MemoryScope {
            org_id: Some("o1".into()),
            ..MemoryScope::for_user("u1")
        };
        let fields = scope.identity_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["user_id"], "u1");
        assert_eq!(fields["org_id"], "o1");
    }

    #[test]
    fn test_record_empty_categories_read_as_absent() {
        let record: MemoryRecord =
            serde_json::from_value(serde_json::json!({"memory": "x", "categories": []})).unwrap();
        assert!(record.categories().is_none());
    }
}
