//! Error types for memory, configuration, and generation failures.

use thiserror::Error;

/// Failure talking to the external memory service.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// The request never produced a response (connect, timeout, body read).
    #[error("memory service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("memory service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },

    /// The response did not have the expected shape.
    #[error("malformed memory service response: {0}")]
    Format(String),
}

impl MemoryError {
    /// Whether the failure is worth retrying on an idempotent call.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::Format(_) => false,
        }
    }
}

/// Invalid backend or service configuration, raised at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported provider `{0}`")]
    UnknownProvider(String),

    #[error("provider `{provider}` requires an API key")]
    MissingCredential { provider: String },

    #[error("provider `{provider}` does not support the {mode} mode")]
    UnsupportedMode { provider: String, mode: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Crate-level error returned by the orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// The generation backend failed; carries the backend's error chain.
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;
