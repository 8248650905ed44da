//! Error taxonomy for the concierge core.
//!
//! Only [`ConciergeError::Configuration`] is fatal: it is raised at startup
//! when a required credential or setting is missing, before any storage is
//! touched. Every other failure is absorbed at its component boundary and
//! turned into placeholder text, a tool error payload, or an empty result,
//! so these variants mostly surface from the lower-level stores to their
//! immediate callers.

use thiserror::Error;

/// Errors produced by the concierge library.
#[derive(Debug, Error)]
pub enum ConciergeError {
    /// Missing credential or invalid configuration. Not retryable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A vector does not match the dimensionality of the index it targets.
    #[error("embedding dimension mismatch: index holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding backend failed or returned a malformed response.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The language model call failed or returned a malformed response.
    #[error("model call failed: {0}")]
    Model(String),

    /// Chunker parameters that cannot make forward progress.
    #[error("invalid chunking parameters: {0}")]
    InvalidChunking(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConciergeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        ConciergeError::Configuration(msg.into())
    }

    pub fn embedding<E: std::fmt::Display>(err: E) -> Self {
        ConciergeError::Embedding(err.to_string())
    }

    pub fn model<E: std::fmt::Display>(err: E) -> Self {
        ConciergeError::Model(err.to_string())
    }

    /// Whether this error must stop the process rather than be recovered.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConciergeError::Configuration(_))
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ConciergeError>;
