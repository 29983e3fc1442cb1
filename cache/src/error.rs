//! Error types for the embeddings cache.

use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur in the embeddings cache.
///
/// A stale embedding is not an error: it is reported through
/// [`crate::LookupResult::missing_or_stale_ids`].
#[derive(Error, Debug)]
pub enum CacheError {
    /// Engine unreachable or erroring after the retry budget ran out.
    #[error("cache unavailable during {operation} after {attempts} attempt(s): {reason}")]
    Unavailable {
        operation: String,
        attempts: u32,
        reason: String,
    },

    /// Existing store was created with another vector dimension.
    #[error("schema conflict on '{store}': store has {existing} dimensions, requested {requested}")]
    SchemaConflict {
        store: String,
        existing: usize,
        requested: usize,
    },

    /// Vector submitted for write does not match the store dimension.
    #[error("dimension mismatch for '{doc_id}': expected {expected}, got {actual}")]
    DimensionMismatch {
        doc_id: String,
        expected: usize,
        actual: usize,
    },

    /// Engine rejected the request and retrying will not help.
    #[error("engine rejected {operation} ({status}): {reason}")]
    Engine {
        operation: String,
        status: u16,
        reason: String,
    },

    /// Engine answered with a body we could not make sense of.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Whether the caller should fall back to recomputing without the cache.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable { .. })
    }
}
