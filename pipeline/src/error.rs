//! Error types for cache-aware embedding generation.

use esembed_cache::CacheError;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while generating embeddings.
///
/// An unreachable cache is not among them: generation falls back to the
/// provider alone and reports it through
/// [`GenerationStats::degraded`](crate::GenerationStats::degraded).
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The embedding provider failed.
    #[error("embedding provider failed: {0}")]
    Provider(#[source] anyhow::Error),

    /// The provider returned the wrong number of vectors for a batch.
    #[error("provider returned {actual} vector(s) for {expected} text(s)")]
    ProviderOutput { expected: usize, actual: usize },

    /// The cache rejected the work and retrying will not help.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}
