//! Embedding providers.
//!
//! The pipeline treats the model as a black box: it hands over texts and
//! expects one fixed-dimension vector back per text, in order.

use async_trait::async_trait;
use esembed_cache::{Embedding, Variant};

/// Something that turns text into vectors for one cache variant.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Cache variant the vectors belong to.
    fn variant(&self) -> Variant;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize {
        self.variant().default_dimension()
    }

    /// Model name recorded with each cached vector.
    fn model_name(&self) -> Option<&str> {
        None
    }

    /// Model version recorded with each cached vector.
    fn model_version(&self) -> &str {
        "1.0"
    }

    /// Embed `texts`, returning exactly one vector per text in order.
    async fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Embedding>>;
}

#[async_trait]
impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn variant(&self) -> Variant {
        (**self).variant()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn model_name(&self) -> Option<&str> {
        (**self).model_name()
    }

    fn model_version(&self) -> &str {
        (**self).model_version()
    }

    async fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Embedding>> {
        (**self).embed_batch(texts).await
    }
}
