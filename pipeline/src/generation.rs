//! Cache-aware generation: reuse what is cached, compute the rest, store it.

use std::collections::{HashMap, HashSet};

use esembed_cache::{CacheError, Document, Embedding, EmbeddingCache, PendingEmbedding};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::provider::EmbeddingProvider;

/// Counters for one [`CachedEmbeddings::generate`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Documents asked for.
    pub requested: usize,

    /// Documents served from the cache.
    pub cache_hits: usize,

    /// Vectors computed by the provider.
    pub computed: usize,

    /// Computed vectors stored in the cache.
    pub written: usize,

    /// Computed vectors the cache refused.
    pub write_failures: usize,

    /// Whether the cache became unreachable and was skipped.
    pub degraded: bool,
}

/// Vectors for a document set, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub embeddings: Vec<Embedding>,
    pub stats: GenerationStats,
}

/// Runs an [`EmbeddingProvider`] behind an [`EmbeddingCache`].
pub struct CachedEmbeddings<P> {
    cache: EmbeddingCache,
    provider: P,
    config: PipelineConfig,
}

impl<P: EmbeddingProvider> CachedEmbeddings<P> {
    /// Wrap `provider` with `cache` using the default configuration.
    pub fn new(cache: EmbeddingCache, provider: P) -> Self {
        Self {
            cache,
            provider,
            config: PipelineConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Produce one vector per document, in order.
    ///
    /// Valid cached vectors are reused; missing or stale ones are computed
    /// in provider batches and written back. If the cache is unreachable at
    /// any point, the remaining work runs against the provider alone.
    pub async fn generate(&self, documents: &[Document]) -> Result<Generation> {
        let mut stats = GenerationStats {
            requested: documents.len(),
            ..GenerationStats::default()
        };
        if documents.is_empty() {
            return Ok(Generation {
                embeddings: Vec::new(),
                stats,
            });
        }

        let variant = self.provider.variant();
        let cached = match self.cached_vectors(documents).await {
            Ok(cached) => cached,
            Err(err) => {
                degrade(&mut stats, "lookup", err)?;
                IndexMap::new()
            }
        };

        let mut seen = HashSet::new();
        let misses: Vec<&Document> = documents
            .iter()
            .filter(|d| !cached.contains_key(&d.doc_id) && seen.insert(d.doc_id.as_str()))
            .collect();
        debug!(
            provider = self.provider.name(),
            %variant,
            cached = cached.len(),
            misses = misses.len(),
            "planned generation"
        );

        let computed = self.compute(&misses).await?;
        stats.computed = computed.len();

        if self.config.save_computed && !stats.degraded && !computed.is_empty() {
            let pending: Vec<PendingEmbedding> = misses
                .iter()
                .filter_map(|d| {
                    let vector = computed.get(&d.doc_id)?;
                    Some(self.pending(d, vector.clone()))
                })
                .collect();
            match self.cache.save(variant, pending).await {
                Ok(report) => {
                    stats.written = report.written;
                    stats.write_failures = report.failed.len();
                }
                Err(err) => degrade(&mut stats, "save", err)?,
            }
        }

        let mut embeddings = Vec::with_capacity(documents.len());
        for document in documents {
            if let Some(vector) = cached.get(&document.doc_id) {
                stats.cache_hits += 1;
                embeddings.push(vector.clone());
            } else if let Some(vector) = computed.get(&document.doc_id) {
                embeddings.push(vector.clone());
            }
        }
        if embeddings.len() != documents.len() {
            return Err(PipelineError::ProviderOutput {
                expected: documents.len(),
                actual: embeddings.len(),
            });
        }

        info!(
            provider = self.provider.name(),
            %variant,
            requested = stats.requested,
            cache_hits = stats.cache_hits,
            computed = stats.computed,
            written = stats.written,
            degraded = stats.degraded,
            "generated embeddings"
        );
        Ok(Generation { embeddings, stats })
    }

    /// Valid cached vectors for `documents`. Records that disappear between
    /// the lookup and the fetch are simply absent.
    async fn cached_vectors(
        &self,
        documents: &[Document],
    ) -> std::result::Result<IndexMap<String, Embedding>, CacheError> {
        let variant = self.provider.variant();
        let lookup = self.cache.check_documents(variant, documents).await?;
        if lookup.valid_ids.is_empty() {
            return Ok(IndexMap::new());
        }

        let mut seen = HashSet::new();
        let valid: Vec<String> = documents
            .iter()
            .map(|d| &d.doc_id)
            .filter(|id| lookup.valid_ids.contains(*id) && seen.insert(id.as_str()))
            .cloned()
            .collect();
        let fetched = self.cache.fetch(variant, &valid).await?;
        if fetched.len() < valid.len() {
            warn!(
                %variant,
                vanished = valid.len() - fetched.len(),
                "cached embeddings vanished before fetch, recomputing them"
            );
        }
        Ok(fetched)
    }

    async fn compute(&self, misses: &[&Document]) -> Result<HashMap<String, Embedding>> {
        let mut computed = HashMap::with_capacity(misses.len());
        for batch in misses.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<&str> = batch.iter().map(|d| d.text.as_str()).collect();
            let vectors = self
                .provider
                .embed_batch(&texts)
                .await
                .map_err(PipelineError::Provider)?;
            if vectors.len() != batch.len() {
                return Err(PipelineError::ProviderOutput {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }
            for (document, vector) in batch.iter().zip(vectors) {
                computed.insert(document.doc_id.clone(), vector);
            }
        }
        Ok(computed)
    }

    fn pending(&self, document: &Document, vector: Embedding) -> PendingEmbedding {
        let pending = PendingEmbedding::new(&document.doc_id, vector, &document.text_hash)
            .with_model_version(self.provider.model_version());
        match self.provider.model_name() {
            Some(name) => pending.with_model_name(name),
            None => pending,
        }
    }
}

/// Swallow an unavailable cache, marking the run degraded. Anything else is
/// a real failure.
fn degrade(stats: &mut GenerationStats, step: &str, err: CacheError) -> Result<()> {
    if !err.is_unavailable() {
        return Err(err.into());
    }
    warn!(step, "cache unavailable, continuing without it: {err}");
    stats.degraded = true;
    Ok(())
}
