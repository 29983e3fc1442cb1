//! The cache client all operations hang off.

use std::sync::Arc;

use tracing::info;

use crate::config::CacheConfig;
use crate::engine::{EngineClient, EngineInfo};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::scroll::ScrollParams;

/// Elasticsearch-backed embeddings cache.
///
/// Constructed explicitly from a [`CacheConfig`] and passed to whoever needs
/// it. Clones share the underlying HTTP connection pool, so one instance per
/// process is enough, while tests can create as many independent instances
/// as they like. Dropping the last clone closes the pool.
#[derive(Clone)]
pub struct EmbeddingCache {
    pub(crate) config: Arc<CacheConfig>,
    pub(crate) engine: EngineClient,
}

impl EmbeddingCache {
    /// Create a cache client. No network traffic happens until the first
    /// operation.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let engine = EngineClient::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            engine,
        })
    }

    /// Create a cache client and verify the engine answers.
    ///
    /// With the cache disabled this never touches the network.
    pub async fn connect(config: CacheConfig) -> Result<Self> {
        let cache = Self::new(config)?;
        if cache.is_enabled() {
            let info = cache.engine.ping().await?;
            info!(
                engine = cache.engine.base_url(),
                version = info.version.as_ref().map(|v| v.number.as_str()).unwrap_or("unknown"),
                "connected to search engine"
            );
        }
        Ok(cache)
    }

    /// Replace the retry policy used for every request.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.engine.set_retry_policy(policy);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether the cache is in use (not in bypass mode).
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether every cached embedding is treated as stale.
    pub fn force_regenerate(&self) -> bool {
        self.config.force_regenerate
    }

    /// Ping the engine.
    pub async fn ping(&self) -> Result<EngineInfo> {
        self.engine.ping().await
    }

    pub(crate) fn scroll_params(&self) -> ScrollParams<'_> {
        ScrollParams {
            page_size: self.config.scroll_page_size,
            keepalive: &self.config.scroll_keepalive,
            max_terms: self.config.max_terms_per_query,
        }
    }
}
