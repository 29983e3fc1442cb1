//! Configuration for cache-aware generation.

use serde::{Deserialize, Serialize};

/// Configuration for [`CachedEmbeddings`](crate::CachedEmbeddings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Texts handed to the provider per call.
    pub batch_size: usize,

    /// Whether freshly computed vectors are written back to the cache.
    pub save_computed: bool,
}

impl PipelineConfig {
    /// Set the provider batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Enable or disable writing computed vectors back.
    pub fn with_save_computed(mut self, save: bool) -> Self {
        self.save_computed = save;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            save_computed: true,
        }
    }
}
