//! # Cached Embedding Generation
//!
//! Drives an [`EmbeddingProvider`] through the embeddings cache: look up
//! which documents already have a valid vector, fetch those, compute the
//! rest in batches, and write them back.
//!
//! ```text
//!  documents ──► check ──► valid ──► fetch ─────────────┐
//!                  │                   │ (vanished)     │
//!                  ▼                   ▼                ▼
//!            missing/stale ──► provider.embed_batch ──► assemble (document order)
//!                                      │
//!                                      ▼
//!                                    save
//! ```
//!
//! If the cache is unreachable, generation carries on with the provider
//! alone and flags the run as degraded.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use esembed_cache::{CacheConfig, EmbeddingCache};
//! use esembed_pipeline::CachedEmbeddings;
//!
//! let cache = EmbeddingCache::connect(CacheConfig::from_env()?).await?;
//! let pipeline = CachedEmbeddings::new(cache, my_sbert_provider);
//! let generation = pipeline.generate(&documents).await?;
//! println!("{} from cache", generation.stats.cache_hits);
//! ```

pub mod config;
pub mod error;
pub mod generation;
pub mod provider;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use generation::{CachedEmbeddings, Generation, GenerationStats};
pub use provider::EmbeddingProvider;
