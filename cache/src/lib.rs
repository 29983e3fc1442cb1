//! # Embeddings Cache
//!
//! An Elasticsearch-backed cache for document embeddings. Vectors are keyed
//! by document identity and embedding variant, and checked against a content
//! hash of the document text so stale vectors are regenerated instead of
//! reused.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        EmbeddingCache                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  check ──► valid / missing-or-stale        (lookup.rs)          │
//! │  fetch ──► doc_id -> vector, any scale     (fetch.rs)           │
//! │  save  ──► validated bulk upserts          (writer.rs)          │
//! │  status / clear                            (admin.rs)           │
//! │       │                                                         │
//! │       ▼                                                         │
//! │  ensure_store (schema.rs) ─► scroll cursor (scroll.rs)          │
//! │       │                                                         │
//! │       ▼                                                         │
//! │  EngineClient + RetryPolicy ──► Elasticsearch REST API          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use esembed_cache::{CacheConfig, Document, EmbeddingCache, PendingEmbedding, Variant};
//!
//! let cache = EmbeddingCache::connect(CacheConfig::from_env()?).await?;
//! let docs = vec![Document::new(0, "some text", "sci.med", 0)];
//!
//! let lookup = cache.check_documents(Variant::Sbert, &docs).await?;
//! if !lookup.all_present {
//!     let vector = my_model.embed(&docs[0].text);
//!     cache
//!         .save(Variant::Sbert, vec![PendingEmbedding::new(&docs[0].doc_id, vector, &docs[0].text_hash)])
//!         .await?;
//! }
//! let vectors = cache.fetch(Variant::Sbert, &Document::ids(&docs)).await?;
//! ```

pub mod admin;
pub mod cache;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod lookup;
pub mod record;
pub mod retry;
pub mod schema;
mod scroll;
pub mod variant;
pub mod writer;

pub use admin::{CacheStatus, ClearReport, StoreStatus};
pub use cache::EmbeddingCache;
pub use config::CacheConfig;
pub use document::{Document, doc_id_for, text_hash};
pub use engine::EngineInfo;
pub use error::{CacheError, Result};
pub use lookup::LookupResult;
pub use record::{EmbeddingMetadata, EmbeddingRecord, PendingEmbedding};
pub use retry::RetryPolicy;
pub use schema::StoreState;
pub use variant::{DOCUMENTS_STORE, Variant};
pub use writer::{DatasetSaveOutcome, FailedWrite, WriteReport};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
