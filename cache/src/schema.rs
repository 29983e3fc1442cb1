//! Index schema management.
//!
//! Each variant store is created on first use with a `dense_vector` mapping of
//! the requested dimension. The dimension is never migrated: asking for a
//! different one on an existing store is a [`CacheError::SchemaConflict`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::cache::EmbeddingCache;
use crate::error::{CacheError, Result};
use crate::variant::{DOCUMENTS_STORE, Variant};

/// What `ensure_store` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    /// The store was created by this call.
    Created,
    /// The store was already there with the requested schema.
    Existing,
}

/// Mapping for a variant store holding vectors of `dimension`.
pub fn embedding_mapping(dimension: usize) -> Value {
    json!({
        "mappings": {
            "properties": {
                "doc_id": { "type": "keyword" },
                "embedding": {
                    "type": "dense_vector",
                    "dims": dimension,
                    "index": true,
                    // l2_norm accepts all-zero vectors, cosine does not
                    "similarity": "l2_norm"
                },
                "metadata": {
                    "properties": {
                        "model_type": { "type": "keyword" },
                        "model_name": { "type": "keyword" },
                        "model_version": { "type": "keyword" },
                        "generated_at": { "type": "date" },
                        "dimensions": { "type": "integer" },
                        "text_hash": { "type": "keyword" }
                    }
                }
            }
        }
    })
}

/// Mapping for the documents store.
pub fn documents_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "doc_id": { "type": "keyword" },
                "text": { "type": "text", "analyzer": "standard" },
                "category": { "type": "keyword" },
                "target": { "type": "integer" },
                "text_hash": { "type": "keyword" },
                "created_at": { "type": "date" }
            }
        }
    })
}

/// Vector dimension declared in a store mapping.
fn mapped_dimension(mappings: &Value) -> Option<usize> {
    mappings
        .pointer("/properties/embedding/dims")
        .and_then(Value::as_u64)
        .and_then(|d| usize::try_from(d).ok())
}

impl EmbeddingCache {
    /// Make sure the store for `variant` exists with vectors of `dimension`.
    ///
    /// Safe to call repeatedly. Fails with [`CacheError::SchemaConflict`] if
    /// the store exists with another dimension.
    pub async fn ensure_store(&self, variant: Variant, dimension: usize) -> Result<StoreState> {
        if !self.is_enabled() {
            return Ok(StoreState::Existing);
        }
        if dimension == 0 {
            return Err(CacheError::Config(format!(
                "cannot create '{}' with zero dimensions",
                variant.store_name()
            )));
        }

        let store = variant.store_name();
        if let Some(existing) = self.store_dimension(variant).await? {
            check_dimension(store, existing, dimension)?;
            debug!(store, dimension, "store already present");
            return Ok(StoreState::Existing);
        }

        if self
            .engine
            .create_index(store, &embedding_mapping(dimension))
            .await?
        {
            info!(store, dimension, "created embedding store");
            return Ok(StoreState::Created);
        }

        // Lost a creation race; whoever won must agree on the dimension.
        match self.store_dimension(variant).await? {
            Some(existing) => {
                check_dimension(store, existing, dimension)?;
                Ok(StoreState::Existing)
            }
            None => Err(CacheError::InvalidResponse(format!(
                "'{store}' reported as existing but has no vector mapping"
            ))),
        }
    }

    /// Make sure the documents store exists.
    pub async fn ensure_documents_store(&self) -> Result<StoreState> {
        if !self.is_enabled() {
            return Ok(StoreState::Existing);
        }
        if self.engine.index_exists(DOCUMENTS_STORE).await? {
            return Ok(StoreState::Existing);
        }
        if self
            .engine
            .create_index(DOCUMENTS_STORE, &documents_mapping())
            .await?
        {
            info!(store = DOCUMENTS_STORE, "created documents store");
            Ok(StoreState::Created)
        } else {
            Ok(StoreState::Existing)
        }
    }

    /// Dimension of the store for `variant`, `None` if it does not exist.
    pub async fn store_dimension(&self, variant: Variant) -> Result<Option<usize>> {
        let store = variant.store_name();
        match self.engine.mapping(store).await? {
            None => Ok(None),
            Some(mappings) => mapped_dimension(&mappings).map(Some).ok_or_else(|| {
                CacheError::InvalidResponse(format!("'{store}' has no dense_vector embedding field"))
            }),
        }
    }
}

fn check_dimension(store: &str, existing: usize, requested: usize) -> Result<()> {
    if existing != requested {
        return Err(CacheError::SchemaConflict {
            store: store.to_string(),
            existing,
            requested,
        });
    }
    Ok(())
}
