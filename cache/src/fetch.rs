//! Bulk retrieval of cached vectors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::Embedding;
use crate::cache::EmbeddingCache;
use crate::document::Document;
use crate::error::Result;
use crate::scroll::{scroll_all, scroll_by_ids};
use crate::variant::{DOCUMENTS_STORE, Variant};

#[derive(Deserialize)]
struct VectorSource {
    doc_id: String,
    embedding: Embedding,
}

/// A documents-store entry. Entries created by the embedding writer only
/// carry the identity fields.
#[derive(Deserialize)]
struct StoredDocument {
    doc_id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    target: Option<i64>,
    text_hash: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl StoredDocument {
    fn into_document(self) -> Option<Document> {
        Some(Document {
            doc_id: self.doc_id,
            text: self.text?,
            category: self.category.unwrap_or_default(),
            target: self.target.unwrap_or_default(),
            text_hash: self.text_hash,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

impl EmbeddingCache {
    /// Fetch the cached vectors of `doc_ids` from `variant`.
    ///
    /// The map iterates in request order and contains exactly the requested
    /// IDs that have a record; missing IDs are simply absent. Any number of
    /// IDs is supported; reads are paged through the scroll protocol. A failed
    /// page fails the whole fetch, so callers never see a partial result.
    pub async fn fetch(&self, variant: Variant, doc_ids: &[String]) -> Result<IndexMap<String, Embedding>> {
        if doc_ids.is_empty() || !self.is_enabled() {
            return Ok(IndexMap::new());
        }

        let store = variant.store_name();
        let Some(hits) = scroll_by_ids::<VectorSource>(
            &self.engine,
            store,
            doc_ids,
            &["doc_id", "embedding"],
            self.scroll_params(),
        )
        .await?
        else {
            debug!(store, "store does not exist, nothing to fetch");
            return Ok(IndexMap::new());
        };

        let mut found: HashMap<String, Embedding> = hits
            .into_iter()
            .map(|hit| (hit.source.doc_id, hit.source.embedding))
            .collect();

        let mut ordered = IndexMap::with_capacity(found.len());
        for doc_id in doc_ids {
            if let Some(vector) = found.remove(doc_id) {
                ordered.insert(doc_id.clone(), vector);
            }
        }

        info!(
            store,
            requested = doc_ids.len(),
            found = ordered.len(),
            "fetched cached embeddings"
        );
        Ok(ordered)
    }

    /// Fetch vectors as a matrix in request order, only if every ID is
    /// cached. Returns `None` when at least one is missing.
    pub async fn fetch_ordered(&self, variant: Variant, doc_ids: &[String]) -> Result<Option<Vec<Embedding>>> {
        let fetched = self.fetch(variant, doc_ids).await?;
        let mut matrix = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            // Duplicate requested IDs reuse the first vector.
            match fetched.get(doc_id) {
                Some(vector) => matrix.push(vector.clone()),
                None => {
                    debug!(doc_id = doc_id.as_str(), "embedding missing, matrix incomplete");
                    return Ok(None);
                }
            }
        }
        Ok(Some(matrix))
    }

    /// Load every full document from the documents store, sorted by `doc_id`.
    ///
    /// Not limited by the engine's result window. Identity-only entries
    /// (written alongside embeddings, without text) are skipped. A missing
    /// store yields an empty list.
    pub async fn load_documents(&self) -> Result<Vec<Document>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        let Some(hits) = scroll_all::<StoredDocument>(
            &self.engine,
            DOCUMENTS_STORE,
            json!({ "match_all": {} }),
            &["doc_id", "text", "category", "target", "text_hash", "created_at"],
            self.scroll_params(),
        )
        .await?
        else {
            return Ok(Vec::new());
        };

        let total = hits.len();
        let mut documents: Vec<Document> = hits
            .into_iter()
            .filter_map(|hit| hit.source.into_document())
            .collect();
        documents.sort_by(|a, b| a.doc_id.as_str().cmp(b.doc_id.as_str()));

        if documents.len() < total {
            debug!(skipped = total - documents.len(), "skipped identity-only document entries");
        }
        info!(count = documents.len(), "loaded documents from '{DOCUMENTS_STORE}'");
        Ok(documents)
    }
}
