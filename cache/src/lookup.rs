//! Cache lookup: which documents already have a valid embedding.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::document::Document;
use crate::error::Result;
use crate::scroll::scroll_by_ids;
use crate::variant::{DOCUMENTS_STORE, Variant};

/// Result of a cache lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupResult {
    /// True iff `missing_or_stale_ids` is empty.
    pub all_present: bool,

    /// IDs with a record whose hash matches the current document.
    pub valid_ids: HashSet<String>,

    /// IDs without a record, or whose record was generated from other text.
    pub missing_or_stale_ids: HashSet<String>,
}

impl LookupResult {
    fn everything_missing(doc_ids: &[String]) -> Self {
        let missing: HashSet<String> = doc_ids.iter().cloned().collect();
        Self {
            all_present: missing.is_empty(),
            valid_ids: HashSet::new(),
            missing_or_stale_ids: missing,
        }
    }

    /// Missing or stale IDs in the order they appear in `doc_ids`.
    pub fn missing_in_order<'a>(&self, doc_ids: &'a [String]) -> Vec<&'a str> {
        doc_ids
            .iter()
            .filter(|id| self.missing_or_stale_ids.contains(id.as_str()))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Deserialize)]
struct HashProbe {
    doc_id: String,
    #[serde(default)]
    metadata: Option<HashProbeMetadata>,
}

#[derive(Deserialize)]
struct HashProbeMetadata {
    #[serde(default)]
    text_hash: Option<String>,
}

#[derive(Deserialize)]
struct DocumentHash {
    doc_id: String,
    #[serde(default)]
    text_hash: Option<String>,
}

impl EmbeddingCache {
    /// Classify `doc_ids` into valid and missing-or-stale for `variant`.
    ///
    /// `current_hashes` maps each document to the hash of its current text.
    /// A record is valid only if its generation-time hash equals that value.
    pub async fn check(
        &self,
        variant: Variant,
        doc_ids: &[String],
        current_hashes: &HashMap<String, String>,
    ) -> Result<LookupResult> {
        if doc_ids.is_empty() {
            return Ok(LookupResult {
                all_present: true,
                ..LookupResult::default()
            });
        }
        if !self.is_enabled() {
            debug!(%variant, "cache disabled, reporting all documents missing");
            return Ok(LookupResult::everything_missing(doc_ids));
        }
        if self.force_regenerate() {
            debug!(%variant, "force regeneration active, reporting all documents stale");
            return Ok(LookupResult::everything_missing(doc_ids));
        }

        let store = variant.store_name();
        let Some(hits) = scroll_by_ids::<HashProbe>(
            &self.engine,
            store,
            doc_ids,
            &["doc_id", "metadata.text_hash"],
            self.scroll_params(),
        )
        .await?
        else {
            debug!(store, "store does not exist yet");
            return Ok(LookupResult::everything_missing(doc_ids));
        };

        let stored: HashMap<String, Option<String>> = hits
            .into_iter()
            .map(|hit| {
                let hash = hit.source.metadata.and_then(|m| m.text_hash);
                (hit.source.doc_id, hash)
            })
            .collect();

        let mut valid_ids = HashSet::new();
        let mut missing_or_stale_ids = HashSet::new();
        let mut stale = 0usize;

        for doc_id in doc_ids {
            let is_valid = match stored.get(doc_id) {
                None => false,
                Some(stored_hash) => {
                    let matches = stored_hash.is_some()
                        && stored_hash.as_ref() == current_hashes.get(doc_id);
                    if !matches {
                        stale += 1;
                    }
                    matches
                }
            };
            if is_valid {
                valid_ids.insert(doc_id.clone());
            } else {
                missing_or_stale_ids.insert(doc_id.clone());
            }
        }

        if stale > 0 {
            warn!(store, stale, "cached embeddings no longer match their documents");
        }
        debug!(
            store,
            requested = doc_ids.len(),
            valid = valid_ids.len(),
            missing_or_stale = missing_or_stale_ids.len(),
            "cache lookup"
        );

        Ok(LookupResult {
            all_present: missing_or_stale_ids.is_empty(),
            valid_ids,
            missing_or_stale_ids,
        })
    }

    /// [`check`](Self::check) for a set of documents, using their own hashes.
    pub async fn check_documents(&self, variant: Variant, documents: &[Document]) -> Result<LookupResult> {
        let doc_ids = Document::ids(documents);
        let hashes = Document::hashes(documents);
        self.check(variant, &doc_ids, &hashes).await
    }

    /// [`check`](Self::check) with current hashes read from the documents
    /// store. IDs without a document record count as stale.
    pub async fn check_against_store(&self, variant: Variant, doc_ids: &[String]) -> Result<LookupResult> {
        if doc_ids.is_empty() || !self.is_enabled() || self.force_regenerate() {
            return self.check(variant, doc_ids, &HashMap::new()).await;
        }
        let hashes = self.document_hashes(doc_ids).await?;
        self.check(variant, doc_ids, &hashes).await
    }

    /// Current text hashes of `doc_ids` according to the documents store.
    ///
    /// Documents that are not stored are absent from the result.
    pub async fn document_hashes(&self, doc_ids: &[String]) -> Result<HashMap<String, String>> {
        if doc_ids.is_empty() || !self.is_enabled() {
            return Ok(HashMap::new());
        }
        let hits = scroll_by_ids::<DocumentHash>(
            &self.engine,
            DOCUMENTS_STORE,
            doc_ids,
            &["doc_id", "text_hash"],
            self.scroll_params(),
        )
        .await?
        .unwrap_or_default();

        Ok(hits
            .into_iter()
            .filter_map(|hit| hit.source.text_hash.map(|h| (hit.source.doc_id, h)))
            .collect())
    }
}
