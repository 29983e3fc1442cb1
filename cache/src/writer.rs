//! Cache writer: validated bulk upserts of embeddings and documents.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::EmbeddingCache;
use crate::document::{Document, DocumentIdentity};
use crate::engine::BulkItem;
use crate::error::{CacheError, Result};
use crate::record::{EmbeddingRecord, PendingEmbedding};
use crate::scroll::scroll_by_ids;
use crate::variant::{DOCUMENTS_STORE, Variant};

/// Documents sampled when deciding whether a stored dataset is intact.
const INTEGRITY_SAMPLE_SIZE: usize = 100;

/// A record the engine refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWrite {
    pub doc_id: String,
    pub reason: String,
}

/// Outcome of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    /// Records stored.
    pub written: usize,

    /// Records that were not stored; safe to retry on their own.
    pub failed: Vec<FailedWrite>,
}

impl WriteReport {
    /// Whether every record was stored.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// IDs of records that were not stored.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.doc_id.as_str()).collect()
    }

    fn fail_all<'a>(&mut self, doc_ids: impl IntoIterator<Item = &'a str>, reason: &str) {
        self.failed.extend(doc_ids.into_iter().map(|doc_id| FailedWrite {
            doc_id: doc_id.to_string(),
            reason: reason.to_string(),
        }));
    }
}

/// Outcome of [`EmbeddingCache::save_documents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSaveOutcome {
    /// The store already held an intact copy of the dataset.
    AlreadyPresent { count: u64 },
    /// The dataset was (re)written.
    Written(WriteReport),
    /// Cache disabled; nothing was written.
    Disabled,
}

/// NDJSON bulk body upserting `records` into `store`, plus create-if-absent
/// identity records in the documents store.
pub(crate) fn embeddings_bulk_body(store: &str, records: &[EmbeddingRecord]) -> Result<String> {
    let mut body = String::new();
    for record in records {
        push_line(&mut body, &json!({ "index": { "_index": store, "_id": record.doc_id } }))?;
        push_line(&mut body, record)?;

        let identity = DocumentIdentity {
            doc_id: &record.doc_id,
            text_hash: &record.metadata.text_hash,
            created_at: record.metadata.generated_at,
        };
        push_line(&mut body, &json!({ "create": { "_index": DOCUMENTS_STORE, "_id": record.doc_id } }))?;
        push_line(&mut body, &identity)?;
    }
    Ok(body)
}

/// NDJSON bulk body indexing full documents.
pub(crate) fn documents_bulk_body(documents: &[Document]) -> Result<String> {
    let mut body = String::new();
    for document in documents {
        push_line(&mut body, &json!({ "index": { "_index": DOCUMENTS_STORE, "_id": document.doc_id } }))?;
        push_line(&mut body, document)?;
    }
    Ok(body)
}

fn push_line<T: Serialize + ?Sized>(body: &mut String, value: &T) -> Result<()> {
    let line = serde_json::to_string(value)?;
    // Writing into a String cannot fail.
    let _ = writeln!(body, "{line}");
    Ok(())
}

/// Check every vector against the store dimension before anything is sent.
fn validate_dimensions(records: &[PendingEmbedding], expected: usize) -> Result<()> {
    for record in records {
        if record.embedding.len() != expected || record.embedding.is_empty() {
            return Err(CacheError::DimensionMismatch {
                doc_id: record.doc_id.clone(),
                expected,
                actual: record.embedding.len(),
            });
        }
    }
    Ok(())
}

/// Fold the bulk item outcomes of one chunk into `report`.
fn tally_embedding_items(
    store: &str,
    chunk: &[EmbeddingRecord],
    items: Vec<BulkItem>,
    report: &mut WriteReport,
) {
    let mut acknowledged = HashSet::new();
    for item in items {
        if item.index == store {
            if item.is_success() {
                report.written += 1;
            } else {
                report.failed.push(FailedWrite {
                    doc_id: item.id.clone(),
                    reason: item.reason(),
                });
            }
            acknowledged.insert(item.id);
        } else if !item.is_success() && item.status != 409 {
            // 409 means the document record was already there.
            warn!(doc_id = item.id.as_str(), "failed to record document identity: {}", item.reason());
        }
    }

    if acknowledged.len() < chunk.len() {
        let missing = chunk
            .iter()
            .map(|r| r.doc_id.as_str())
            .filter(|id| !acknowledged.contains(*id));
        report.fail_all(missing, "no bulk response for record");
    }
}

impl EmbeddingCache {
    /// Store freshly computed vectors for `variant`.
    ///
    /// Upserts: an existing record for the same document is replaced. The
    /// whole batch is validated against the store dimension first and fails
    /// with [`CacheError::DimensionMismatch`] before any write. The store is
    /// created on first write, sized by the first vector. Records the engine
    /// refuses are listed in [`WriteReport::failed`].
    pub async fn save(&self, variant: Variant, records: Vec<PendingEmbedding>) -> Result<WriteReport> {
        let Some(first) = records.first() else {
            return Ok(WriteReport::default());
        };
        if !self.is_enabled() {
            debug!(%variant, count = records.len(), "cache disabled, not saving embeddings");
            return Ok(WriteReport::default());
        }

        let store = variant.store_name();
        let dimension = match self.store_dimension(variant).await? {
            Some(dimension) => dimension,
            None if first.embedding.is_empty() => {
                return Err(CacheError::DimensionMismatch {
                    doc_id: first.doc_id.clone(),
                    expected: variant.default_dimension(),
                    actual: 0,
                });
            }
            None => first.embedding.len(),
        };
        validate_dimensions(&records, dimension)?;

        self.ensure_store(variant, dimension).await?;
        self.ensure_documents_store().await?;

        let generated_at = Utc::now();
        let records: Vec<EmbeddingRecord> = records
            .into_iter()
            .map(|r| r.into_record(variant, generated_at))
            .collect();

        let mut report = WriteReport::default();
        let chunk_size = self.config.bulk_chunk_size.max(1);

        for (index, chunk) in records.chunks(chunk_size).enumerate() {
            let body = embeddings_bulk_body(store, chunk)?;
            match self.engine.bulk(body).await {
                Ok(items) => tally_embedding_items(store, chunk, items, &mut report),
                Err(err) if err.is_unavailable() && report.written > 0 => {
                    // Earlier chunks landed; hand back what is left so the
                    // caller can retry just that.
                    let reason = err.to_string();
                    warn!(store, chunk = index, "bulk write aborted: {reason}");
                    let rest = &records[index * chunk_size..];
                    report.fail_all(rest.iter().map(|r| r.doc_id.as_str()), &reason);
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        if report.is_complete() {
            info!(store, written = report.written, "saved embeddings");
        } else {
            warn!(
                store,
                written = report.written,
                failed = report.failed.len(),
                "saved embeddings with failures"
            );
        }
        Ok(report)
    }

    /// Persist the full document set in the documents store.
    ///
    /// If the store holds exactly as many full documents as `documents`, with
    /// no identity-only entries beside them, and a sample still hashes to the
    /// stored values, nothing is written unless regeneration is forced.
    /// Otherwise the store is dropped and rewritten.
    pub async fn save_documents(&self, documents: &[Document]) -> Result<DatasetSaveOutcome> {
        if !self.is_enabled() {
            return Ok(DatasetSaveOutcome::Disabled);
        }
        if documents.is_empty() {
            return Ok(DatasetSaveOutcome::Written(WriteReport::default()));
        }

        if let Some(total) = self.engine.count(DOCUMENTS_STORE).await? {
            let count = self
                .engine
                .count_matching(DOCUMENTS_STORE, &json!({ "exists": { "field": "text" } }))
                .await?
                .unwrap_or(0);
            if count == documents.len() as u64 && total == count {
                let intact = self.sample_is_intact(documents).await?;
                if intact && !self.force_regenerate() {
                    info!(count, "dataset already stored and intact, skipping");
                    return Ok(DatasetSaveOutcome::AlreadyPresent { count });
                }
                if intact {
                    info!("force regeneration active, rewriting dataset");
                } else {
                    warn!("stored dataset does not match current texts, rewriting");
                }
            } else if count == documents.len() as u64 {
                info!(
                    identity_only = total - count,
                    "documents store holds identity-only entries, rewriting"
                );
            } else {
                warn!(
                    stored = count,
                    expected = documents.len(),
                    "stored dataset has the wrong size, rewriting"
                );
            }
            self.engine.delete_index(DOCUMENTS_STORE).await?;
        }

        self.ensure_documents_store().await?;

        let mut report = WriteReport::default();
        for chunk in documents.chunks(self.config.bulk_chunk_size.max(1)) {
            let items = self.engine.bulk(documents_bulk_body(chunk)?).await?;
            for item in items {
                if item.is_success() {
                    report.written += 1;
                } else {
                    report.failed.push(FailedWrite {
                        doc_id: item.id.clone(),
                        reason: item.reason(),
                    });
                }
            }
        }

        info!(
            written = report.written,
            failed = report.failed.len(),
            "saved dataset to '{DOCUMENTS_STORE}'"
        );
        Ok(DatasetSaveOutcome::Written(report))
    }

    /// Compare stored hashes of evenly spaced documents with their texts.
    /// Identity-only entries carry a hash but no text and do not count.
    async fn sample_is_intact(&self, documents: &[Document]) -> Result<bool> {
        #[derive(Deserialize)]
        struct StoredDocument {
            doc_id: String,
            #[serde(default)]
            text_hash: Option<String>,
            #[serde(default)]
            text: Option<String>,
        }

        let sample_size = INTEGRITY_SAMPLE_SIZE.min(documents.len());
        let step = (documents.len() / sample_size.max(1)).max(1);
        let sample: Vec<&Document> = documents.iter().step_by(step).take(sample_size).collect();
        let ids: Vec<String> = sample.iter().map(|d| d.doc_id.clone()).collect();

        let stored: HashMap<String, Option<String>> = scroll_by_ids::<StoredDocument>(
            &self.engine,
            DOCUMENTS_STORE,
            &ids,
            &["doc_id", "text_hash", "text"],
            self.scroll_params(),
        )
        .await?
        .unwrap_or_default()
        .into_iter()
        .filter(|hit| hit.source.text.is_some())
        .map(|hit| (hit.source.doc_id, hit.source.text_hash))
        .collect();

        for document in sample {
            match stored.get(&document.doc_id) {
                Some(Some(hash)) if *hash == document.text_hash => {}
                _ => {
                    debug!(doc_id = document.doc_id.as_str(), "stored document missing or changed");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
