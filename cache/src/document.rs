//! Document identity and content fingerprints.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compute the content fingerprint of a document text.
///
/// Lowercase hex SHA-256 of the UTF-8 bytes, always 64 characters.
pub fn text_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Stable document identifier for a zero-based sequence number.
pub fn doc_id_for(index: usize) -> String {
    format!("doc_{index:04}")
}

/// A source document as stored in the documents store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Join key between the document and every embedding variant.
    pub doc_id: String,

    /// Raw content.
    pub text: String,

    /// Classification label.
    pub category: String,

    /// Numeric encoding of the label.
    pub target: i64,

    /// Fingerprint of `text`.
    pub text_hash: String,

    /// When the document was created.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a document for position `index` of a dataset.
    pub fn new(
        index: usize,
        text: impl Into<String>,
        category: impl Into<String>,
        target: i64,
    ) -> Self {
        Self::with_id(doc_id_for(index), text, category, target)
    }

    /// Create a document with an explicit identifier.
    pub fn with_id(
        doc_id: impl Into<String>,
        text: impl Into<String>,
        category: impl Into<String>,
        target: i64,
    ) -> Self {
        let text = text.into();
        Self {
            doc_id: doc_id.into(),
            text_hash: text_hash(&text),
            text,
            category: category.into(),
            target,
            created_at: Utc::now(),
        }
    }

    /// Whether `text_hash` still matches `text`.
    pub fn is_intact(&self) -> bool {
        self.text_hash == text_hash(&self.text)
    }

    /// Build the `doc_id -> text_hash` mapping used by cache lookups.
    pub fn hashes(documents: &[Document]) -> HashMap<String, String> {
        documents
            .iter()
            .map(|d| (d.doc_id.clone(), d.text_hash.clone()))
            .collect()
    }

    /// Identifiers of `documents`, in order.
    pub fn ids(documents: &[Document]) -> Vec<String> {
        documents.iter().map(|d| d.doc_id.clone()).collect()
    }
}

/// Minimal identity record written alongside embeddings when the full
/// document was never saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DocumentIdentity<'a> {
    pub doc_id: &'a str,
    pub text_hash: &'a str,
    pub created_at: DateTime<Utc>,
}
