//! Embedding records as they live in a variant store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::variant::Variant;

/// Generation metadata attached to every cached vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    /// Variant that produced the vector.
    pub model_type: Variant,

    /// Concrete model, e.g. `all-MiniLM-L6-v2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Model or parameter-set version.
    pub model_version: String,

    /// When the vector was generated.
    pub generated_at: DateTime<Utc>,

    /// Length of the vector.
    pub dimensions: usize,

    /// Hash of the text the vector was generated from.
    pub text_hash: String,
}

/// One cached vector for one document in one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub doc_id: String,
    pub embedding: Embedding,
    pub metadata: EmbeddingMetadata,
}

/// A freshly computed vector handed to the cache writer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEmbedding {
    pub doc_id: String,
    pub embedding: Embedding,
    pub text_hash: String,
    pub model_name: Option<String>,
    pub model_version: String,
}

impl PendingEmbedding {
    /// Create a pending write with model version `1.0`.
    pub fn new(doc_id: impl Into<String>, embedding: Embedding, text_hash: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            embedding,
            text_hash: text_hash.into(),
            model_name: None,
            model_version: "1.0".to_string(),
        }
    }

    /// Set the model name.
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    /// Set the model version.
    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    /// Turn into a stored record stamped with `generated_at`.
    pub fn into_record(self, variant: Variant, generated_at: DateTime<Utc>) -> EmbeddingRecord {
        let dimensions = self.embedding.len();
        EmbeddingRecord {
            doc_id: self.doc_id,
            embedding: self.embedding,
            metadata: EmbeddingMetadata {
                model_type: variant,
                model_name: self.model_name,
                model_version: self.model_version,
                generated_at,
                dimensions,
                text_hash: self.text_hash,
            },
        }
    }
}
