//! Embedding variants and the stores that hold them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Name of the store holding source documents.
pub const DOCUMENTS_STORE: &str = "documents_dataset";

/// An embedding-generation method. Each variant owns one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Sparse TF-IDF vectors.
    Tfidf,
    /// Averaged Word2Vec vectors.
    Word2vec,
    /// BERT pooled output.
    Bert,
    /// Sentence-BERT.
    Sbert,
    /// OpenAI embeddings API.
    Openai,
}

impl Variant {
    /// Every variant, in a stable order.
    pub const ALL: [Variant; 5] = [
        Variant::Tfidf,
        Variant::Word2vec,
        Variant::Bert,
        Variant::Sbert,
        Variant::Openai,
    ];

    /// Short name, as stored in record metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Tfidf => "tfidf",
            Variant::Word2vec => "word2vec",
            Variant::Bert => "bert",
            Variant::Sbert => "sbert",
            Variant::Openai => "openai",
        }
    }

    /// Name of the backing store.
    pub fn store_name(self) -> &'static str {
        match self {
            Variant::Tfidf => "embeddings_tfidf",
            Variant::Word2vec => "embeddings_word2vec",
            Variant::Bert => "embeddings_bert",
            Variant::Sbert => "embeddings_sbert",
            Variant::Openai => "embeddings_openai",
        }
    }

    /// Dimension used when a caller does not name one.
    pub fn default_dimension(self) -> usize {
        match self {
            // dense_vector upper bound on the engine side
            Variant::Tfidf => 4096,
            Variant::Word2vec => 100,
            Variant::Bert => 768,
            Variant::Sbert => 384,
            Variant::Openai => 1536, // text-embedding-3-small
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = CacheError;

    /// Accepts both the short name (`bert`) and the store name
    /// (`embeddings_bert`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let name = name.strip_prefix("embeddings_").unwrap_or(&name);
        Variant::ALL
            .into_iter()
            .find(|v| v.as_str() == name)
            .ok_or_else(|| CacheError::Config(format!("unknown embedding variant: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_store_names_are_distinct() {
        let mut names: Vec<_> = Variant::ALL.iter().map(|v| v.store_name()).collect();
        names.push(DOCUMENTS_STORE);
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Variant::ALL.len() + 1);
    }

    #[test]
    fn test_parse_variant() {
        assert_eq!("bert".parse::<Variant>().unwrap(), Variant::Bert);
        assert_eq!("embeddings_tfidf".parse::<Variant>().unwrap(), Variant::Tfidf);
        assert_eq!(" OpenAI ".parse::<Variant>().unwrap(), Variant::Openai);
        assert!("glove".parse::<Variant>().is_err());
    }

    #[test]
    fn test_serde_uses_short_name() {
        let json = serde_json::to_string(&Variant::Word2vec).unwrap();
        assert_eq!(json, "\"word2vec\"");
    }
}
