//! Cache administration: status reporting and invalidation.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::EmbeddingCache;
use crate::error::Result;
use crate::variant::{DOCUMENTS_STORE, Variant};

/// State of one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatus {
    /// Store name.
    pub store: String,

    /// Whether the store exists.
    pub exists: bool,

    /// Number of records.
    pub doc_count: u64,

    /// Approximate on-disk size.
    pub size_bytes: u64,
}

impl StoreStatus {
    fn absent(store: &str) -> Self {
        Self {
            store: store.to_string(),
            exists: false,
            doc_count: 0,
            size_bytes: 0,
        }
    }

    /// Size in MiB, rounded to two decimals.
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// Cache status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    /// Engine address.
    pub engine: String,

    /// False in bypass mode; `stores` is then empty.
    pub enabled: bool,

    /// Per-store figures.
    pub stores: Vec<StoreStatus>,

    /// Sum of `doc_count` over `stores`.
    pub total_docs: u64,

    /// Sum of `size_bytes` over `stores`.
    pub total_size_bytes: u64,
}

impl CacheStatus {
    /// Figures for one store, if it was part of the report.
    pub fn store(&self, name: &str) -> Option<&StoreStatus> {
        self.stores.iter().find(|s| s.store == name)
    }

    /// Figures for the store of `variant`.
    pub fn variant(&self, variant: Variant) -> Option<&StoreStatus> {
        self.store(variant.store_name())
    }
}

/// Outcome of a clear operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    /// Stores that were deleted.
    pub removed: Vec<String>,

    /// Stores that did not exist.
    pub absent: Vec<String>,
}

impl EmbeddingCache {
    /// Report record counts and sizes.
    ///
    /// With a variant, only that store is reported. Without one, every
    /// variant store and the documents store are.
    pub async fn status(&self, variant: Option<Variant>) -> Result<CacheStatus> {
        let mut status = CacheStatus {
            engine: self.engine.base_url().to_string(),
            enabled: self.is_enabled(),
            stores: Vec::new(),
            total_docs: 0,
            total_size_bytes: 0,
        };
        if !self.is_enabled() {
            return Ok(status);
        }

        let stores: Vec<&str> = match variant {
            Some(variant) => vec![variant.store_name()],
            None => Variant::ALL
                .iter()
                .map(|v| v.store_name())
                .chain(std::iter::once(DOCUMENTS_STORE))
                .collect(),
        };

        for store in stores {
            let store_status = self.store_status(store).await?;
            status.total_docs += store_status.doc_count;
            status.total_size_bytes += store_status.size_bytes;
            status.stores.push(store_status);
        }
        Ok(status)
    }

    async fn store_status(&self, store: &str) -> Result<StoreStatus> {
        let Some(doc_count) = self.engine.count(store).await? else {
            return Ok(StoreStatus::absent(store));
        };
        let size_bytes = self.engine.store_size(store).await?.unwrap_or(0);
        Ok(StoreStatus {
            store: store.to_string(),
            exists: true,
            doc_count,
            size_bytes,
        })
    }

    /// Delete the store of `variant`, or every variant store when `None`.
    ///
    /// Clearing a store that does not exist is not an error. The documents
    /// store is left alone; see [`clear_documents`](Self::clear_documents).
    pub async fn clear(&self, variant: Option<Variant>) -> Result<ClearReport> {
        let mut report = ClearReport::default();
        if !self.is_enabled() {
            return Ok(report);
        }

        let variants = match variant {
            Some(variant) => vec![variant],
            None => Variant::ALL.to_vec(),
        };
        for variant in variants {
            self.drop_store(variant.store_name(), &mut report).await?;
        }
        Ok(report)
    }

    /// Delete the documents store.
    pub async fn clear_documents(&self) -> Result<ClearReport> {
        let mut report = ClearReport::default();
        if self.is_enabled() {
            self.drop_store(DOCUMENTS_STORE, &mut report).await?;
        }
        Ok(report)
    }

    async fn drop_store(&self, store: &str, report: &mut ClearReport) -> Result<()> {
        if self.engine.delete_index(store).await? {
            info!(store, "removed store");
            report.removed.push(store.to_string());
        } else {
            info!(store, "store does not exist, nothing to clear");
            report.absent.push(store.to_string());
        }
        Ok(())
    }
}
