//! Scroll-protocol reads.
//!
//! A plain search is capped by the engine's result window (10,000 hits by
//! default). Reads that can exceed it open a scroll context and follow the
//! cursor until an empty page, then release the context.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::engine::{EngineClient, Hit};
use crate::error::{CacheError, Result};

/// Scroll settings for one read.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScrollParams<'a> {
    pub page_size: usize,
    pub keepalive: &'a str,
    pub max_terms: usize,
}

/// Collect every hit matching `query` in `index`.
///
/// Returns `None` if the index does not exist. A failure on any page aborts
/// the whole read, as does a cursor that runs dry before the reported total;
/// the scroll context is released either way.
pub(crate) async fn scroll_all<T: DeserializeOwned>(
    engine: &EngineClient,
    index: &str,
    query: Value,
    source: &[&str],
    params: ScrollParams<'_>,
) -> Result<Option<Vec<Hit<T>>>> {
    let body = json!({
        "query": query,
        "_source": source,
        "size": params.page_size,
        "sort": ["_doc"],
        "track_total_hits": true,
    });

    let Some(first) = engine.open_scroll::<T>(index, &body, params.keepalive).await? else {
        return Ok(None);
    };

    let total = first.total;
    let mut scroll_id = first.scroll_id;
    let mut hits = first.hits;
    let mut last_page = hits.len();
    let mut pages = 1usize;

    let outcome: Result<()> = async {
        while last_page > 0 && total.is_none_or(|t| (hits.len() as u64) < t) {
            let id = scroll_id
                .as_deref()
                .ok_or_else(|| CacheError::InvalidResponse("search response without _scroll_id".to_string()))?;
            let page = engine.next_scroll::<T>(id, params.keepalive).await?;
            if page.scroll_id.is_some() {
                scroll_id = page.scroll_id;
            }
            last_page = page.hits.len();
            hits.extend(page.hits);
            pages += 1;
        }
        Ok(())
    }
    .await;

    if let Some(id) = scroll_id.as_deref() {
        if let Err(err) = engine.clear_scroll(id).await {
            // The context expires on its own after the keepalive.
            warn!(index, "failed to clear scroll context: {err}");
        }
    }
    outcome?;

    if let Some(expected) = total {
        if hits.len() as u64 != expected {
            return Err(CacheError::Unavailable {
                operation: "scroll".to_string(),
                attempts: 1,
                reason: format!("scroll over '{index}' returned {} of {expected} hits", hits.len()),
            });
        }
    }

    debug!(index, pages, hits = hits.len(), "scroll complete");
    Ok(Some(hits))
}

/// Collect hits whose `doc_id` is one of `doc_ids`.
///
/// IDs are sent in batches of at most `params.max_terms` per query. Returns
/// `None` if the index does not exist.
pub(crate) async fn scroll_by_ids<T: DeserializeOwned>(
    engine: &EngineClient,
    index: &str,
    doc_ids: &[String],
    source: &[&str],
    params: ScrollParams<'_>,
) -> Result<Option<Vec<Hit<T>>>> {
    let mut collected = Vec::new();
    for batch in doc_ids.chunks(params.max_terms.max(1)) {
        let query = json!({ "terms": { "doc_id": batch } });
        match scroll_all::<T>(engine, index, query, source, params).await? {
            Some(hits) => collected.extend(hits),
            None => return Ok(None),
        }
    }
    Ok(Some(collected))
}
