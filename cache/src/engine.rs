//! HTTP client for the backing search engine.
//!
//! Thin wrapper over the engine's REST API. Every request runs through the
//! shared [`RetryPolicy`]; transport errors, timeouts, 429 and 5xx answers are
//! retried, everything else is surfaced immediately. Scroll continuations are
//! the exception: they advance a server-side cursor, so a lost reply cannot be
//! replayed and is reported as [`CacheError::Unavailable`] straight away.

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::retry::{AttemptError, RetryPolicy};

/// Client for one engine endpoint. Cheap to clone; clones share the
/// connection pool.
#[derive(Clone)]
pub(crate) struct EngineClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

/// Status and body of a completed request.
struct Reply {
    status: StatusCode,
    body: String,
}

/// Basic information returned by the engine root endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineInfo {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub version: Option<EngineVersion>,
}

/// Engine version block.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineVersion {
    pub number: String,
}

/// One page of a scrolled search.
#[derive(Debug)]
pub(crate) struct ScrollPage<T> {
    pub scroll_id: Option<String>,
    pub total: Option<u64>,
    pub hits: Vec<Hit<T>>,
}

/// A search hit.
#[derive(Debug, Deserialize)]
pub(crate) struct Hit<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source")]
    pub source: T,
}

#[derive(Deserialize)]
struct SearchResponse<T> {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: SearchHits<T>,
}

#[derive(Deserialize)]
struct SearchHits<T> {
    #[serde(default)]
    total: Option<TotalHits>,
    hits: Vec<Hit<T>>,
}

#[derive(Deserialize)]
struct TotalHits {
    value: u64,
    #[serde(default)]
    relation: Option<String>,
}

impl TotalHits {
    /// The hit count, when it is exact rather than a lower bound.
    fn exact(&self) -> Option<u64> {
        match self.relation.as_deref() {
            None | Some("eq") => Some(self.value),
            Some(_) => None,
        }
    }
}

/// Per-item outcome of a bulk request.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BulkItem {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub error: Option<Value>,
}

impl BulkItem {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Short description of the item error.
    pub fn reason(&self) -> String {
        match &self.error {
            Some(error) => describe_error(error),
            None => format!("status {}", self.status),
        }
    }
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<std::collections::HashMap<String, BulkItem>>,
}

impl EngineClient {
    /// Build a client from the cache configuration.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CacheError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            retry: config.retry_policy(),
        })
    }

    /// Replace the retry policy.
    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request built by `build`, retrying transient failures.
    ///
    /// Successful statuses and those listed in `accepted` are returned as a
    /// [`Reply`]; any other status is an error.
    async fn send<B>(&self, operation: &str, accepted: &[StatusCode], build: B) -> Result<Reply>
    where
        B: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.send_with(&self.retry, operation, accepted, build).await
    }

    async fn send_with<B>(
        &self,
        retry: &RetryPolicy,
        operation: &str,
        accepted: &[StatusCode],
        build: B,
    ) -> Result<Reply>
    where
        B: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let http = &self.http;
        let build = &build;
        retry
            .run(operation, move || async move {
                let response = build(http).send().await.map_err(|e| classify_transport(operation, e))?;
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| AttemptError::Transient(format!("failed to read body: {e}")))?;

                if status.is_success() || accepted.contains(&status) {
                    return Ok(Reply { status, body });
                }
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    return Err(AttemptError::Transient(format!(
                        "{status}: {}",
                        error_summary(&body)
                    )));
                }
                Err(AttemptError::Fatal(CacheError::Engine {
                    operation: operation.to_string(),
                    status: status.as_u16(),
                    reason: error_summary(&body),
                }))
            })
            .await
    }

    /// Check the engine is reachable.
    pub async fn ping(&self) -> Result<EngineInfo> {
        let url = self.url("/");
        let reply = self.send("ping", &[], |http| http.get(&url)).await?;
        Ok(serde_json::from_str(&reply.body).unwrap_or_default())
    }

    /// Whether `index` exists.
    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        let url = self.url(index);
        let reply = self
            .send("index_exists", &[StatusCode::NOT_FOUND], |http| http.head(&url))
            .await?;
        Ok(reply.status != StatusCode::NOT_FOUND)
    }

    /// Create `index` with `body`. Returns false if it already existed.
    pub async fn create_index(&self, index: &str, body: &Value) -> Result<bool> {
        let url = self.url(index);
        let reply = self
            .send("create_index", &[StatusCode::BAD_REQUEST], |http| {
                http.put(&url).json(body)
            })
            .await?;

        if reply.status == StatusCode::BAD_REQUEST {
            if error_type(&reply.body).as_deref() == Some("resource_already_exists_exception") {
                return Ok(false);
            }
            return Err(CacheError::Engine {
                operation: "create_index".to_string(),
                status: reply.status.as_u16(),
                reason: error_summary(&reply.body),
            });
        }
        Ok(true)
    }

    /// Mapping of `index`, or `None` when it does not exist.
    pub async fn mapping(&self, index: &str) -> Result<Option<Value>> {
        let url = self.url(&format!("{index}/_mapping"));
        let reply = self
            .send("get_mapping", &[StatusCode::NOT_FOUND], |http| http.get(&url))
            .await?;
        if reply.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(&reply.body)?;
        // Keyed by concrete index name, which differs from `index` for aliases.
        let mapping = match value.get(index) {
            Some(mapping) => mapping.get("mappings").cloned(),
            None => value
                .as_object()
                .and_then(|m| m.values().next())
                .and_then(|m| m.get("mappings"))
                .cloned(),
        };
        mapping
            .map(Some)
            .ok_or_else(|| CacheError::InvalidResponse(format!("mapping for '{index}' missing")))
    }

    /// Delete `index`. Returns false if it did not exist.
    pub async fn delete_index(&self, index: &str) -> Result<bool> {
        let url = self.url(index);
        let reply = self
            .send("delete_index", &[StatusCode::NOT_FOUND], |http| http.delete(&url))
            .await?;
        Ok(reply.status != StatusCode::NOT_FOUND)
    }

    /// Number of documents in `index`, or `None` when it does not exist.
    pub async fn count(&self, index: &str) -> Result<Option<u64>> {
        #[derive(Deserialize)]
        struct CountResponse {
            count: u64,
        }

        let url = self.url(&format!("{index}/_count"));
        let reply = self
            .send("count", &[StatusCode::NOT_FOUND], |http| http.get(&url))
            .await?;
        if reply.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: CountResponse = serde_json::from_str(&reply.body)?;
        Ok(Some(parsed.count))
    }

    /// Number of documents in `index` matching `query`, or `None` when the
    /// index does not exist.
    pub async fn count_matching(&self, index: &str, query: &Value) -> Result<Option<u64>> {
        #[derive(Deserialize)]
        struct CountResponse {
            count: u64,
        }

        let url = self.url(&format!("{index}/_count"));
        let body = serde_json::json!({ "query": query });
        let reply = self
            .send("count", &[StatusCode::NOT_FOUND], |http| http.post(&url).json(&body))
            .await?;
        if reply.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: CountResponse = serde_json::from_str(&reply.body)?;
        Ok(Some(parsed.count))
    }

    /// On-disk size of `index` in bytes, or `None` when it does not exist.
    pub async fn store_size(&self, index: &str) -> Result<Option<u64>> {
        let url = self.url(&format!("{index}/_stats/store"));
        let reply = self
            .send("store_stats", &[StatusCode::NOT_FOUND], |http| http.get(&url))
            .await?;
        if reply.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(&reply.body)?;
        let size = value
            .pointer("/_all/total/store/size_in_bytes")
            .or_else(|| {
                value
                    .get("indices")
                    .and_then(|i| i.get(index))
                    .and_then(|i| i.pointer("/total/store/size_in_bytes"))
            })
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(Some(size))
    }

    /// Open a scroll over `index`. `None` when the index does not exist.
    pub async fn open_scroll<T: DeserializeOwned>(
        &self,
        index: &str,
        body: &Value,
        keepalive: &str,
    ) -> Result<Option<ScrollPage<T>>> {
        let url = self.url(&format!("{index}/_search"));
        let reply = self
            .send("search", &[StatusCode::NOT_FOUND], |http| {
                http.post(&url).query(&[("scroll", keepalive)]).json(body)
            })
            .await?;
        if reply.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_page(&reply.body).map(Some)
    }

    /// Fetch the next page of an open scroll.
    ///
    /// Sent once: the engine may have advanced the cursor even when the
    /// reply is lost. An expired context is reported as unavailable too.
    pub async fn next_scroll<T: DeserializeOwned>(
        &self,
        scroll_id: &str,
        keepalive: &str,
    ) -> Result<ScrollPage<T>> {
        let url = self.url("_search/scroll");
        let body = serde_json::json!({ "scroll": keepalive, "scroll_id": scroll_id });
        let reply = self
            .send_with(&RetryPolicy::no_retry(), "scroll", &[StatusCode::NOT_FOUND], |http| {
                http.post(&url).json(&body)
            })
            .await?;
        if reply.status == StatusCode::NOT_FOUND {
            return Err(CacheError::Unavailable {
                operation: "scroll".to_string(),
                attempts: 1,
                reason: format!("scroll context lost: {}", error_summary(&reply.body)),
            });
        }
        parse_page(&reply.body)
    }

    /// Release a scroll context on the engine.
    pub async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let url = self.url("_search/scroll");
        let body = serde_json::json!({ "scroll_id": [scroll_id] });
        self.send("clear_scroll", &[StatusCode::NOT_FOUND], |http| {
            http.delete(&url).json(&body)
        })
        .await?;
        Ok(())
    }

    /// Send an NDJSON bulk body and return the per-item outcomes.
    pub async fn bulk(&self, ndjson: String) -> Result<Vec<BulkItem>> {
        let url = self.url("_bulk");
        let reply = self
            .send("bulk", &[], |http| {
                http.post(&url)
                    .query(&[("refresh", "wait_for")])
                    .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                    .body(ndjson.clone())
            })
            .await?;

        let parsed: BulkResponse = serde_json::from_str(&reply.body)?;
        let items: Vec<BulkItem> = parsed
            .items
            .into_iter()
            .filter_map(|item| item.into_values().next())
            .collect();
        debug!("bulk request returned {} item(s)", items.len());
        Ok(items)
    }
}

fn parse_page<T: DeserializeOwned>(body: &str) -> Result<ScrollPage<T>> {
    let parsed: SearchResponse<T> = serde_json::from_str(body)?;
    Ok(ScrollPage {
        scroll_id: parsed.scroll_id,
        total: parsed.hits.total.as_ref().and_then(TotalHits::exact),
        hits: parsed.hits.hits,
    })
}

fn classify_transport(operation: &str, err: reqwest::Error) -> AttemptError {
    if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
        AttemptError::Transient(err.to_string())
    } else {
        AttemptError::Fatal(CacheError::InvalidResponse(format!("{operation}: {err}")))
    }
}

fn error_type(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/type")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `type: reason` from an engine error body, or the raw body.
fn error_summary(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match value.get("error") {
            Some(error) => describe_error(error),
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

fn describe_error(error: &Value) -> String {
    let kind = error.get("type").and_then(Value::as_str);
    let reason = error.get("reason").and_then(Value::as_str);
    match (kind, reason) {
        (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
        (Some(kind), None) => kind.to_string(),
        _ => error.to_string(),
    }
}
