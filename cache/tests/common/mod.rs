//! In-memory stand-in for the search engine, served by `wiremock`.
//!
//! Implements the subset of the REST API the cache talks to: index
//! create/exists/delete/mapping, count, store stats, scrolled search with
//! `terms` and `match_all` queries, and NDJSON bulk writes. Failures and
//! slow replies can be injected per path.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use esembed_cache::{CacheConfig, DOCUMENTS_STORE, EmbeddingCache, RetryPolicy};
use serde_json::{Value, json};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Default)]
struct Index {
    mappings: Value,
    docs: BTreeMap<String, Value>,
}

impl Index {
    fn dims(&self) -> Option<usize> {
        self.mappings
            .pointer("/properties/embedding/dims")
            .and_then(Value::as_u64)
            .map(|d| d as usize)
    }
}

struct Scroll {
    remaining: VecDeque<Value>,
    page_size: usize,
}

struct DelayRule {
    method: String,
    path_fragment: String,
    remaining: usize,
    delay: Duration,
}

struct FailRule {
    method: Option<String>,
    path_fragment: String,
    skip: usize,
    remaining: usize,
    status: u16,
}

#[derive(Default)]
struct State {
    indices: BTreeMap<String, Index>,
    scrolls: HashMap<String, Scroll>,
    next_scroll: u64,
    fail_rules: Vec<FailRule>,
    delay_rules: Vec<DelayRule>,
    empty_scroll_pages: usize,
    rejected_ids: HashSet<String>,
    pending_removals: Vec<PendingRemoval>,
    requests: Vec<(String, String)>,
}

struct PendingRemoval {
    index: String,
    doc_id: String,
    skip_searches: usize,
}

/// Shared handle on the fake engine state.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<State>>,
}

impl FakeEngine {
    /// Answer the next `times` requests whose path contains `fragment` with
    /// `status`.
    pub fn fail_next(&self, fragment: &str, times: usize, status: u16) {
        self.push_rule(None, fragment, 0, times, status);
    }

    /// Like [`fail_next`](Self::fail_next), restricted to one HTTP method.
    pub fn fail_next_method(&self, method: &str, fragment: &str, times: usize, status: u16) {
        self.push_rule(Some(method.to_string()), fragment, 0, times, status);
    }

    /// Let `skip` matching requests through, then fail the next `times`.
    pub fn fail_after(&self, fragment: &str, skip: usize, times: usize, status: u16) {
        self.push_rule(None, fragment, skip, times, status);
    }

    fn push_rule(&self, method: Option<String>, fragment: &str, skip: usize, times: usize, status: u16) {
        self.state.lock().unwrap().fail_rules.push(FailRule {
            method,
            path_fragment: fragment.to_string(),
            skip,
            remaining: times,
            status,
        });
    }

    /// Process the next `times` matching requests normally but hold their
    /// replies back for `delay`.
    pub fn delay_next(&self, method: &str, fragment: &str, times: usize, delay: Duration) {
        self.state.lock().unwrap().delay_rules.push(DelayRule {
            method: method.to_string(),
            path_fragment: fragment.to_string(),
            remaining: times,
            delay,
        });
    }

    /// Answer the next `times` scroll continuations with an empty page, as if
    /// the cursor had run dry.
    pub fn empty_next_scroll(&self, times: usize) {
        self.state.lock().unwrap().empty_scroll_pages += times;
    }

    /// Refuse bulk `index` actions for these IDs (documents store excluded).
    pub fn reject_ids(&self, ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.rejected_ids.extend(ids.iter().map(|id| id.to_string()));
    }

    /// Delete `doc_id` from `index` just before the search that follows
    /// `skip_searches` searches on that index.
    pub fn remove_before_search(&self, index: &str, doc_id: &str, skip_searches: usize) {
        self.state.lock().unwrap().pending_removals.push(PendingRemoval {
            index: index.to_string(),
            doc_id: doc_id.to_string(),
            skip_searches,
        });
    }

    /// Number of scroll contexts not yet cleared.
    pub fn open_scrolls(&self) -> usize {
        self.state.lock().unwrap().scrolls.len()
    }

    /// Number of requests whose `METHOD path` contains `fragment`.
    pub fn request_count(&self, fragment: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(method, path)| format!("{method} {path}").contains(fragment))
            .count()
    }

    /// Stored source of `doc_id` in `index`.
    pub fn source(&self, index: &str, doc_id: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state.indices.get(index)?.docs.get(doc_id).cloned()
    }

    /// Put a raw source into `index`, creating the index if needed.
    pub fn put_source(&self, index: &str, doc_id: &str, source: Value) {
        let mut state = self.state.lock().unwrap();
        state
            .indices
            .entry(index.to_string())
            .or_default()
            .docs
            .insert(doc_id.to_string(), source);
    }

    /// Number of records in `index`, `None` if it does not exist.
    pub fn doc_count(&self, index: &str) -> Option<usize> {
        let state = self.state.lock().unwrap();
        state.indices.get(index).map(|i| i.docs.len())
    }
}

fn error(status: u16, kind: &str, reason: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "error": { "type": kind, "reason": reason },
        "status": status
    }))
}

fn ok(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

fn index_missing(index: &str) -> ResponseTemplate {
    error(404, "index_not_found_exception", &format!("no such index [{index}]"))
}

impl State {
    fn injected_failure(&mut self, method: &str, path: &str) -> Option<ResponseTemplate> {
        let rule = self.fail_rules.iter_mut().find(|r| {
            r.remaining > 0
                && path.contains(&r.path_fragment)
                && r.method.as_deref().is_none_or(|m| m == method)
        })?;
        if rule.skip > 0 {
            rule.skip -= 1;
            return None;
        }
        rule.remaining -= 1;
        Some(error(rule.status, "injected_failure", "injected by test"))
    }

    fn reply_delay(&mut self, method: &str, path: &str) -> Option<Duration> {
        let rule = self
            .delay_rules
            .iter_mut()
            .find(|r| r.remaining > 0 && r.method == method && path.contains(&r.path_fragment))?;
        rule.remaining -= 1;
        Some(rule.delay)
    }

    fn count(&self, index: &str, body: &Value) -> ResponseTemplate {
        let Some(idx) = self.indices.get(index) else {
            return index_missing(index);
        };
        let field = body.pointer("/query/exists/field").and_then(Value::as_str);
        let count = idx
            .docs
            .values()
            .filter(|source| field.is_none_or(|f| source.get(f).is_some_and(|v| !v.is_null())))
            .count();
        ok(json!({ "count": count }))
    }

    fn create_index(&mut self, index: &str, body: &Value) -> ResponseTemplate {
        if self.indices.contains_key(index) {
            return error(
                400,
                "resource_already_exists_exception",
                &format!("index [{index}] already exists"),
            );
        }
        let mappings = body.get("mappings").cloned().unwrap_or_else(|| json!({}));
        self.indices.insert(
            index.to_string(),
            Index {
                mappings,
                docs: BTreeMap::new(),
            },
        );
        ok(json!({ "acknowledged": true, "index": index }))
    }

    fn apply_removals(&mut self, index: &str) {
        let mut due = Vec::new();
        self.pending_removals.retain_mut(|removal| {
            if removal.index != index {
                return true;
            }
            if removal.skip_searches > 0 {
                removal.skip_searches -= 1;
                return true;
            }
            due.push(removal.doc_id.clone());
            false
        });
        if let Some(idx) = self.indices.get_mut(index) {
            for doc_id in due {
                idx.docs.remove(&doc_id);
            }
        }
    }

    fn open_scroll(&mut self, index: &str, body: &Value) -> ResponseTemplate {
        self.apply_removals(index);
        let Some(idx) = self.indices.get(index) else {
            return index_missing(index);
        };
        let page_size = body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let wanted: Option<HashSet<&str>> = body
            .pointer("/query/terms/doc_id")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect());

        let matched: VecDeque<Value> = idx
            .docs
            .iter()
            .filter(|(_, source)| match &wanted {
                Some(wanted) => source
                    .get("doc_id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| wanted.contains(id)),
                None => true,
            })
            .map(|(id, source)| json!({ "_index": index, "_id": id, "_source": source }))
            .collect();

        let total = matched.len();
        self.next_scroll += 1;
        let scroll_id = format!("scroll-{}", self.next_scroll);
        let mut scroll = Scroll {
            remaining: matched,
            page_size,
        };
        let hits = take_page(&mut scroll);
        self.scrolls.insert(scroll_id.clone(), scroll);

        ok(json!({
            "_scroll_id": scroll_id,
            "hits": { "total": { "value": total, "relation": "eq" }, "hits": hits }
        }))
    }

    fn next_scroll(&mut self, body: &Value) -> ResponseTemplate {
        let scroll_id = body.get("scroll_id").and_then(Value::as_str).unwrap_or_default();
        let Some(scroll) = self.scrolls.get_mut(scroll_id) else {
            return error(404, "search_context_missing_exception", "No search context found");
        };
        if self.empty_scroll_pages > 0 {
            self.empty_scroll_pages -= 1;
            return ok(json!({ "_scroll_id": scroll_id, "hits": { "hits": [] } }));
        }
        let hits = take_page(scroll);
        ok(json!({
            "_scroll_id": scroll_id,
            "hits": { "hits": hits }
        }))
    }

    fn clear_scroll(&mut self, body: &Value) -> ResponseTemplate {
        let ids: Vec<String> = match body.get("scroll_id") {
            Some(Value::Array(ids)) => ids.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            Some(Value::String(id)) => vec![id.clone()],
            _ => Vec::new(),
        };
        let freed = ids.iter().filter(|id| self.scrolls.remove(*id).is_some()).count();
        ok(json!({ "succeeded": true, "num_freed": freed }))
    }

    fn bulk(&mut self, body: &[u8]) -> ResponseTemplate {
        let text = String::from_utf8_lossy(body);
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let mut items = Vec::new();
        let mut errors = false;

        while let (Some(action_line), Some(source_line)) = (lines.next(), lines.next()) {
            let action: Value = serde_json::from_str(action_line).unwrap();
            let source: Value = serde_json::from_str(source_line).unwrap();
            let (kind, meta) = action.as_object().unwrap().iter().next().unwrap();
            let index = meta["_index"].as_str().unwrap().to_string();
            let id = meta["_id"].as_str().unwrap().to_string();

            let idx = self.indices.entry(index.clone()).or_default();
            let (status, err): (u16, Option<Value>) = if kind == "create" && idx.docs.contains_key(&id) {
                (
                    409,
                    Some(json!({ "type": "version_conflict_engine_exception", "reason": "document already exists" })),
                )
            } else if kind == "index" && index != DOCUMENTS_STORE && self.rejected_ids.contains(&id) {
                (
                    400,
                    Some(json!({ "type": "mapper_parsing_exception", "reason": "rejected by test" })),
                )
            } else if let (Some(dims), Some(len)) = (idx.dims(), vector_len(&source)) {
                if len == dims {
                    let status = if idx.docs.insert(id.clone(), source).is_some() { 200 } else { 201 };
                    (status, None)
                } else {
                    (
                        400,
                        Some(json!({ "type": "document_parsing_exception", "reason": "wrong dims" })),
                    )
                }
            } else {
                let status = if idx.docs.insert(id.clone(), source).is_some() { 200 } else { 201 };
                (status, None)
            };

            errors |= err.is_some();
            let mut item = json!({ "_index": index, "_id": id, "status": status });
            if let Some(err) = err {
                item["error"] = err;
            }
            items.push(json!({ kind.clone(): item }));
        }

        ok(json!({ "took": 1, "errors": errors, "items": items }))
    }

    fn store_stats(&self, index: &str) -> ResponseTemplate {
        let Some(idx) = self.indices.get(index) else {
            return index_missing(index);
        };
        let size: usize = idx.docs.values().map(|v| v.to_string().len()).sum();
        let block = json!({ "total": { "store": { "size_in_bytes": size } } });
        ok(json!({ "_all": block.clone(), "indices": { index: block } }))
    }
}

fn vector_len(source: &Value) -> Option<usize> {
    source.get("embedding").and_then(Value::as_array).map(Vec::len)
}

fn take_page(scroll: &mut Scroll) -> Vec<Value> {
    let n = scroll.page_size.min(scroll.remaining.len());
    scroll.remaining.drain(..n).collect()
}

impl Respond for FakeEngine {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();
        let method = request.method.as_str().to_string();
        let path = request.url.path().to_string();
        state.requests.push((method.clone(), path.clone()));

        if let Some(failure) = state.injected_failure(&method, &path) {
            return failure;
        }

        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        let response = match (method.as_str(), segments.as_slice()) {
            ("GET", []) => ok(json!({
                "cluster_name": "fake",
                "version": { "number": "8.11.0" },
                "tagline": "You Know, for Search"
            })),
            ("POST", ["_bulk"]) => state.bulk(&request.body),
            ("POST", ["_search", "scroll"]) => state.next_scroll(&body),
            ("DELETE", ["_search", "scroll"]) => state.clear_scroll(&body),
            ("HEAD", [index]) => {
                let status = if state.indices.contains_key(*index) { 200 } else { 404 };
                ResponseTemplate::new(status)
            }
            ("PUT", [index]) => state.create_index(index, &body),
            ("DELETE", [index]) => match state.indices.remove(*index) {
                Some(_) => ok(json!({ "acknowledged": true })),
                None => index_missing(index),
            },
            ("GET", [index, "_mapping"]) => match state.indices.get(*index) {
                Some(idx) => ok(json!({ *index: { "mappings": idx.mappings } })),
                None => index_missing(index),
            },
            ("GET", [index, "_count"]) => state.count(index, &Value::Null),
            ("POST", [index, "_count"]) => state.count(index, &body),
            ("GET", [index, "_stats", "store"]) => state.store_stats(index),
            ("POST", [index, "_search"]) => state.open_scroll(index, &body),
            _ => error(400, "unsupported", &format!("fake engine cannot handle {method} {path}")),
        };

        match state.reply_delay(&method, &path) {
            Some(delay) => response.set_delay(delay),
            None => response,
        }
    }
}

/// Install a test log writer once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("esembed_cache=debug")
        .try_init();
}

/// Retry policy that keeps tests fast.
pub fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(attempts)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

/// A running fake engine and a cache pointed at it.
pub struct Harness {
    pub server: MockServer,
    pub engine: FakeEngine,
    pub cache: EmbeddingCache,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    pub async fn start_with(configure: impl FnOnce(CacheConfig) -> CacheConfig) -> Self {
        init_tracing();
        let server = MockServer::start().await;
        let engine = FakeEngine::default();
        Mock::given(any())
            .respond_with(engine.clone())
            .mount(&server)
            .await;

        let config = CacheConfig::default().with_base_url(&server.uri()).unwrap();
        let cache = EmbeddingCache::new(configure(config))
            .unwrap()
            .with_retry_policy(fast_retry(3));

        Self { server, engine, cache }
    }

    /// A second cache client on the same engine with another configuration.
    pub fn client_with(&self, configure: impl FnOnce(CacheConfig) -> CacheConfig) -> EmbeddingCache {
        let config = CacheConfig::default().with_base_url(&self.server.uri()).unwrap();
        EmbeddingCache::new(configure(config))
            .unwrap()
            .with_retry_policy(fast_retry(3))
    }
}

/// `n` sequential document IDs.
pub fn ids(n: usize) -> Vec<String> {
    (0..n).map(esembed_cache::doc_id_for).collect()
}
