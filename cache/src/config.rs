//! Configuration for the embeddings cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::retry::RetryPolicy;

/// Configuration for the embeddings cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Engine host.
    pub host: String,

    /// Engine port.
    pub port: u16,

    /// `http` or `https`.
    pub scheme: String,

    /// Whether the cache is used at all. When false every operation is a
    /// no-op that reports "nothing cached".
    pub enabled: bool,

    /// Treat every cached embedding as stale.
    pub force_regenerate: bool,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Maximum attempts per request, including the first.
    pub max_retries: u32,

    /// Documents per scroll page.
    pub scroll_page_size: usize,

    /// How long the engine keeps a scroll context alive between pages.
    pub scroll_keepalive: String,

    /// Records per bulk request.
    pub bulk_chunk_size: usize,

    /// IDs per `terms` query. The engine rejects more than 65,536 by default.
    pub max_terms_per_query: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9200,
            scheme: "http".to_string(),
            enabled: true,
            force_regenerate: false,
            timeout_secs: 30,
            max_retries: 3,
            scroll_page_size: 1000,
            scroll_keepalive: "2m".to_string(),
            bulk_chunk_size: 1000,
            max_terms_per_query: 65_536,
        }
    }
}

impl CacheConfig {
    /// Create a configuration pointing at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Point at a full base URL such as `http://127.0.0.1:39421`.
    pub fn with_base_url(mut self, url: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| CacheError::Config(format!("invalid engine url {url}: {e}")))?;
        self.scheme = parsed.scheme().to_string();
        self.host = parsed
            .host_str()
            .ok_or_else(|| CacheError::Config(format!("engine url has no host: {url}")))?
            .to_string();
        self.port = parsed
            .port_or_known_default()
            .ok_or_else(|| CacheError::Config(format!("engine url has no port: {url}")))?;
        Ok(self)
    }

    /// Enable or disable the cache.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Force regeneration of every embedding.
    pub fn with_force_regenerate(mut self, force: bool) -> Self {
        self.force_regenerate = force;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the maximum attempts per request.
    pub fn with_max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = attempts;
        self
    }

    /// Set the scroll page size.
    pub fn with_scroll_page_size(mut self, size: usize) -> Self {
        self.scroll_page_size = size;
        self
    }

    /// Set the bulk chunk size.
    pub fn with_bulk_chunk_size(mut self, size: usize) -> Self {
        self.bulk_chunk_size = size;
        self
    }

    /// Base URL of the engine, without trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy derived from `max_retries`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_retries)
    }

    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load `.env` (if present) and then read the environment.
    pub fn from_dotenv() -> Result<Self> {
        // Missing .env is fine, the process environment still applies.
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Read the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = get("ELASTICSEARCH_HOST") {
            config.host = host;
        }
        if let Some(port) = get("ELASTICSEARCH_PORT") {
            config.port = parse_number("ELASTICSEARCH_PORT", &port)?;
        }
        if let Some(scheme) = get("ELASTICSEARCH_SCHEME") {
            config.scheme = scheme;
        }
        if let Some(enabled) = get("USE_ELASTICSEARCH_CACHE") {
            config.enabled = parse_flag("USE_ELASTICSEARCH_CACHE", &enabled)?;
        }
        if let Some(force) = get("FORCE_REGENERATE_EMBEDDINGS") {
            config.force_regenerate = parse_flag("FORCE_REGENERATE_EMBEDDINGS", &force)?;
        }
        if let Some(timeout) = get("ELASTICSEARCH_TIMEOUT") {
            config.timeout_secs = parse_number("ELASTICSEARCH_TIMEOUT", &timeout)?;
        }
        if let Some(retries) = get("ELASTICSEARCH_MAX_RETRIES") {
            config.max_retries = parse_number("ELASTICSEARCH_MAX_RETRIES", &retries)?;
        }
        if let Some(size) = get("ELASTICSEARCH_SCROLL_SIZE") {
            config.scroll_page_size = parse_number("ELASTICSEARCH_SCROLL_SIZE", &size)?;
        }
        if let Some(keepalive) = get("ELASTICSEARCH_SCROLL_KEEPALIVE") {
            config.scroll_keepalive = keepalive;
        }
        if let Some(size) = get("ELASTICSEARCH_BULK_CHUNK_SIZE") {
            config.bulk_chunk_size = parse_number("ELASTICSEARCH_BULK_CHUNK_SIZE", &size)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the cache misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.scheme != "http" && self.scheme != "https" {
            return Err(CacheError::Config(format!(
                "unsupported scheme '{}', expected http or https",
                self.scheme
            )));
        }
        if self.timeout_secs == 0 {
            return Err(CacheError::Config("timeout must be at least 1 second".to_string()));
        }
        if self.max_retries == 0 {
            return Err(CacheError::Config("max_retries must be at least 1".to_string()));
        }
        if self.scroll_page_size == 0 || self.bulk_chunk_size == 0 || self.max_terms_per_query == 0 {
            return Err(CacheError::Config("page and chunk sizes must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(CacheError::Config(format!("{key}: expected a boolean, got '{other}'"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CacheError::Config(format!("{key}: expected a number, got '{value}'")))
}
