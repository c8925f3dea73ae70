//! Cache storage: named caches of request/response pairs.

use async_trait::async_trait;
use bytes::Bytes;
use gazon_net::Response;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::ServiceWorkerError;

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers in wire order; repeated names keep every value.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage.
    pub fn from_response(key: &str, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: key.to_string(),
            method: "GET".to_string(),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers,
            body: response.body.to_vec(),
            cached_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }

    /// Rebuild the response this entry was taken from.
    pub fn to_response(&self) -> Result<Response, ServiceWorkerError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", self.url, e)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Ok(Response {
            url,
            status,
            status_text: self.status_text.clone(),
            headers,
            body: Bytes::from(self.body.clone()),
        })
    }
}

/// A single named cache.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries keyed by request URL.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add or overwrite an entry.
    pub fn put(&mut self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache storage capability (the `caches` global).
///
/// Shared between the worker and every host; all operations are async and
/// fallible so a host-provided store can surface quota or I/O failures.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a cache, creating it if absent.
    async fn open(&self, cache: &str) -> Result<(), ServiceWorkerError>;

    /// Look up a request in one cache.
    async fn match_request(
        &self,
        cache: &str,
        key: &str,
    ) -> Result<Option<Response>, ServiceWorkerError>;

    /// Store a response, creating the cache if absent.
    async fn put(&self, cache: &str, key: &str, response: &Response)
        -> Result<(), ServiceWorkerError>;

    /// Store several responses in one step: either all land or none do.
    async fn put_all(
        &self,
        cache: &str,
        entries: &[(String, Response)],
    ) -> Result<(), ServiceWorkerError>;

    /// Delete a whole cache. Returns whether it existed.
    async fn delete(&self, cache: &str) -> Result<bool, ServiceWorkerError>;

    /// Names of all caches.
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError>;

    /// Request keys stored in one cache (empty if the cache is absent).
    async fn entry_keys(&self, cache: &str) -> Result<Vec<String>, ServiceWorkerError>;
}

/// In-process cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStore {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, cache: &str) -> Result<(), ServiceWorkerError> {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_insert_with(|| Cache::new(cache));
        Ok(())
    }

    async fn match_request(
        &self,
        cache: &str,
        key: &str,
    ) -> Result<Option<Response>, ServiceWorkerError> {
        let caches = self.caches.read().await;
        caches
            .get(cache)
            .and_then(|c| c.match_request(key))
            .map(CacheEntry::to_response)
            .transpose()
    }

    async fn put(
        &self,
        cache: &str,
        key: &str,
        response: &Response,
    ) -> Result<(), ServiceWorkerError> {
        let entry = CacheEntry::from_response(key, response);
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_insert_with(|| Cache::new(cache))
            .put(key, entry);
        Ok(())
    }

    async fn put_all(
        &self,
        cache: &str,
        entries: &[(String, Response)],
    ) -> Result<(), ServiceWorkerError> {
        // Snapshots are built before the lock so a failure cannot leave a
        // partially filled cache.
        let snapshots: Vec<CacheEntry> = entries
            .iter()
            .map(|(key, response)| CacheEntry::from_response(key, response))
            .collect();

        let mut caches = self.caches.write().await;
        let target = caches
            .entry(cache.to_string())
            .or_insert_with(|| Cache::new(cache));
        for entry in snapshots {
            let key = entry.url.clone();
            target.put(&key, entry);
        }
        Ok(())
    }

    async fn delete(&self, cache: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.caches.write().await.remove(cache).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn entry_keys(&self, cache: &str) -> Result<Vec<String>, ServiceWorkerError> {
        let caches = self.caches.read().await;
        let mut keys: Vec<String> = caches
            .get(cache)
            .map(|c| c.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}
