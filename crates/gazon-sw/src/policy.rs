//! Cache policy engine: picks a strategy per request and runs it.
//!
//! Classification, first match wins:
//!
//! ```text
//! same-origin GET ──┬── path in precache manifest ──→ cache-first   (precache)
//!                   ├── Accept: text/html ─────────→ network-first (runtime)
//!                   └── anything else ─────────────→ cache-first   (precache)
//! ```
//!
//! Both strategies end in [`CachePolicyEngine::offline_fallback`], which
//! always produces a response.

use std::sync::Arc;

use bytes::Bytes;
use gazon_common::CacheConfig;
use gazon_net::{Fetcher, Request, Response};
use hashbrown::HashSet;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::ServiceWorkerError;

/// Names of the two caches of the current generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    /// `<namespace>-`
    prefix: String,
    /// `<namespace>-<version>`
    pub precache: String,
    /// `<namespace>-runtime-<version>`
    pub runtime: String,
}

impl CacheNames {
    pub fn new(namespace: &str, version: &str) -> Self {
        Self {
            prefix: format!("{namespace}-"),
            precache: format!("{namespace}-{version}"),
            runtime: format!("{namespace}-runtime-{version}"),
        }
    }

    /// Whether `name` belongs to this app but to another generation.
    pub fn is_stale(&self, name: &str) -> bool {
        name.starts_with(&self.prefix) && name != self.precache && name != self.runtime
    }

    /// Name of the cache a strategy targets.
    pub fn for_kind(&self, kind: CacheKind) -> &str {
        match kind {
            CacheKind::Precache => &self.precache,
            CacheKind::Runtime => &self.runtime,
        }
    }
}

impl From<&CacheConfig> for CacheNames {
    fn from(config: &CacheConfig) -> Self {
        Self::new(&config.namespace, &config.version)
    }
}

/// Which cache of the generation a strategy reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Precache,
    Runtime,
}

/// Why a request got its strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Path is listed in the precache manifest.
    AppShell,
    /// HTML document outside the manifest.
    Document,
    /// Any other static asset.
    Asset,
}

/// Resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst(CacheKind),
    NetworkFirst(CacheKind),
}

impl RequestClass {
    pub fn strategy(self) -> Strategy {
        match self {
            RequestClass::AppShell | RequestClass::Asset => Strategy::CacheFirst(CacheKind::Precache),
            RequestClass::Document => Strategy::NetworkFirst(CacheKind::Runtime),
        }
    }
}

/// JSON body of the synthetic offline response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OfflineBody {
    pub error: String,
    pub message: String,
}

/// Strategy classification and execution for intercepted requests.
pub struct CachePolicyEngine {
    names: CacheNames,
    scope: Url,
    manifest: Vec<Url>,
    manifest_paths: HashSet<String>,
    app_root: Url,
    offline_message: String,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
}

impl CachePolicyEngine {
    /// Build an engine for one cache generation.
    pub fn new(
        config: &CacheConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        let resolve = |entry: &str| {
            config.scope.join(entry).map_err(|e| {
                ServiceWorkerError::Config(format!("manifest entry {entry:?}: {e}"))
            })
        };

        let manifest = config
            .precache
            .iter()
            .map(|entry| resolve(entry.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let manifest_paths = manifest.iter().map(|u| u.path().to_string()).collect();
        let app_root = resolve(config.app_root.as_str())?;

        Ok(Self {
            names: CacheNames::from(config),
            scope: config.scope.clone(),
            manifest,
            manifest_paths,
            app_root,
            offline_message: config.offline_message.clone(),
            store,
            fetcher,
        })
    }

    /// Cache names of this generation.
    pub fn names(&self) -> &CacheNames {
        &self.names
    }

    /// Manifest entries resolved against the scope, in manifest order.
    pub fn manifest(&self) -> &[Url] {
        &self.manifest
    }

    /// Classify a request. `None` means the request is not intercepted.
    pub fn classify(&self, request: &Request) -> Option<RequestClass> {
        if request.method != Method::GET {
            return None;
        }
        if request.url.origin() != self.scope.origin() {
            return None;
        }

        if self.manifest_paths.contains(request.url.path()) {
            Some(RequestClass::AppShell)
        } else if request.accepts_html() {
            Some(RequestClass::Document)
        } else {
            Some(RequestClass::Asset)
        }
    }

    /// Resolve an intercepted request. `None` means pass through untouched.
    pub async fn respond(&self, request: &Request) -> Option<Response> {
        let class = self.classify(request)?;
        debug!(url = %request.url, ?class, "Intercepted request");
        Some(self.execute(class.strategy(), request).await)
    }

    /// Run a strategy to completion. Never fails.
    pub async fn execute(&self, strategy: Strategy, request: &Request) -> Response {
        match strategy {
            Strategy::CacheFirst(kind) => self.cache_first(kind, request).await,
            Strategy::NetworkFirst(kind) => self.network_first(kind, request).await,
        }
    }

    /// Serve from cache; fetch and store on miss.
    pub async fn cache_first(&self, kind: CacheKind, request: &Request) -> Response {
        let cache = self.names.for_kind(kind);
        let key = request.cache_key();

        if let Some(cached) = self.lookup(cache, &key).await {
            debug!(url = %request.url, cache, "Cache hit");
            return cached;
        }

        debug!(url = %request.url, cache, "Cache miss, fetching");
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_ok(cache, &key, &response).await;
                response
            }
            Err(e) => {
                error!(url = %request.url, error = %e, "Fetch failed");
                self.offline_fallback(request).await
            }
        }
    }

    /// Fetch first; fall back to the cache when the network fails.
    pub async fn network_first(&self, kind: CacheKind, request: &Request) -> Response {
        let cache = self.names.for_kind(kind);
        let key = request.cache_key();

        debug!(url = %request.url, cache, "Network first");
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_ok(cache, &key, &response).await;
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                match self.lookup(cache, &key).await {
                    Some(cached) => cached,
                    None => self.offline_fallback(request).await,
                }
            }
        }
    }

    /// Last resort when both network and cache came up empty.
    ///
    /// HTML requests get the precached app root; everything else gets a
    /// 503 with a JSON body.
    pub async fn offline_fallback(&self, request: &Request) -> Response {
        if request.accepts_html() {
            let key = self.app_root.as_str();
            if let Some(root) = self.lookup(&self.names.precache, key).await {
                debug!(url = %request.url, "Serving precached app root");
                return root;
            }
        }

        self.offline_response(request.url.clone())
    }

    /// The synthetic 503 response.
    pub fn offline_response(&self, url: Url) -> Response {
        let body = OfflineBody {
            error: "Offline".to_string(),
            message: self.offline_message.clone(),
        };
        // Serializing two strings cannot fail.
        let body = serde_json::to_vec(&body).unwrap_or_default();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Response {
            url,
            status: StatusCode::SERVICE_UNAVAILABLE,
            status_text: "Service Unavailable".to_string(),
            headers,
            body: Bytes::from(body),
        }
    }

    async fn lookup(&self, cache: &str, key: &str) -> Option<Response> {
        match self.store.match_request(cache, key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(cache, key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn store_if_ok(&self, cache: &str, key: &str, response: &Response) {
        if !response.ok() {
            debug!(url = %response.url, status = %response.status, "Not caching unsuccessful response");
            return;
        }
        if let Err(e) = self.store.put(cache, key, response).await {
            warn!(cache, key, error = %e, "Cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use gazon_net::memory::MemoryFetcher;
    use http::header::ACCEPT;

    const ORIGIN: &str = "https://gazon.test/";

    fn config() -> CacheConfig {
        CacheConfig {
            namespace: "app".to_string(),
            version: "v2".to_string(),
            scope: Url::parse(ORIGIN).unwrap(),
            precache: vec![
                "./".to_string(),
                "./index.html".to_string(),
                "./src/css/main.css".to_string(),
            ],
            app_root: "./index.html".to_string(),
            offline_message: "Je bent offline.".to_string(),
        }
    }

    fn setup() -> (CachePolicyEngine, Arc<MemoryCacheStore>, Arc<MemoryFetcher>) {
        let store = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(MemoryFetcher::new(Url::parse(ORIGIN).unwrap()));
        let engine = CachePolicyEngine::new(&config(), store.clone(), fetcher.clone()).unwrap();
        (engine, store, fetcher)
    }

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    fn html(path: &str) -> Request {
        Request::document(url(path))
    }

    fn json(path: &str) -> Request {
        Request::get(url(path)).header(ACCEPT, HeaderValue::from_static("application/json"))
    }

    #[test]
    fn test_cache_names() {
        let names = CacheNames::new("app", "v2");
        assert_eq!(names.precache, "app-v2");
        assert_eq!(names.runtime, "app-runtime-v2");
        assert!(names.is_stale("app-v1"));
        assert!(names.is_stale("app-runtime-v1"));
        assert!(!names.is_stale("app-v2"));
        assert!(!names.is_stale("app-runtime-v2"));
        assert!(!names.is_stale("other-v1"));

        let shipped = CacheNames::from(&CacheConfig::default());
        assert_eq!(shipped.precache, "gazon-app-v1.0.2");
        assert_eq!(shipped.runtime, "gazon-app-runtime-v1.0.2");
    }

    #[test]
    fn test_classification_order() {
        let (engine, _, _) = setup();

        // Manifest entry wins even for HTML requests.
        assert_eq!(engine.classify(&html("/index.html")), Some(RequestClass::AppShell));
        assert_eq!(engine.classify(&html("/")), Some(RequestClass::AppShell));
        assert_eq!(engine.classify(&html("/src/pages/challenge.html")), Some(RequestClass::Document));
        assert_eq!(engine.classify(&json("/api/data.json")), Some(RequestClass::Asset));

        assert_eq!(
            RequestClass::Document.strategy(),
            Strategy::NetworkFirst(CacheKind::Runtime)
        );
        assert_eq!(
            RequestClass::Asset.strategy(),
            Strategy::CacheFirst(CacheKind::Precache)
        );
    }

    #[test]
    fn test_cross_origin_and_non_get_pass_through() {
        let (engine, _, _) = setup();

        let cross = Request::document(Url::parse("https://cdn.example/index.html").unwrap());
        assert_eq!(engine.classify(&cross), None);

        let mut post = html("/index.html");
        post.method = Method::POST;
        assert_eq!(engine.classify(&post), None);
    }

    #[tokio::test]
    async fn test_cache_first_hits_after_first_load() {
        let (engine, store, fetcher) = setup();
        fetcher.serve("/src/css/main.css", "text/css", "body{}");

        let first = engine.respond(&json("/src/css/main.css")).await.unwrap();
        assert!(first.ok());
        assert_eq!(fetcher.calls(), 1);

        let second = engine.respond(&json("/src/css/main.css")).await.unwrap();
        assert_eq!(second.text().unwrap(), "body{}");
        assert_eq!(fetcher.calls(), 1);

        let keys = store.entry_keys("app-v2").await.unwrap();
        assert_eq!(keys, vec![url("/src/css/main.css").to_string()]);
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let (engine, store, fetcher) = setup();
        fetcher.serve_status("/missing.png", StatusCode::NOT_FOUND);

        let response = engine.respond(&json("/missing.png")).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(store.entry_keys("app-v2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_network_first_writes_through() {
        let (engine, store, fetcher) = setup();
        fetcher.serve("/src/pages/challenge.html", "text/html", "<p>v1</p>");

        engine.respond(&html("/src/pages/challenge.html")).await.unwrap();
        engine.respond(&html("/src/pages/challenge.html")).await.unwrap();
        assert_eq!(fetcher.calls(), 2);

        let cached = store
            .match_request("app-runtime-v2", url("/src/pages/challenge.html").as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.text().unwrap(), "<p>v1</p>");

        fetcher.serve("/src/pages/challenge.html", "text/html", "<p>v2</p>");
        engine.respond(&html("/src/pages/challenge.html")).await.unwrap();
        let cached = store
            .match_request("app-runtime-v2", url("/src/pages/challenge.html").as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.text().unwrap(), "<p>v2</p>");
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_runtime_cache() {
        let (engine, _, fetcher) = setup();
        fetcher.serve("/src/pages/challenge.html", "text/html", "<p>cached</p>");
        engine.respond(&html("/src/pages/challenge.html")).await.unwrap();

        fetcher.set_offline(true);
        let response = engine.respond(&html("/src/pages/challenge.html")).await.unwrap();
        assert!(response.ok());
        assert_eq!(response.text().unwrap(), "<p>cached</p>");
    }

    #[tokio::test]
    async fn test_offline_html_gets_precached_root() {
        let (engine, store, fetcher) = setup();
        let root = url("/index.html");
        let shell = Response::new(
            root.clone(),
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"<html>shell</html>"),
        );
        store.put("app-v2", root.as_str(), &shell).await.unwrap();

        fetcher.set_offline(true);
        let response = engine.respond(&html("/src/pages/unknown.html")).await.unwrap();
        assert_eq!(response.text().unwrap(), "<html>shell</html>");
    }

    #[tokio::test]
    async fn test_offline_without_root_gets_json_503() {
        let (engine, _, fetcher) = setup();
        fetcher.set_offline(true);

        for request in [html("/src/pages/unknown.html"), json("/api/points.json")] {
            let response = engine.respond(&request).await.unwrap();
            assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(response.status_text, "Service Unavailable");
            assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "application/json");

            let body: OfflineBody = response.json().unwrap();
            assert_eq!(body.error, "Offline");
            assert_eq!(body.message, "Je bent offline.");

            let raw: serde_json::Value = response.json().unwrap();
            assert_eq!(raw.as_object().unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_offline_body_is_bit_exact() {
        let (engine, _, _) = setup();
        let response = engine.offline_response(url("/x"));
        assert_eq!(
            response.body,
            Bytes::from_static(br#"{"error":"Offline","message":"Je bent offline."}"#)
        );
    }

    #[tokio::test]
    async fn test_json_offline_never_uses_root() {
        let (engine, store, fetcher) = setup();
        let root = url("/index.html");
        let shell = Response::new(root.clone(), StatusCode::OK, HeaderMap::new(), Bytes::new());
        store.put("app-v2", root.as_str(), &shell).await.unwrap();
        fetcher.set_offline(true);

        let response = engine.respond(&json("/api/points.json")).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
