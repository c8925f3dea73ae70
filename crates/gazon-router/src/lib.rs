//! # Gazon Router
//!
//! In-memory page router: fetches HTML fragments, memoizes them per route
//! and swaps them into the document's content region.
//!
//! ## Architecture
//!
//! ```text
//! Router (cheap clone, one per app)
//!     ├── route table      RouteName → path + on_load
//!     ├── fragment cache   RouteName → HTML (filled by navigate / preload_all)
//!     ├── current route
//!     ├── Fetcher          fragment GETs
//!     └── Document         content region, scroll, active nav marker
//! ```
//!
//! Overlapping navigations resolve to the one started last: every
//! `navigate` takes a sequence number and only the newest may touch the
//! document. An older navigation still memoizes the fragment it fetched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gazon_common::{GazonError, RouterConfig};
use gazon_net::{Fetcher, NetError, Request};
use hashbrown::HashMap;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use url::Url;

pub mod dom;
pub mod navigation;
pub mod route;

pub use dom::{Document, DomOp, MemoryDocument};
pub use navigation::{ElementInfo, NavAction, NavMarker, NavigationDispatcher};
pub use route::{OnLoad, Route, RouteName};

// ==================== Errors ====================

/// Router errors.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Failed to load page: {status} {status_text}")]
    Status { status: u16, status_text: String },

    #[error("Fetch failed: {0}")]
    Fetch(#[from] NetError),

    #[error("Invalid route path {path}: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: url::ParseError,
    },
}

impl From<RouterError> for GazonError {
    fn from(err: RouterError) -> Self {
        GazonError::navigation_with_source("navigation failed", err)
    }
}

// ==================== Outcomes ====================

/// How a navigation ended.
#[derive(Debug)]
pub enum NavigationOutcome {
    /// The route is on screen.
    Loaded { from_cache: bool },
    /// No such route is registered, or the page name is unknown; nothing
    /// changed.
    NotRegistered,
    /// The fragment could not be loaded; the error view is on screen.
    Failed(RouterError),
    /// A newer navigation started first; nothing on screen changed.
    Superseded,
}

impl NavigationOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, NavigationOutcome::Loaded { .. })
    }
}

/// Result of a background preload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Routes whose fragment is now cached.
    pub loaded: Vec<RouteName>,
    /// Routes whose fetch failed.
    pub failed: Vec<RouteName>,
}

/// Handle to a running preload. Dropping it leaves the preload running.
#[derive(Debug)]
pub struct PreloadHandle {
    task: JoinHandle<PreloadReport>,
}

impl PreloadHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for every route to settle.
    pub async fn wait(self) -> PreloadReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Preload did not complete");
                PreloadReport::default()
            }
        }
    }
}

// ==================== Router ====================

/// Fragment router. Construct once and pass clones to whatever navigates.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    base_url: Url,
    fetcher: Arc<dyn Fetcher>,
    document: Arc<dyn Document>,
    config: RouterConfig,
    dispatcher: NavigationDispatcher,
    routes: RwLock<HashMap<RouteName, Route>>,
    fragments: RwLock<HashMap<RouteName, Arc<OnceCell<String>>>>,
    current: RwLock<Option<RouteName>>,
    /// Sequence number of the newest navigation.
    latest: AtomicU64,
}

impl RouterInner {
    async fn fragment_cell(&self, name: RouteName) -> Arc<OnceCell<String>> {
        if let Some(cell) = self.fragments.read().await.get(&name) {
            return cell.clone();
        }
        self.fragments
            .write()
            .await
            .entry(name)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Cached fragment for `route`, fetching it if needed. Concurrent loads
    /// of the same route share one fetch. Returns the HTML and whether it
    /// was already cached; joining an in-flight fetch counts as a network
    /// load.
    async fn load_fragment(&self, route: &Route) -> Result<(String, bool), RouterError> {
        let cell = self.fragment_cell(route.name).await;
        if let Some(html) = cell.get() {
            return Ok((html.clone(), true));
        }
        let html = cell.get_or_try_init(|| self.fetch_fragment(route)).await?;
        Ok((html.clone(), false))
    }

    async fn fetch_fragment(&self, route: &Route) -> Result<String, RouterError> {
        let url = self
            .base_url
            .join(&route.path)
            .map_err(|source| RouterError::InvalidPath {
                path: route.path.clone(),
                source,
            })?;
        debug!(route = %route.name, %url, "Fetching fragment");

        // Plain GET: an HTML Accept would get the app shell back from the
        // worker's offline fallback instead of an error.
        let response = self.fetcher.fetch(&Request::get(url)).await?;
        if !response.ok() {
            return Err(RouterError::Status {
                status: response.status.as_u16(),
                status_text: response.status_text.clone(),
            });
        }
        Ok(response.text()?)
    }

    fn error_view(&self) -> String {
        format!(
            r#"<div class="error-page">
    <h1>{}</h1>
    <p>{}</p>
    <button class="btn-primary" data-action="reload">{}</button>
</div>"#,
            self.config.error_title, self.config.error_message, self.config.reload_label
        )
    }
}

impl Router {
    /// Create a router resolving fragment paths against `base_url`.
    pub fn new(
        base_url: Url,
        fetcher: Arc<dyn Fetcher>,
        document: Arc<dyn Document>,
        config: RouterConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                base_url,
                fetcher,
                document,
                config,
                dispatcher: NavigationDispatcher::new(),
                routes: RwLock::new(HashMap::new()),
                fragments: RwLock::new(HashMap::new()),
                current: RwLock::new(None),
                latest: AtomicU64::new(0),
            }),
        }
    }

    pub fn document(&self) -> &Arc<dyn Document> {
        &self.inner.document
    }

    /// Add or replace a route.
    pub async fn register(&self, name: RouteName, path: impl Into<String>, on_load: Option<OnLoad>) {
        let route = Route {
            name,
            path: path.into(),
            on_load,
        };
        debug!(route = %name, path = %route.path, "Registered route");
        self.inner.routes.write().await.insert(name, route);
    }

    /// Show `name`.
    ///
    /// Failures render the error view and leave the current route and the
    /// fragment cache as they were.
    pub async fn navigate(&self, name: RouteName) -> NavigationOutcome {
        let Some(route) = self.inner.routes.read().await.get(&name).cloned() else {
            error!(route = %name, "Route not found");
            return NavigationOutcome::NotRegistered;
        };
        let seq = self.inner.latest.fetch_add(1, Ordering::SeqCst) + 1;

        let loaded = self.inner.load_fragment(&route).await;

        let mut current = self.inner.current.write().await;
        if self.inner.latest.load(Ordering::SeqCst) != seq {
            debug!(route = %name, "Navigation superseded");
            return NavigationOutcome::Superseded;
        }

        let document = self.inner.document.as_ref();
        match loaded {
            Ok((html, from_cache)) => {
                document.set_content(&html);
                *current = Some(name);
                if let Some(on_load) = &route.on_load {
                    on_load(document);
                }
                document.scroll_to_top();
                document.set_active_nav(name);
                info!(route = %name, from_cache, "Navigated");
                NavigationOutcome::Loaded { from_cache }
            }
            Err(e) => {
                error!(route = %name, error = %e, "Error navigating to page");
                document.set_content(&self.inner.error_view());
                NavigationOutcome::Failed(e)
            }
        }
    }

    /// Show the page named `page`, as carried by a `navigate` event.
    /// Unknown names are logged and change nothing.
    pub async fn navigate_to_page(&self, page: &str) -> NavigationOutcome {
        match page.parse::<RouteName>() {
            Ok(route) => self.navigate(route).await,
            Err(e) => {
                warn!(page, error = %e, "Ignoring navigation to unknown page");
                NavigationOutcome::NotRegistered
            }
        }
    }

    /// Warm the fragment cache for every registered route in the background.
    ///
    /// Routes already cached are not fetched again. The document and current
    /// route are never touched.
    pub fn preload_all(&self) -> PreloadHandle {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let routes: Vec<Route> = inner.routes.read().await.values().cloned().collect();
            let mut loads = JoinSet::new();
            for route in routes {
                let inner = inner.clone();
                loads.spawn(async move {
                    let result = inner.load_fragment(&route).await;
                    (route.name, result)
                });
            }

            let mut report = PreloadReport::default();
            while let Some(joined) = loads.join_next().await {
                match joined {
                    Ok((name, Ok(_))) => report.loaded.push(name),
                    Ok((name, Err(e))) => {
                        warn!(route = %name, error = %e, "Preload failed");
                        report.failed.push(name);
                    }
                    Err(e) => error!(error = %e, "Preload task did not complete"),
                }
            }
            report.loaded.sort();
            report.failed.sort();
            debug!(loaded = report.loaded.len(), failed = report.failed.len(), "Preload finished");
            report
        });

        PreloadHandle { task }
    }

    /// Drop every memoized fragment.
    pub async fn clear_cache(&self) {
        self.inner.fragments.write().await.clear();
        debug!("Cleared fragment cache");
    }

    /// Whether the fragment for `name` is memoized.
    pub async fn is_cached(&self, name: RouteName) -> bool {
        self.inner
            .fragments
            .read()
            .await
            .get(&name)
            .is_some_and(|cell| cell.initialized())
    }

    /// Route currently on screen.
    pub async fn current_page(&self) -> Option<RouteName> {
        *self.inner.current.read().await
    }

    /// Handle a delegated click. `ancestry` starts at the click target.
    /// Returns `None` when no element carries a navigation marker.
    pub async fn handle_click(&self, ancestry: &[ElementInfo]) -> Option<NavigationOutcome> {
        let action = self.inner.dispatcher.resolve(ancestry)?;
        debug!(route = %action.route, marker = ?action.marker, "Click dispatched");
        if action.mark_active {
            self.inner.document.set_active_nav(action.route);
        }
        Some(self.navigate(action.route).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazon_common::CacheConfig;
    use gazon_net::memory::MemoryFetcher;
    use gazon_sw::{ControlledFetcher, MemoryCacheStore, ServiceWorkerContainer};
    use http::StatusCode;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const BASE: &str = "https://gazon.test/";

    struct Fixture {
        router: Router,
        fetcher: Arc<MemoryFetcher>,
        document: Arc<MemoryDocument>,
    }

    fn fixture() -> Fixture {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let base = Url::parse(BASE).unwrap();
        let fetcher = Arc::new(MemoryFetcher::new(base.clone()));
        fetcher.serve("/src/pages/home.html", "text/html", "<section id=\"home\"></section>");
        fetcher.serve("/src/pages/loyalty.html", "text/html", "<section id=\"loyalty\"></section>");
        fetcher.serve("/src/pages/login.html", "text/html", "<section id=\"login\"></section>");

        let document = Arc::new(MemoryDocument::new());
        let router = Router::new(base, fetcher.clone(), document.clone(), RouterConfig::default());
        Fixture {
            router,
            fetcher,
            document,
        }
    }

    async fn register_pages(router: &Router) {
        router.register(RouteName::Home, "./src/pages/home.html", None).await;
        router.register(RouteName::Loyalty, "./src/pages/loyalty.html", None).await;
        router.register(RouteName::Login, "./src/pages/login.html", None).await;
    }

    #[tokio::test]
    async fn test_unregistered_route_is_a_no_op() {
        let f = fixture();

        let outcome = f.router.navigate(RouteName::Home).await;

        assert!(matches!(outcome, NavigationOutcome::NotRegistered));
        assert_eq!(f.router.current_page().await, None);
        assert!(f.document.ops().is_empty());
        assert_eq!(f.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cached_fragment_skips_network_and_runs_on_load_once() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let on_load: OnLoad = {
            let calls = calls.clone();
            let seen = seen.clone();
            let document = f.document.clone();
            Arc::new(move |doc: &dyn Document| {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push((doc.content(), document.ops().last().cloned()));
            })
        };
        f.router
            .register(RouteName::Home, "./src/pages/home.html", Some(on_load))
            .await;

        assert!(matches!(
            f.router.navigate(RouteName::Home).await,
            NavigationOutcome::Loaded { from_cache: false }
        ));
        assert_eq!(f.fetcher.calls(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(matches!(
            f.router.navigate(RouteName::Home).await,
            NavigationOutcome::Loaded { from_cache: true }
        ));
        assert_eq!(f.fetcher.calls(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The callback ran after the swap and before the scroll reset.
        let html = "<section id=\"home\"></section>".to_string();
        for (content, last_op) in seen.lock().unwrap().iter() {
            assert_eq!(content, &html);
            assert_eq!(last_op, &Some(DomOp::SetContent(html.clone())));
        }
        let ops = f.document.ops();
        assert_eq!(
            &ops[ops.len() - 3..],
            &[
                DomOp::SetContent(html),
                DomOp::ScrollToTop,
                DomOp::SetActiveNav(RouteName::Home),
            ]
        );
    }

    #[tokio::test]
    async fn test_server_error_shows_error_view_and_keeps_state() {
        let f = fixture();
        register_pages(&f.router).await;
        f.router.navigate(RouteName::Home).await;

        f.fetcher
            .serve_status("/src/pages/loyalty.html", StatusCode::INTERNAL_SERVER_ERROR);
        let outcome = f.router.navigate(RouteName::Loyalty).await;

        assert!(matches!(
            outcome,
            NavigationOutcome::Failed(RouterError::Status { status: 500, .. })
        ));
        assert_eq!(f.router.current_page().await, Some(RouteName::Home));
        assert!(!f.router.is_cached(RouteName::Loyalty).await);

        let content = f.document.content();
        assert!(content.contains("<h1>Oeps!</h1>"));
        assert!(content.contains("Fout bij het laden van de pagina"));
        assert!(content.contains(r#"<button class="btn-primary" data-action="reload">Opnieuw laden</button>"#));
        assert_eq!(f.document.active_nav(), Some(RouteName::Home));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried_on_next_navigation() {
        let f = fixture();
        register_pages(&f.router).await;

        f.fetcher.set_offline(true);
        assert!(matches!(
            f.router.navigate(RouteName::Loyalty).await,
            NavigationOutcome::Failed(RouterError::Fetch(_))
        ));

        f.fetcher.set_offline(false);
        assert!(f.router.navigate(RouteName::Loyalty).await.is_loaded());
        assert_eq!(f.fetcher.calls_for("/src/pages/loyalty.html"), 2);
        assert_eq!(f.router.current_page().await, Some(RouteName::Loyalty));
    }

    #[tokio::test]
    async fn test_preload_warms_every_route() {
        let f = fixture();
        register_pages(&f.router).await;

        let report = f.router.preload_all().wait().await;
        assert_eq!(
            report.loaded,
            vec![RouteName::Login, RouteName::Home, RouteName::Loyalty]
        );
        assert_eq!(f.fetcher.calls(), 3);
        assert!(f.document.ops().is_empty());
        assert_eq!(f.router.current_page().await, None);

        for route in [RouteName::Home, RouteName::Loyalty, RouteName::Login] {
            assert!(matches!(
                f.router.navigate(route).await,
                NavigationOutcome::Loaded { from_cache: true }
            ));
        }
        assert_eq!(f.fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_preload_failures_are_independent() {
        let f = fixture();
        register_pages(&f.router).await;
        f.fetcher
            .serve_status("/src/pages/login.html", StatusCode::NOT_FOUND);

        let report = f.router.preload_all().wait().await;
        assert_eq!(report.loaded, vec![RouteName::Home, RouteName::Loyalty]);
        assert_eq!(report.failed, vec![RouteName::Login]);
        assert!(!f.router.is_cached(RouteName::Login).await);
    }

    #[tokio::test]
    async fn test_navigate_during_preload_shares_the_fetch() {
        let f = fixture();
        f.fetcher.serve_delayed(
            "/src/pages/home.html",
            "text/html",
            "<section id=\"home\"></section>",
            Duration::from_millis(20),
        );
        register_pages(&f.router).await;

        let preload = f.router.preload_all();
        // Let the preload start its fetch first.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(f.fetcher.calls_for("/src/pages/home.html"), 1);

        assert!(matches!(
            f.router.navigate(RouteName::Home).await,
            NavigationOutcome::Loaded { from_cache: false }
        ));
        preload.wait().await;

        assert_eq!(f.fetcher.calls_for("/src/pages/home.html"), 1);
    }

    #[tokio::test]
    async fn test_latest_navigation_wins() {
        let f = fixture();
        f.fetcher.serve_delayed(
            "/src/pages/home.html",
            "text/html",
            "<section id=\"home\"></section>",
            Duration::from_millis(50),
        );
        register_pages(&f.router).await;

        let slow = f.router.clone();
        let fast = f.router.clone();
        let (first, second) = tokio::join!(slow.navigate(RouteName::Home), async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            fast.navigate(RouteName::Loyalty).await
        });

        assert!(matches!(first, NavigationOutcome::Superseded));
        assert!(second.is_loaded());
        assert_eq!(f.router.current_page().await, Some(RouteName::Loyalty));
        assert_eq!(f.document.content(), "<section id=\"loyalty\"></section>");
        assert_eq!(f.document.content_writes(), 1);
        // The slow fragment was still memoized.
        assert!(f.router.is_cached(RouteName::Home).await);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let f = fixture();
        register_pages(&f.router).await;

        f.router.navigate(RouteName::Home).await;
        f.router.clear_cache().await;
        assert!(!f.router.is_cached(RouteName::Home).await);

        assert!(matches!(
            f.router.navigate(RouteName::Home).await,
            NavigationOutcome::Loaded { from_cache: false }
        ));
        assert_eq!(f.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_register_replaces_route() {
        let f = fixture();
        f.router.register(RouteName::Home, "./src/pages/login.html", None).await;
        f.router.register(RouteName::Home, "./src/pages/home.html", None).await;

        f.router.navigate(RouteName::Home).await;
        assert_eq!(f.fetcher.calls_for("/src/pages/home.html"), 1);
        assert_eq!(f.fetcher.calls_for("/src/pages/login.html"), 0);
    }

    #[tokio::test]
    async fn test_click_on_nav_item_navigates_and_marks_active() {
        let f = fixture();
        register_pages(&f.router).await;

        let ancestry = [
            ElementInfo::new().with_class("nav-label"),
            ElementInfo::new()
                .with_class("nav-item")
                .with_data_page("loyalty"),
        ];
        let outcome = f.router.handle_click(&ancestry).await.unwrap();

        assert!(outcome.is_loaded());
        assert_eq!(f.document.ops()[0], DomOp::SetActiveNav(RouteName::Loyalty));
        assert_eq!(f.document.active_nav(), Some(RouteName::Loyalty));

        let back = [ElementInfo::new().with_class("back-btn")];
        f.router.handle_click(&back).await.unwrap();
        assert_eq!(f.router.current_page().await, Some(RouteName::Home));

        let plain = [ElementInfo::new().with_class("title")];
        assert!(f.router.handle_click(&plain).await.is_none());
    }

    #[tokio::test]
    async fn test_navigate_to_page_by_name() {
        let f = fixture();
        register_pages(&f.router).await;

        assert!(f.router.navigate_to_page("loyalty").await.is_loaded());
        assert_eq!(f.router.current_page().await, Some(RouteName::Loyalty));

        let writes = f.document.content_writes();
        assert!(matches!(
            f.router.navigate_to_page("settings").await,
            NavigationOutcome::NotRegistered
        ));
        assert_eq!(f.document.content_writes(), writes);
        assert_eq!(f.router.current_page().await, Some(RouteName::Loyalty));
        assert_eq!(f.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_offline_fragment_through_worker_shows_error_view() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let base = Url::parse(BASE).unwrap();

        let network = Arc::new(MemoryFetcher::new(base.clone()));
        network.serve("/index.html", "text/html", "<!doctype html><html>app shell</html>");
        network.serve("/src/pages/home.html", "text/html", "<section id=\"home\"></section>");
        network.serve(
            "/src/pages/challenge.html",
            "text/html",
            "<section id=\"challenge\"></section>",
        );

        let (container, _events) =
            ServiceWorkerContainer::new(base.clone(), Arc::new(MemoryCacheStore::new()));
        let container = Arc::new(container);
        let worker_config = CacheConfig {
            namespace: "app".to_string(),
            version: "v1".to_string(),
            scope: base.clone(),
            precache: vec!["./index.html".to_string()],
            app_root: "./index.html".to_string(),
            offline_message: "Je bent offline.".to_string(),
        };
        container.register(worker_config, network.clone()).await.unwrap();

        let document = Arc::new(MemoryDocument::new());
        let fetcher = Arc::new(ControlledFetcher::new(container, network.clone()));
        let router = Router::new(base, fetcher, document.clone(), RouterConfig::default());
        router.register(RouteName::Home, "./src/pages/home.html", None).await;
        router
            .register(RouteName::Challenge, "./src/pages/challenge.html", None)
            .await;
        assert!(router.navigate(RouteName::Home).await.is_loaded());

        network.set_offline(true);
        let outcome = router.navigate(RouteName::Challenge).await;

        assert!(matches!(
            outcome,
            NavigationOutcome::Failed(RouterError::Status { status: 503, .. })
        ));
        let content = document.content();
        assert!(content.contains("<h1>Oeps!</h1>"));
        assert!(!content.contains("app shell"));
        assert_eq!(router.current_page().await, Some(RouteName::Home));
        assert!(!router.is_cached(RouteName::Challenge).await);

        network.set_offline(false);
        assert!(matches!(
            router.navigate(RouteName::Challenge).await,
            NavigationOutcome::Loaded { from_cache: false }
        ));
        assert_eq!(document.content(), "<section id=\"challenge\"></section>");
    }
}
