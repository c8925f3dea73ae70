//! Wiring between the worker, the router and storage.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use gazon_common::{AppConfig, GazonError};
use gazon_net::{Fetcher, LoaderConfig, NetError, Request, Response, ResourceLoader};
use gazon_router::{
    Document, MemoryDocument, NavigationOutcome, OnLoad, PreloadHandle, PreloadReport, RouteName,
    Router,
};
use gazon_storage::{Storage, StorageKey};
use gazon_sw::{ControlledFetcher, MemoryCacheStore, ServiceWorkerContainer, WorkerEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Routes and their fragment paths, relative to the scope.
const ROUTES: [(RouteName, &str); 6] = [
    (RouteName::Login, "./src/pages/login.html"),
    (RouteName::Home, "./src/pages/home.html"),
    (RouteName::PhotoAnalysis, "./src/pages/photo-analysis.html"),
    (RouteName::FertilizerPlanner, "./src/pages/fertilizer-planner.html"),
    (RouteName::Loyalty, "./src/pages/loyalty.html"),
    (RouteName::Challenge, "./src/pages/challenge.html"),
];

/// Connection indicator shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Online,
    Offline,
}

impl ConnectionStatus {
    pub fn from_offline(offline: bool) -> Self {
        if offline {
            Self::Offline
        } else {
            Self::Online
        }
    }

    /// Indicator text.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Offline => "Offline - Sommige functies zijn beperkt",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Network access gated by the connection status.
struct NetworkSwitch {
    inner: Arc<dyn Fetcher>,
    status: watch::Sender<ConnectionStatus>,
}

impl NetworkSwitch {
    fn is_offline(&self) -> bool {
        *self.status.borrow() == ConnectionStatus::Offline
    }
}

#[async_trait]
impl Fetcher for NetworkSwitch {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if self.is_offline() {
            return Err(NetError::Offline(request.url.to_string()));
        }
        self.inner.fetch(request).await
    }
}

pub struct Shell {
    container: Arc<ServiceWorkerContainer>,
    router: Router,
    document: Arc<MemoryDocument>,
    storage: Storage,
    network: Arc<NetworkSwitch>,
    preload: Option<PreloadHandle>,
    events: JoinHandle<()>,
}

impl Shell {
    /// Open storage, register the worker, build the router and start
    /// preloading pages.
    ///
    /// With `offline` set nothing reaches the network: the worker install
    /// fails and the shell runs uncontrolled until the connection returns.
    pub async fn start(config: &AppConfig, offline: bool) -> anyhow::Result<Self> {
        let loader = ResourceLoader::new(LoaderConfig::from(&config.loader))
            .context("failed to build HTTP client")?;

        let storage = match Storage::open(&config.storage).await {
            Ok(storage) => storage,
            Err(e) => {
                let e = GazonError::from(e);
                warn!(
                    path = %config.storage.path.display(),
                    category = e.category(),
                    error = %e,
                    "Falling back to in-memory storage"
                );
                Storage::in_memory(config.storage.quota_bytes)
            }
        };

        Ok(Self::assemble(config, Arc::new(loader), storage, offline).await)
    }

    async fn assemble(
        config: &AppConfig,
        network: Arc<dyn Fetcher>,
        storage: Storage,
        offline: bool,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::from_offline(offline));
        let network = Arc::new(NetworkSwitch {
            inner: network,
            status,
        });
        if offline {
            warn!(status = %ConnectionStatus::Offline, "Starting without network");
        }

        let (container, events) = ServiceWorkerContainer::new(
            config.cache.scope.clone(),
            Arc::new(MemoryCacheStore::new()),
        );
        let container = Arc::new(container);
        let events = tokio::spawn(log_worker_events(events));

        container.add_client(config.cache.scope.clone()).await;
        match container.register(config.cache.clone(), network.clone()).await {
            Ok(worker) => info!(version = %worker.version(), "Service worker registered"),
            Err(e) => {
                let e = GazonError::from(e);
                warn!(category = e.category(), error = %e, "Service worker registration failed");
            }
        }

        let document = Arc::new(MemoryDocument::new());
        let page_fetcher = Arc::new(ControlledFetcher::new(container.clone(), network.clone()));
        let router = Router::new(
            config.cache.scope.clone(),
            page_fetcher,
            document.clone(),
            config.router.clone(),
        );
        for (name, path) in ROUTES {
            router.register(name, path, Some(page_loaded(name))).await;
        }
        let preload = Some(router.preload_all());

        Self {
            container,
            router,
            document,
            storage,
            network,
            preload,
            events,
        }
    }

    /// Flip the connection state. Returns whether it changed.
    pub fn set_offline(&self, offline: bool) -> bool {
        let status = ConnectionStatus::from_offline(offline);
        let changed = self.network.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            match status {
                ConnectionStatus::Online => info!(%status, "Connection restored"),
                ConnectionStatus::Offline => warn!(%status, "Connection lost"),
            }
        }
        changed
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.network.status.borrow()
    }

    /// Follow connection changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.network.status.subscribe()
    }

    /// Hard reset: drop the router's fragments and ask the worker to drop
    /// every cache.
    pub async fn clear_caches(&self) -> anyhow::Result<()> {
        self.router.clear_cache().await;
        self.container
            .post_message(r#"{"action":"clearCache"}"#)
            .await
            .context("failed to clear worker caches")
    }

    /// Home for a signed-in user, login otherwise.
    pub async fn start_route(&self) -> RouteName {
        if self.storage.has(StorageKey::AuthToken).await {
            RouteName::Home
        } else {
            RouteName::Login
        }
    }

    pub async fn open(&self, route: RouteName) -> NavigationOutcome {
        self.router.navigate(route).await
    }

    /// Open a page by its name; unknown names change nothing.
    pub async fn open_page(&self, page: &str) -> NavigationOutcome {
        self.router.navigate_to_page(page).await
    }

    pub fn content(&self) -> String {
        self.document.content()
    }

    /// Wait for the startup preload. Later calls report nothing.
    pub async fn wait_for_preload(&mut self) -> PreloadReport {
        match self.preload.take() {
            Some(handle) => handle.wait().await,
            None => PreloadReport::default(),
        }
    }

    /// Let background work finish, then stop the event log.
    pub async fn shutdown(mut self) {
        let report = self.wait_for_preload().await;
        debug!(loaded = report.loaded.len(), failed = report.failed.len(), "Preload settled");

        // The event log ends once every worker handle is gone.
        drop(self.router);
        drop(self.container);
        if let Err(e) = self.events.await {
            warn!(error = %e, "Worker event log stopped abnormally");
        }
    }
}

fn page_loaded(route: RouteName) -> OnLoad {
    Arc::new(move |document: &dyn Document| {
        info!(%route, bytes = document.content().len(), "Page loaded");
    })
}

async fn log_worker_events(mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::StateChange {
                version, new_state, ..
            } => info!(%version, state = %new_state, "Worker state"),
            WorkerEvent::ControllerChange { client_id, .. } => {
                info!(%client_id, "Page is now controlled")
            }
            WorkerEvent::CachesCleared { names } => info!(?names, "Caches cleared"),
            WorkerEvent::Notification(notification) => {
                info!(title = %notification.title, body = %notification.body, "Notification")
            }
            WorkerEvent::WindowOpened { url, .. } => info!(%url, "Window opened"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazon_net::memory::MemoryFetcher;

    const PAGES: [&str; 6] = [
        "login",
        "home",
        "photo-analysis",
        "fertilizer-planner",
        "loyalty",
        "challenge",
    ];

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.cache.precache = vec!["./index.html".to_string()];
        config
    }

    fn origin(config: &AppConfig) -> Arc<MemoryFetcher> {
        let origin = Arc::new(MemoryFetcher::new(config.cache.scope.clone()));
        origin.serve("/index.html", "text/html", "<html>app shell</html>");
        for page in PAGES {
            origin.serve(
                &format!("/src/pages/{page}.html"),
                "text/html",
                format!("<section id=\"{page}\"></section>"),
            );
        }
        origin
    }

    #[tokio::test]
    async fn test_start_route_follows_auth_token() {
        let config = config();
        let storage = Storage::in_memory(None);
        let shell = Shell::assemble(&config, origin(&config), storage.clone(), false).await;

        assert_eq!(shell.start_route().await, RouteName::Login);

        assert!(storage.set(StorageKey::AuthToken, "token-123").await);
        assert_eq!(shell.start_route().await, RouteName::Home);
    }

    #[tokio::test]
    async fn test_clear_caches_empties_worker_and_router() {
        let config = config();
        let mut shell =
            Shell::assemble(&config, origin(&config), Storage::in_memory(None), false).await;

        let report = shell.wait_for_preload().await;
        assert_eq!(report.loaded.len(), ROUTES.len());
        assert!(shell.open(RouteName::Home).await.is_loaded());
        assert!(shell.router.is_cached(RouteName::Home).await);
        assert!(!shell.container.store().keys().await.unwrap().is_empty());

        shell.clear_caches().await.unwrap();

        assert!(shell.container.store().keys().await.unwrap().is_empty());
        assert!(!shell.router.is_cached(RouteName::Home).await);
    }

    #[tokio::test]
    async fn test_offline_start_never_touches_network() {
        let config = config();
        let origin = origin(&config);
        let mut shell =
            Shell::assemble(&config, origin.clone(), Storage::in_memory(None), true).await;

        let report = shell.wait_for_preload().await;
        assert!(report.loaded.is_empty());
        assert_eq!(origin.calls(), 0);
        assert!(shell.container.controller().await.is_none());
        assert_eq!(shell.connection_status(), ConnectionStatus::Offline);

        assert!(shell.set_offline(false));
        assert!(matches!(
            shell.open(RouteName::Home).await,
            NavigationOutcome::Loaded { from_cache: false }
        ));
        assert!(shell.content().contains("id=\"home\""));
    }

    #[tokio::test]
    async fn test_connection_status_changes_are_published() {
        let config = config();
        let shell =
            Shell::assemble(&config, origin(&config), Storage::in_memory(None), false).await;
        let mut status = shell.watch_connection();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Online);
        assert_eq!(shell.connection_status().message(), "Online");

        assert!(shell.set_offline(true));
        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ConnectionStatus::Offline);
        assert_eq!(
            shell.connection_status().to_string(),
            "Offline - Sommige functies zijn beperkt"
        );

        assert!(!shell.set_offline(true));
        assert!(!status.has_changed().unwrap());

        assert!(shell.set_offline(false));
        status.changed().await.unwrap();
        assert_eq!(*status.borrow(), ConnectionStatus::Online);
    }

    #[tokio::test]
    async fn test_open_page_by_name() {
        let config = config();
        let mut shell =
            Shell::assemble(&config, origin(&config), Storage::in_memory(None), false).await;
        shell.wait_for_preload().await;

        assert!(shell.open_page("loyalty").await.is_loaded());
        assert!(shell.content().contains("id=\"loyalty\""));

        assert!(matches!(
            shell.open_page("settings").await,
            NavigationOutcome::NotRegistered
        ));
        assert!(shell.content().contains("id=\"loyalty\""));
    }
}
