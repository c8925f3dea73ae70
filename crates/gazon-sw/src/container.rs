//! Host-side entry point (`navigator.serviceWorker`).

use std::sync::Arc;

use async_trait::async_trait;
use gazon_common::CacheConfig;
use gazon_net::{Fetcher, NetError, Request, Response};
use hashbrown::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::clients::{Client, Clients};
use crate::lifecycle::{
    ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState, WorkerEvent,
    WorkerMessage,
};
use crate::ServiceWorkerError;

/// Owns the registration for one scope and every worker version created for it.
pub struct ServiceWorkerContainer {
    /// Registration for the scope.
    registration: Arc<RwLock<ServiceWorkerRegistration>>,

    /// Live worker versions by ID.
    workers: RwLock<HashMap<ServiceWorkerId, ServiceWorker>>,

    /// Cache storage shared with every version.
    store: Arc<dyn CacheStore>,

    /// Pages in scope.
    clients: Arc<RwLock<Clients>>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a container for `scope`.
    pub fn new(
        scope: Url,
        store: Arc<dyn CacheStore>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: Arc::new(RwLock::new(ServiceWorkerRegistration::new(scope))),
                workers: RwLock::new(HashMap::new()),
                store,
                clients: Arc::new(RwLock::new(Clients::new())),
                event_tx,
            },
            event_rx,
        )
    }

    pub async fn scope(&self) -> Url {
        self.registration.read().await.scope.clone()
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        self.store.clone()
    }

    /// Create a new worker version without running any lifecycle step.
    pub async fn create_worker(
        &self,
        config: CacheConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<ServiceWorker, ServiceWorkerError> {
        let scope = self.scope().await;
        if config.scope != scope {
            return Err(ServiceWorkerError::Config(format!(
                "worker scope {} does not match registration scope {}",
                config.scope, scope
            )));
        }

        let worker = ServiceWorker::new(
            config,
            self.store.clone(),
            fetcher,
            self.registration.clone(),
            self.clients.clone(),
            self.event_tx.clone(),
        )
        .await?;

        self.workers.write().await.insert(worker.id(), worker.clone());
        Ok(worker)
    }

    /// Install a new version and activate it when it asked to skip waiting
    /// or nothing is active yet.
    ///
    /// An install failure is returned; the previously active version keeps
    /// serving.
    pub async fn register(
        &self,
        config: CacheConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<ServiceWorker, ServiceWorkerError> {
        let worker = self.create_worker(config, fetcher).await?;
        info!(version = %worker.version(), "Registering worker");

        let installed = worker.install().await;
        if let Err(e) = installed {
            self.prune().await;
            return Err(e);
        }

        let nothing_active = self.registration.read().await.active.is_none();
        if worker.skip_waiting_requested().await || nothing_active {
            let report = worker.activate().await?;
            if !report.failed.is_empty() {
                warn!(failed = ?report.failed, "Some old caches could not be deleted");
            }
        }

        self.prune().await;
        Ok(worker)
    }

    /// Forget worker versions the registration no longer tracks.
    async fn prune(&self) {
        let registration = self.registration.read().await;
        self.workers
            .write()
            .await
            .retain(|id, _| registration.state_of(*id).is_some());
    }

    async fn worker_in(
        &self,
        slot: impl Fn(&ServiceWorkerRegistration) -> Option<ServiceWorkerId>,
    ) -> Option<ServiceWorker> {
        let id = slot(&*self.registration.read().await)?;
        self.workers.read().await.get(&id).cloned()
    }

    /// The active worker, if any.
    pub async fn controller(&self) -> Option<ServiceWorker> {
        self.worker_in(|r| r.active.as_ref().map(|v| v.id)).await
    }

    /// The installed worker waiting to activate, if any.
    pub async fn waiting(&self) -> Option<ServiceWorker> {
        self.worker_in(|r| r.waiting.as_ref().map(|v| v.id)).await
    }

    /// State of the active worker.
    pub async fn controller_state(&self) -> Option<ServiceWorkerState> {
        self.registration.read().await.active.as_ref().map(|v| v.state)
    }

    /// Route a page request through the active worker. `None` means the host
    /// should go to the network itself.
    pub async fn handle_fetch(&self, request: &Request) -> Option<Response> {
        let worker = self.controller().await?;
        worker.handle_fetch(request).await
    }

    /// Post a raw JSON message. `skipWaiting` goes to the waiting worker,
    /// everything else to the active one.
    pub async fn post_message(&self, raw: &str) -> Result<(), ServiceWorkerError> {
        let message = raw.parse::<WorkerMessage>()?;
        let target = match message {
            WorkerMessage::SkipWaiting => self.waiting().await,
            WorkerMessage::ClearCache => self.controller().await,
        };
        let worker = target.ok_or_else(|| {
            ServiceWorkerError::NotFound(format!("no worker for {message:?}"))
        })?;
        worker.handle_message(message).await?;
        self.prune().await;
        Ok(())
    }

    /// Track a page in scope. It stays uncontrolled until a worker claims it.
    pub async fn add_client(&self, url: Url) -> Client {
        self.clients.write().await.add(url)
    }

    /// Snapshot of every page in scope.
    pub async fn clients(&self) -> Vec<Client> {
        self.clients
            .read()
            .await
            .match_all()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Drop every version. Caches are left in place.
    pub async fn unregister(&self) -> bool {
        let dropped = self.registration.write().await.unregister();
        for worker in &dropped {
            let _ = self.event_tx.send(WorkerEvent::StateChange {
                worker_id: worker.id,
                version: worker.version.clone(),
                new_state: worker.state,
            });
        }
        self.workers.write().await.clear();
        !dropped.is_empty()
    }
}

/// Page-side fetcher: requests go to the controlling worker first and reach
/// the network directly when the worker passes them through.
pub struct ControlledFetcher {
    container: Arc<ServiceWorkerContainer>,
    network: Arc<dyn Fetcher>,
}

impl ControlledFetcher {
    pub fn new(container: Arc<ServiceWorkerContainer>, network: Arc<dyn Fetcher>) -> Self {
        Self { container, network }
    }
}

#[async_trait]
impl Fetcher for ControlledFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if let Some(response) = self.container.handle_fetch(request).await {
            return Ok(response);
        }
        self.network.fetch(request).await
    }
}
