//! Worker lifecycle: install, activate and runtime messages.
//!
//! ```text
//! Parsed ──install()──→ Installing ──ok──→ Installed ──activate()──→ Activating ──→ Activated
//!                            │                (waiting)
//!                            └──err──→ Redundant        old active ──→ Redundant
//! ```

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, try_join_all};
use gazon_common::CacheConfig;
use gazon_net::{Fetcher, Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::clients::Clients;
use crate::event::{ExtendableEvent, FetchEvent};
use crate::extensions::Notification;
use crate::policy::{CacheNames, CachePolicyEngine};
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a service worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Precaching the app shell.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Cleaning up old generations.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

impl ServiceWorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        }
    }
}

impl std::fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands a page can post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// Activate the waiting worker now.
    SkipWaiting,
    /// Delete every cache.
    ClearCache,
}

impl FromStr for WorkerMessage {
    type Err = ServiceWorkerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(raw).map_err(|e| ServiceWorkerError::InvalidMessage(e.to_string()))
    }
}

/// Events sent from the worker to its hosts.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A version changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        version: String,
        new_state: ServiceWorkerState,
    },
    /// A client is now controlled by another worker.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// Caches were wiped by a `clearCache` message.
    CachesCleared { names: Vec<String> },
    /// The worker asked to show a notification.
    Notification(Notification),
    /// The worker opened a window client.
    WindowOpened { client_id: String, url: Url },
}

/// Outcome of the activate step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale caches that were deleted.
    pub deleted: Vec<String>,
    /// Stale caches whose deletion failed.
    pub failed: Vec<String>,
    /// Clients that switched to this worker.
    pub claimed: Vec<String>,
}

// ==================== Registration ====================

/// One worker version as seen by the registration.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: ServiceWorkerId,
    pub version: String,
    pub state: ServiceWorkerState,
    /// Whether the worker asked to skip the waiting phase.
    pub skip_waiting: bool,
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    fn new(id: ServiceWorkerId, version: &str) -> Self {
        Self {
            id,
            version: version.to_string(),
            state: ServiceWorkerState::Parsed,
            skip_waiting: false,
            state_changed_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

/// Installing, waiting and active versions for one scope.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    pub scope: Url,
    pub installing: Option<WorkerVersion>,
    pub waiting: Option<WorkerVersion>,
    pub active: Option<WorkerVersion>,
}

impl ServiceWorkerRegistration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Track a new version as installing. A previous installing version is
    /// returned as redundant.
    pub fn start_install(&mut self, id: ServiceWorkerId, version: &str) -> Option<WorkerVersion> {
        let previous = self.installing.replace(WorkerVersion::new(id, version));
        previous.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Current state of a version, if the registration still tracks it.
    pub fn state_of(&self, id: ServiceWorkerId) -> Option<ServiceWorkerState> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|v| v.id == id)
            .map(|v| v.state)
    }

    fn installing_mut(&mut self, id: ServiceWorkerId) -> Result<&mut WorkerVersion, ServiceWorkerError> {
        self.installing
            .as_mut()
            .filter(|v| v.id == id)
            .ok_or_else(|| ServiceWorkerError::StateError("worker is not installing".to_string()))
    }

    /// Installing -> Installed (waiting). A previous waiting version is
    /// returned as redundant.
    pub fn install_complete(
        &mut self,
        id: ServiceWorkerId,
    ) -> Result<Option<WorkerVersion>, ServiceWorkerError> {
        self.installing_mut(id)?;
        let mut worker = self.installing.take().ok_or_else(|| {
            ServiceWorkerError::StateError("worker is not installing".to_string())
        })?;
        worker.set_state(ServiceWorkerState::Installed);
        let previous = self.waiting.replace(worker);
        Ok(previous.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        }))
    }

    /// Installing -> Redundant. The active version is untouched.
    pub fn install_failed(&mut self, id: ServiceWorkerId) -> Option<WorkerVersion> {
        if self.installing.as_ref().map(|v| v.id) != Some(id) {
            return None;
        }
        self.installing.take().map(|mut worker| {
            worker.set_state(ServiceWorkerState::Redundant);
            worker
        })
    }

    /// Record a skip-waiting request for an installing or waiting version.
    pub fn request_skip_waiting(&mut self, id: ServiceWorkerId) -> bool {
        for slot in [&mut self.installing, &mut self.waiting] {
            if let Some(worker) = slot.as_mut().filter(|v| v.id == id) {
                worker.skip_waiting = true;
                return true;
            }
        }
        false
    }

    /// Whether a version asked to skip waiting.
    pub fn skip_waiting_requested(&self, id: ServiceWorkerId) -> bool {
        [&self.installing, &self.waiting]
            .into_iter()
            .flatten()
            .any(|v| v.id == id && v.skip_waiting)
    }

    /// Waiting -> Activating; the old active version becomes redundant and
    /// is returned.
    pub fn begin_activation(
        &mut self,
        id: ServiceWorkerId,
    ) -> Result<Option<WorkerVersion>, ServiceWorkerError> {
        if self.waiting.as_ref().map(|v| v.id) != Some(id) {
            return Err(ServiceWorkerError::StateError(
                "only the waiting worker can activate".to_string(),
            ));
        }
        let mut worker = self.waiting.take().ok_or_else(|| {
            ServiceWorkerError::StateError("only the waiting worker can activate".to_string())
        })?;
        worker.set_state(ServiceWorkerState::Activating);

        let replaced = self.active.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        });
        Ok(replaced)
    }

    /// Activating -> Activated.
    pub fn finish_activation(&mut self, id: ServiceWorkerId) -> bool {
        match self.active.as_mut().filter(|v| v.id == id) {
            Some(worker) => {
                worker.set_state(ServiceWorkerState::Activated);
                true
            }
            None => false,
        }
    }

    /// Drop every version (unregister).
    pub fn unregister(&mut self) -> Vec<WorkerVersion> {
        [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
            .map(|mut worker| {
                worker.set_state(ServiceWorkerState::Redundant);
                worker
            })
            .collect()
    }
}

// ==================== Service Worker ====================

/// One version of the offline worker.
///
/// Cheap to clone; all clones drive the same version.
#[derive(Clone)]
pub struct ServiceWorker {
    pub(crate) inner: Arc<WorkerInner>,
}

pub(crate) struct WorkerInner {
    pub(crate) id: ServiceWorkerId,
    pub(crate) config: CacheConfig,
    pub(crate) engine: CachePolicyEngine,
    pub(crate) store: Arc<dyn CacheStore>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) registration: Arc<RwLock<ServiceWorkerRegistration>>,
    pub(crate) clients: Arc<RwLock<Clients>>,
    pub(crate) event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.inner.id)
            .field("version", &self.inner.config.version)
            .finish()
    }
}

impl ServiceWorker {
    /// Create a worker version and track it as installing.
    pub(crate) async fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        registration: Arc<RwLock<ServiceWorkerRegistration>>,
        clients: Arc<RwLock<Clients>>,
        event_tx: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self, ServiceWorkerError> {
        let engine = CachePolicyEngine::new(&config, store.clone(), fetcher.clone())?;
        let id = ServiceWorkerId::new();

        let replaced = registration.write().await.start_install(id, &config.version);

        let worker = Self {
            inner: Arc::new(WorkerInner {
                id,
                config,
                engine,
                store,
                fetcher,
                registration,
                clients,
                event_tx,
            }),
        };

        if let Some(old) = replaced {
            worker.emit_state(old.id, &old.version, old.state);
        }
        Ok(worker)
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.inner.id
    }

    pub fn version(&self) -> &str {
        &self.inner.config.version
    }

    pub fn cache_names(&self) -> &CacheNames {
        self.inner.engine.names()
    }

    pub fn engine(&self) -> &CachePolicyEngine {
        &self.inner.engine
    }

    /// Current state; `Redundant` once the registration dropped this version.
    pub async fn state(&self) -> ServiceWorkerState {
        self.inner
            .registration
            .read()
            .await
            .state_of(self.inner.id)
            .unwrap_or(ServiceWorkerState::Redundant)
    }

    pub(crate) fn emit(&self, event: WorkerEvent) {
        // No receiver just means no host is listening.
        let _ = self.inner.event_tx.send(event);
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, version: &str, new_state: ServiceWorkerState) {
        debug!(version, state = %new_state, "Worker state change");
        self.emit(WorkerEvent::StateChange {
            worker_id,
            version: version.to_string(),
            new_state,
        });
    }

    fn emit_own_state(&self, new_state: ServiceWorkerState) {
        self.emit_state(self.inner.id, &self.inner.config.version, new_state);
    }

    // ==================== Install ====================

    /// Precache the app shell.
    ///
    /// All manifest resources are fetched before anything is written, so a
    /// failure leaves no partial precache. On failure this version becomes
    /// redundant and the active version keeps serving.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        let id = self.inner.id;
        info!(version = %self.version(), "Installing");

        {
            let mut registration = self.inner.registration.write().await;
            registration
                .installing_mut(id)?
                .set_state(ServiceWorkerState::Installing);
        }
        self.emit_own_state(ServiceWorkerState::Installing);

        match self.precache().await {
            Ok(count) => {
                info!(version = %self.version(), count, "Precached app shell");
                let replaced = self.inner.registration.write().await.install_complete(id)?;
                if let Some(old) = replaced {
                    self.emit_state(old.id, &old.version, old.state);
                }
                self.emit_own_state(ServiceWorkerState::Installed);

                debug!(version = %self.version(), "Skip waiting");
                self.skip_waiting().await;
                Ok(())
            }
            Err(e) => {
                error!(version = %self.version(), error = %e, "Precaching failed");
                if self.inner.registration.write().await.install_failed(id).is_some() {
                    self.emit_own_state(ServiceWorkerState::Redundant);
                }
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        let fetches = self.inner.engine.manifest().iter().map(|url| {
            let request = Request::get(url.clone());
            async move {
                let response = self.inner.fetcher.fetch(&request).await.map_err(|e| {
                    ServiceWorkerError::PrecacheFailed {
                        url: request.url.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                if !response.ok() {
                    return Err(ServiceWorkerError::PrecacheFailed {
                        url: request.url.to_string(),
                        reason: format!("status {}", response.status),
                    });
                }
                Ok::<_, ServiceWorkerError>((request.cache_key(), response))
            }
        });
        let entries = try_join_all(fetches).await?;

        let precache = &self.cache_names().precache;
        self.inner.store.open(precache).await?;
        self.inner.store.put_all(precache, &entries).await?;
        Ok(entries.len())
    }

    /// Ask to be activated as soon as installed.
    pub async fn skip_waiting(&self) -> bool {
        self.inner
            .registration
            .write()
            .await
            .request_skip_waiting(self.inner.id)
    }

    /// Whether this version asked to skip waiting.
    pub async fn skip_waiting_requested(&self) -> bool {
        self.inner
            .registration
            .read()
            .await
            .skip_waiting_requested(self.inner.id)
    }

    // ==================== Activate ====================

    /// Take over: delete stale generations, then claim every client.
    ///
    /// Cache deletion is best effort; failures are reported, not retried.
    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        let id = self.inner.id;
        info!(version = %self.version(), "Activating");

        let replaced = self.inner.registration.write().await.begin_activation(id)?;
        if let Some(old) = replaced {
            self.emit_state(old.id, &old.version, old.state);
        }
        self.emit_own_state(ServiceWorkerState::Activating);

        let (deleted, failed) = self.delete_stale_caches().await;

        debug!(version = %self.version(), "Claiming clients");
        let claimed = self.inner.clients.write().await.claim(id);
        for client_id in &claimed {
            self.emit(WorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id: id,
            });
        }

        self.inner.registration.write().await.finish_activation(id);
        self.emit_own_state(ServiceWorkerState::Activated);

        Ok(ActivationReport {
            deleted,
            failed,
            claimed,
        })
    }

    async fn delete_stale_caches(&self) -> (Vec<String>, Vec<String>) {
        let names = match self.inner.store.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list caches, skipping cleanup");
                return (Vec::new(), Vec::new());
            }
        };

        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| self.cache_names().is_stale(name))
            .collect();

        let results = join_all(stale.iter().map(|name| async move {
            info!(cache = %name, "Deleting old cache");
            self.inner.store.delete(name).await
        }))
        .await;

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(_) => deleted.push(name),
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete old cache");
                    failed.push(name);
                }
            }
        }
        (deleted, failed)
    }

    // ==================== Messages ====================

    /// Handle a command posted by a page.
    pub async fn handle_message(&self, message: WorkerMessage) -> Result<(), ServiceWorkerError> {
        info!(?message, "Message received");
        match message {
            WorkerMessage::SkipWaiting => {
                self.skip_waiting().await;
                if self.state().await == ServiceWorkerState::Installed {
                    let report = self.activate().await?;
                    debug!(?report, "Activated on request");
                }
                Ok(())
            }
            WorkerMessage::ClearCache => {
                let names = self.clear_caches().await?;
                self.emit(WorkerEvent::CachesCleared { names });
                Ok(())
            }
        }
    }

    /// Parse and handle a raw JSON message such as `{"action":"clearCache"}`.
    pub async fn handle_raw_message(&self, raw: &str) -> Result<(), ServiceWorkerError> {
        let message = raw.parse::<WorkerMessage>().inspect_err(|e| {
            warn!(raw, error = %e, "Ignoring unknown message");
        })?;
        self.handle_message(message).await
    }

    /// Delete every cache in the store.
    pub async fn clear_caches(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let names = self.inner.store.keys().await?;
        let mut deleted = Vec::with_capacity(names.len());
        for name in names {
            match self.inner.store.delete(&name).await {
                Ok(_) => deleted.push(name),
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete cache"),
            }
        }
        info!(count = deleted.len(), "Cleared caches");
        Ok(deleted)
    }

    // ==================== Fetch ====================

    /// Resolve a request through the cache policy. `None` means pass through.
    pub async fn handle_fetch(&self, request: &Request) -> Option<Response> {
        self.inner.engine.respond(request).await
    }

    // ==================== Event dispatch ====================

    /// Run install under the event's lifetime guard.
    pub fn dispatch_install(&self, event: &mut ExtendableEvent) {
        let worker = self.clone();
        event.wait_until(async move {
            // install() already logged the cause.
            let _ = worker.install().await;
        });
    }

    /// Run activate under the event's lifetime guard.
    pub fn dispatch_activate(&self, event: &mut ExtendableEvent) {
        let worker = self.clone();
        event.wait_until(async move {
            if let Err(e) = worker.activate().await {
                error!(error = %e, "Activation failed");
            }
        });
    }

    /// Run a message command under the event's lifetime guard.
    pub fn dispatch_message(&self, event: &mut ExtendableEvent, message: WorkerMessage) {
        let worker = self.clone();
        event.wait_until(async move {
            if let Err(e) = worker.handle_message(message).await {
                error!(?message, error = %e, "Message handling failed");
            }
        });
    }

    /// Claim the request if the cache policy covers it.
    pub fn dispatch_fetch(&self, event: &mut FetchEvent) {
        let Some(class) = self.inner.engine.classify(&event.request) else {
            return;
        };
        let worker = self.clone();
        let request = event.request.clone();
        event.respond_with(async move {
            worker
                .inner
                .engine
                .execute(class.strategy(), &request)
                .await
        });
    }
}
