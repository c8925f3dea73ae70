//! # Gazon Service Worker
//!
//! Offline caching worker for the Gazon app shell.
//!
//! ## Features
//!
//! - **Precache**: app-shell resources fetched atomically at install
//! - **Generations**: versioned cache names, stale ones deleted at activate
//! - **Fetch policy**: cache-first for the shell and assets, network-first for pages
//! - **Offline fallback**: cached app root for pages, a JSON 503 for everything else
//! - **Messages**: `skipWaiting` and `clearCache` from the page
//! - **Extensions**: push notifications, background sync, notification clicks
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     │
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing (WorkerVersion)
//!     │       ├── waiting    (WorkerVersion)
//!     │       └── active     (WorkerVersion)
//!     │
//!     └── ServiceWorker
//!             ├── CachePolicyEngine ──→ Fetcher
//!             └── CacheStore
//!                     └── <ns>-<ver>, <ns>-runtime-<ver>
//!                             └── Request → Response
//! ```

use gazon_common::GazonError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod container;
pub mod event;
pub mod extensions;
pub mod lifecycle;
pub mod policy;

pub use cache::{Cache, CacheEntry, CacheStore, MemoryCacheStore};
pub use clients::{Client, Clients};
pub use container::{ControlledFetcher, ServiceWorkerContainer};
pub use event::{EventKind, ExtendableEvent, FetchEvent};
pub use extensions::{Notification, NotificationData};
pub use lifecycle::{
    ActivationReport, ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration,
    ServiceWorkerState, WorkerEvent, WorkerMessage, WorkerVersion,
};
pub use policy::{CacheKind, CacheNames, CachePolicyEngine, OfflineBody, RequestClass, Strategy};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Precache failed for {url}: {reason}")]
    PrecacheFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ServiceWorkerError> for GazonError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Config(message) => GazonError::config(message),
            ServiceWorkerError::NotFound(what) => GazonError::NotFound(what),
            other @ ServiceWorkerError::CacheError(_) => {
                GazonError::cache_with_source("cache store", other)
            }
            other => GazonError::worker_with_source("service worker", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServiceWorkerError::PrecacheFailed {
            url: "https://gazon.test/index.html".to_string(),
            reason: "status 500".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Precache failed for https://gazon.test/index.html: status 500"
        );
    }

    #[test]
    fn test_into_gazon_error() {
        let err: GazonError = ServiceWorkerError::Config("bad scope".to_string()).into();
        assert_eq!(err.category(), "config");

        let err: GazonError = ServiceWorkerError::CacheError("quota".to_string()).into();
        assert_eq!(err.category(), "cache");

        let err: GazonError = ServiceWorkerError::StateError("not waiting".to_string()).into();
        assert_eq!(err.category(), "worker");
    }
}
