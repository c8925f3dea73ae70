//! In-memory origin for tests.
//!
//! Serves canned responses by URL path, counts every fetch, and can be
//! switched offline to simulate transport failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::trace;
use url::Url;

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum Canned {
    Respond {
        status: StatusCode,
        content_type: &'static str,
        body: Bytes,
        delay: Option<Duration>,
    },
    Fail,
}

/// Scripted [`Fetcher`] over a single origin.
#[derive(Debug)]
pub struct MemoryFetcher {
    origin: Url,
    routes: Mutex<HashMap<String, Canned>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryFetcher {
    /// Create an empty origin. Unknown paths answer 404.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Serve `body` with status 200 at `path`.
    pub fn serve(&self, path: &str, content_type: &'static str, body: impl Into<Bytes>) {
        self.insert(
            path,
            Canned::Respond {
                status: StatusCode::OK,
                content_type,
                body: body.into(),
                delay: None,
            },
        );
    }

    /// Serve `body` at `path` after `delay`.
    pub fn serve_delayed(
        &self,
        path: &str,
        content_type: &'static str,
        body: impl Into<Bytes>,
        delay: Duration,
    ) {
        self.insert(
            path,
            Canned::Respond {
                status: StatusCode::OK,
                content_type,
                body: body.into(),
                delay: Some(delay),
            },
        );
    }

    /// Answer `path` with an empty body and `status`.
    pub fn serve_status(&self, path: &str, status: StatusCode) {
        self.insert(
            path,
            Canned::Respond {
                status,
                content_type: "text/plain",
                body: Bytes::new(),
                delay: None,
            },
        );
    }

    /// Make fetches of `path` fail at the transport level.
    pub fn fail(&self, path: &str) {
        self.insert(path, Canned::Fail);
    }

    /// Take the whole origin offline (or back online).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total fetches seen, including failed ones.
    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Fetches seen for one path.
    pub fn calls_for(&self, path: &str) -> usize {
        lock(&self.calls).iter().filter(|p| p.as_str() == path).count()
    }

    /// Forget recorded fetches.
    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    fn insert(&self, path: &str, canned: Canned) {
        lock(&self.routes).insert(path.to_string(), canned);
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let path = request.url.path().to_string();
        lock(&self.calls).push(path.clone());
        trace!(url = %request.url, "memory fetch");

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline(request.url.to_string()));
        }
        if request.url.origin() != self.origin.origin() {
            return Err(NetError::RequestFailed(format!(
                "unknown host for {}",
                request.url
            )));
        }

        let canned = lock(&self.routes).get(&path).cloned();
        match canned {
            Some(Canned::Respond {
                status,
                content_type,
                body,
                delay,
            }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                Ok(Response::new(request.url.clone(), status, headers, body))
            }
            Some(Canned::Fail) => Err(NetError::Offline(request.url.to_string())),
            None => Ok(Response::new(
                request.url.clone(),
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                Bytes::new(),
            )),
        }
    }
}
