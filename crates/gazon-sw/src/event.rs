//! Extendable events: explicit lifetime extension for worker handlers.
//!
//! A handler registers its asynchronous work with [`ExtendableEvent::wait_until`];
//! the host keeps the event alive and awaits [`ExtendableEvent::settle`].
//! Dropping an unsettled event aborts the registered work, the same way a
//! worker context torn down mid-operation loses it.

use std::future::Future;

use gazon_net::{Request, Response};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, trace};

/// Kind of lifecycle event, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
    Push,
    Sync,
    NotificationClick,
}

/// Event whose lifetime the handler can extend.
#[derive(Debug)]
pub struct ExtendableEvent {
    kind: EventKind,
    tasks: JoinSet<()>,
}

impl ExtendableEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            tasks: JoinSet::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Keep the event open until `work` finishes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        trace!(kind = ?self.kind, "wait_until");
        self.tasks.spawn(work);
    }

    /// Number of registered tasks that have not been joined yet.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every registered task. Panicked tasks are logged, not propagated.
    pub async fn settle(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(kind = ?self.kind, error = %e, "Extended task did not complete");
            }
        }
    }
}

/// Fetch event: an extendable event that may also carry a response.
#[derive(Debug)]
pub struct FetchEvent {
    pub request: Request,
    responder: Option<JoinHandle<Response>>,
    extend: ExtendableEvent,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            responder: None,
            extend: ExtendableEvent::new(EventKind::Fetch),
        }
    }

    /// Answer the request with the output of `response`.
    pub fn respond_with<F>(&mut self, response: F)
    where
        F: Future<Output = Response> + Send + 'static,
    {
        if let Some(previous) = self.responder.replace(tokio::spawn(response)) {
            previous.abort();
        }
    }

    /// Whether a handler claimed the request.
    pub fn is_handled(&self) -> bool {
        self.responder.is_some()
    }

    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.extend.wait_until(work);
    }

    /// Wait for the response and any extended work.
    ///
    /// `None` means no handler responded and the host should fall through to
    /// the network itself.
    pub async fn settle(self) -> Option<Response> {
        let response = match self.responder {
            Some(handle) => match handle.await {
                Ok(response) => Some(response),
                Err(e) => {
                    error!(url = %self.request.url, error = %e, "Fetch responder did not complete");
                    None
                }
            },
            None => None,
        };
        self.extend.settle().await;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    #[tokio::test]
    async fn test_settle_waits_for_all_work() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut event = ExtendableEvent::new(EventKind::Install);

        for delay in [5u64, 1, 10] {
            let done = done.clone();
            event.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(event.pending(), 3);

        event.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_settle_survives_panicking_task() {
        let mut event = ExtendableEvent::new(EventKind::Activate);
        event.wait_until(async { panic!("handler bug") });
        event.settle().await;
    }

    #[tokio::test]
    async fn test_unhandled_fetch_falls_through() {
        let request = Request::get(Url::parse("https://gazon.test/").unwrap());
        let event = FetchEvent::new(request);
        assert!(!event.is_handled());
        assert!(event.settle().await.is_none());
    }
}
