//! Push, background sync and notification click hooks.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::clients::Client;
use crate::event::ExtendableEvent;
use crate::lifecycle::{ServiceWorker, WorkerEvent};
use crate::ServiceWorkerError;

/// Title of every notification the worker shows.
pub const NOTIFICATION_TITLE: &str = "de Gazon App";

/// Body used when a push carries no payload.
pub const DEFAULT_PUSH_BODY: &str = "Nieuwe update beschikbaar";

/// Sync tag that triggers a data sync.
pub const SYNC_DATA_TAG: &str = "sync-data";

/// Extra data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Milliseconds since the epoch.
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

/// A notification the worker asks the host to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: Url,
    pub badge: Url,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

impl Notification {
    fn for_push(scope: &Url, payload: Option<&str>) -> Result<Self, ServiceWorkerError> {
        let resolve = |path: &str| {
            scope
                .join(path)
                .map_err(|e| ServiceWorkerError::Config(format!("{path}: {e}")))
        };

        let body = payload
            .filter(|text| !text.is_empty())
            .unwrap_or(DEFAULT_PUSH_BODY);

        Ok(Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: body.to_string(),
            icon: resolve("./src/assets/icons/icon-192x192.png")?,
            badge: resolve("./src/assets/icons/icon-72x72.png")?,
            vibrate: vec![200, 100, 200],
            data: NotificationData {
                date_of_arrival: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default(),
                primary_key: 1,
            },
        })
    }
}

impl ServiceWorker {
    /// Handle a push message by showing a notification.
    pub fn push(&self, payload: Option<&str>) -> Result<Notification, ServiceWorkerError> {
        info!("Push notification received");
        let notification = Notification::for_push(&self.inner.config.scope, payload)?;
        self.emit(WorkerEvent::Notification(notification.clone()));
        Ok(notification)
    }

    /// Handle a background sync. Returns whether the tag was recognised.
    pub async fn sync(&self, tag: &str) -> bool {
        info!(tag, "Background sync");
        if tag != SYNC_DATA_TAG {
            return false;
        }
        self.sync_data().await;
        true
    }

    async fn sync_data(&self) {
        // TODO: push queued analyses and schedules once the backend exposes a sync endpoint.
        debug!("Syncing data");
    }

    /// Handle a notification click by opening a window on the scope URL.
    pub async fn notification_click(&self) -> Client {
        info!("Notification clicked");
        let url = self.inner.config.scope.clone();
        let client = self
            .inner
            .clients
            .write()
            .await
            .open_window(url.clone(), Some(self.inner.id));

        self.emit(WorkerEvent::WindowOpened {
            client_id: client.id.clone(),
            url,
        });
        client
    }

    /// Run a sync under the event's lifetime guard.
    pub fn dispatch_sync(&self, event: &mut ExtendableEvent, tag: &str) {
        let worker = self.clone();
        let tag = tag.to_string();
        event.wait_until(async move {
            worker.sync(&tag).await;
        });
    }

    /// Open the window for a clicked notification under the event's lifetime guard.
    pub fn dispatch_notification_click(&self, event: &mut ExtendableEvent) {
        let worker = self.clone();
        event.wait_until(async move {
            worker.notification_click().await;
        });
    }
}
