//! Pages controlled by the worker.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::lifecycle::ServiceWorkerId;

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// A window (page) in scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,

    /// Whether focused.
    pub focused: bool,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an uncontrolled page.
    pub fn add(&mut self, url: Url) -> Client {
        let client = Client {
            id: next_client_id(),
            url,
            controller: None,
            focused: false,
        };
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// All clients, sorted by ID.
    pub fn match_all(&self) -> Vec<&Client> {
        let mut all: Vec<&Client> = self.clients.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Open a focused window at `url`, already controlled by `controller`.
    pub fn open_window(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
        let client = Client {
            id: next_client_id(),
            url,
            controller,
            focused: true,
        };
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Make `worker` the controller of every client. Returns the IDs of the
    /// clients whose controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://gazon.test/").unwrap().join(path).unwrap()
    }

    #[test]
    fn test_open_window_focuses_only_new_client() {
        let mut clients = Clients::new();
        let first = clients.add(url("/"));
        let window = clients.open_window(url("/index.html"), None);

        assert!(window.focused);
        let all = clients.match_all();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|c| c.id == first.id && !c.focused));
    }

    #[test]
    fn test_claim_reports_changed_clients_only() {
        let mut clients = Clients::new();
        let a = clients.add(url("/"));
        let b = clients.add(url("/index.html"));

        let mut expected = vec![a.id.clone(), b.id.clone()];
        expected.sort();

        let worker = ServiceWorkerId::new();
        assert_eq!(clients.claim(worker), expected);
        assert!(clients.claim(worker).is_empty());
        assert!(clients
            .match_all()
            .iter()
            .all(|c| c.controller == Some(worker)));
    }
}
