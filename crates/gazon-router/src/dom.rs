//! The document the router renders into.

use std::sync::{Mutex, MutexGuard};

use crate::route::RouteName;

/// Content region plus the bits of window state the router touches.
pub trait Document: Send + Sync {
    /// Replace the content region.
    fn set_content(&self, html: &str);

    /// Current content region markup.
    fn content(&self) -> String;

    fn scroll_to_top(&self);

    /// Mark the navigation item for `route` active and clear the others.
    fn set_active_nav(&self, route: RouteName);
}

/// One observable document mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomOp {
    SetContent(String),
    ScrollToTop,
    SetActiveNav(RouteName),
}

#[derive(Debug, Default)]
struct DomState {
    content: String,
    active_nav: Option<RouteName>,
    ops: Vec<DomOp>,
}

/// Headless document that records every mutation.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    state: Mutex<DomState>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DomState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active_nav(&self) -> Option<RouteName> {
        self.state().active_nav
    }

    /// Every mutation so far, oldest first.
    pub fn ops(&self) -> Vec<DomOp> {
        self.state().ops.clone()
    }

    /// Number of content replacements.
    pub fn content_writes(&self) -> usize {
        self.state()
            .ops
            .iter()
            .filter(|op| matches!(op, DomOp::SetContent(_)))
            .count()
    }
}

impl Document for MemoryDocument {
    fn set_content(&self, html: &str) {
        let mut state = self.state();
        state.content = html.to_string();
        state.ops.push(DomOp::SetContent(html.to_string()));
    }

    fn content(&self) -> String {
        self.state().content.clone()
    }

    fn scroll_to_top(&self) {
        self.state().ops.push(DomOp::ScrollToTop);
    }

    fn set_active_nav(&self, route: RouteName) {
        let mut state = self.state();
        state.active_nav = Some(route);
        state.ops.push(DomOp::SetActiveNav(route));
    }
}
