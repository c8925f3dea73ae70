//! Route names and route table entries.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dom::Document;
use crate::RouterError;

/// Pages the app can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteName {
    Login,
    Home,
    PhotoAnalysis,
    FertilizerPlanner,
    Loyalty,
    Challenge,
}

impl RouteName {
    pub const ALL: [RouteName; 6] = [
        RouteName::Login,
        RouteName::Home,
        RouteName::PhotoAnalysis,
        RouteName::FertilizerPlanner,
        RouteName::Loyalty,
        RouteName::Challenge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteName::Login => "login",
            RouteName::Home => "home",
            RouteName::PhotoAnalysis => "photo-analysis",
            RouteName::FertilizerPlanner => "fertilizer-planner",
            RouteName::Loyalty => "loyalty",
            RouteName::Challenge => "challenge",
        }
    }
}

impl fmt::Display for RouteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteName {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RouteName::ALL
            .into_iter()
            .find(|route| route.as_str() == s)
            .ok_or_else(|| RouterError::UnknownRoute(s.to_string()))
    }
}

/// Callback run after a route's fragment is in the document.
pub type OnLoad = Arc<dyn Fn(&dyn Document) + Send + Sync>;

/// One entry of the route table.
#[derive(Clone)]
pub struct Route {
    pub name: RouteName,
    /// Fragment path, relative to the router's base URL.
    pub path: String,
    pub on_load: Option<OnLoad>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("on_load", &self.on_load.is_some())
            .finish()
    }
}
