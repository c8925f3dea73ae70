//! Delegated click handling: maps clicked elements to navigations.

use tracing::warn;

use crate::route::RouteName;

/// What the router needs to know about one element in a click's ancestry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementInfo {
    pub id: Option<String>,
    pub classes: Vec<String>,
    /// Value of `data-page`.
    pub data_page: Option<String>,
}

impl ElementInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn with_data_page(mut self, page: &str) -> Self {
        self.data_page = Some(page.to_string());
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }
}

/// Element markers the dispatcher recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavMarker {
    /// `.nav-item[data-page]`
    NavItem,
    /// `.feature-card#<id>`
    FeatureCard,
    /// `#view-points-btn`
    ViewPoints,
    /// `.back-btn`
    Back,
}

/// Result of dispatching a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavAction {
    pub route: RouteName,
    /// Update the active navigation marker right away.
    pub mark_active: bool,
    pub marker: NavMarker,
}

/// Feature card IDs and the routes they open.
const FEATURE_CARDS: [(&str, RouteName); 4] = [
    ("photo-analysis-card", RouteName::PhotoAnalysis),
    ("fertilizer-planner-card", RouteName::FertilizerPlanner),
    ("loyalty-card", RouteName::Loyalty),
    ("challenge-card", RouteName::Challenge),
];

/// Explicit marker table for delegated clicks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigationDispatcher;

impl NavigationDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a click. `ancestry` starts at the click target and walks
    /// outward; the first element carrying a known marker decides.
    pub fn resolve(&self, ancestry: &[ElementInfo]) -> Option<NavAction> {
        ancestry.iter().find_map(|element| self.match_element(element))
    }

    fn match_element(&self, element: &ElementInfo) -> Option<NavAction> {
        if element.has_class("nav-item") {
            if let Some(page) = element.data_page.as_deref() {
                match page.parse::<RouteName>() {
                    Ok(route) => {
                        return Some(NavAction {
                            route,
                            mark_active: true,
                            marker: NavMarker::NavItem,
                        })
                    }
                    Err(e) => warn!(page, error = %e, "Nav item points at unknown page"),
                }
            }
        }

        if element.has_class("feature-card") {
            let card = FEATURE_CARDS
                .iter()
                .find(|(id, _)| element.has_id(id))
                .map(|(_, route)| *route);
            if let Some(route) = card {
                return Some(NavAction {
                    route,
                    mark_active: false,
                    marker: NavMarker::FeatureCard,
                });
            }
        }

        if element.has_id("view-points-btn") {
            return Some(NavAction {
                route: RouteName::Loyalty,
                mark_active: false,
                marker: NavMarker::ViewPoints,
            });
        }

        if element.has_class("back-btn") {
            return Some(NavAction {
                route: RouteName::Home,
                mark_active: false,
                marker: NavMarker::Back,
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(ancestry: &[ElementInfo]) -> Option<NavAction> {
        NavigationDispatcher::new().resolve(ancestry)
    }

    #[test]
    fn test_nav_item_marks_active() {
        let icon = ElementInfo::new().with_class("icon");
        let item = ElementInfo::new()
            .with_class("nav-item")
            .with_data_page("loyalty");

        let action = resolve(&[icon, item]).unwrap();
        assert_eq!(action.route, RouteName::Loyalty);
        assert!(action.mark_active);
        assert_eq!(action.marker, NavMarker::NavItem);
    }

    #[test]
    fn test_feature_cards() {
        for (id, route) in FEATURE_CARDS {
            let card = ElementInfo::new().with_class("feature-card").with_id(id);
            let action = resolve(&[card]).unwrap();
            assert_eq!(action.route, route);
            assert!(!action.mark_active);
        }

        let unknown = ElementInfo::new().with_class("feature-card").with_id("weather-card");
        assert!(resolve(&[unknown]).is_none());
    }

    #[test]
    fn test_points_and_back_buttons() {
        let points = ElementInfo::new().with_id("view-points-btn");
        assert_eq!(resolve(&[points]).unwrap().route, RouteName::Loyalty);

        let back = ElementInfo::new().with_class("back-btn");
        assert_eq!(resolve(&[back]).unwrap().route, RouteName::Home);
    }

    #[test]
    fn test_innermost_marker_wins() {
        let back = ElementInfo::new().with_class("back-btn");
        let card = ElementInfo::new()
            .with_class("feature-card")
            .with_id("loyalty-card");

        let action = resolve(&[back, card]).unwrap();
        assert_eq!(action.marker, NavMarker::Back);
    }

    #[test]
    fn test_unknown_page_falls_through_to_outer_marker() {
        let item = ElementInfo::new()
            .with_class("nav-item")
            .with_data_page("settings");
        let card = ElementInfo::new()
            .with_class("feature-card")
            .with_id("challenge-card");

        assert_eq!(resolve(&[item, card]).unwrap().route, RouteName::Challenge);
    }

    #[test]
    fn test_unmarked_click_does_nothing() {
        let plain = ElementInfo::new().with_class("card-title");
        assert!(resolve(&[plain]).is_none());
        assert!(resolve(&[]).is_none());
    }
}
