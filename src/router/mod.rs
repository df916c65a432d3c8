//! Request routing: map URI patterns to controller/action parameters.
//!
//! A [`Route`] compiles a pattern with named placeholders and optional groups into an
//! anchored matcher. [`Routes`] holds named routes in registration order:
//!
//! | Pattern                          | Example match           | Captured params                          |
//! |----------------------------------|-------------------------|------------------------------------------|
//! | `blog/:id`                       | `blog/7`                | `id → "7"`                               |
//! | `(:controller(/:action(/:id)))`  | `news/view`             | `controller → "news"`, `action → "view"` |
//! | `(:path/):file(.:format)`        | `a/b.txt` (path `.*`)   | `path → "a"`, `file → "b"`, `format → "txt"` |
//!
//! Leading and trailing slashes are trimmed from both patterns and incoming URIs.
//!
//! Routes are matched in registration order; the first route whose pattern matches wins.

mod route;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::context::Parameters;
use crate::error::{Error, Result};

pub use route::{DEFAULT_ACTION, DEFAULT_CONSTRAINT, Route};

/// Outcome of a successful [`Routes::find`].
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Registered name of the matching route.
    pub name: String,
    pub route: Arc<Route>,
    /// Captured parameters merged with the route's defaults.
    pub params: Parameters,
}

/// Named routes, evaluated in registration order.
///
/// Routes are shared behind [`Arc`] so a matched request can keep a handle to the
/// route that produced it (for reverse routing) without borrowing the registry.
///
/// # Examples
///
/// ```rust
/// use hmvc::router::{Route, Routes};
///
/// let mut routes = Routes::new();
/// routes
///     .set("default", Route::new("(:controller(/:action(/:id)))").unwrap()
///         .defaults([("controller", "welcome"), ("action", "index")]))
///     .unwrap();
///
/// let found = routes.find("/blog/view/7/").unwrap();
/// assert_eq!(found.name, "default");
/// assert_eq!(found.params.get("id"), Some("7"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Routes {
    routes: Vec<(String, Arc<Route>)>,
}

impl Routes {
    /// Create a new, empty registry.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hmvc::router::Routes;
    ///
    /// assert!(Routes::new().is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `route` under `name`, after all previously registered routes.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateRoute`] when `name` is already registered.
    pub fn set(&mut self, name: impl Into<String>, route: Route) -> Result<&mut Self> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(Error::DuplicateRoute { name });
        }

        debug!(route = %name, pattern = route.pattern(), "route registered");
        self.routes.push((name, Arc::new(route)));
        Ok(self)
    }

    /// Look up a route by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Route>> {
        self.routes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    /// Name a route was registered under, by identity.
    pub fn name_of(&self, route: &Arc<Route>) -> Option<&str> {
        self.routes
            .iter()
            .find(|(_, r)| Arc::ptr_eq(r, route))
            .map(|(n, _)| n.as_str())
    }

    /// `(name, route)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Route>)> {
        self.routes.iter().map(|(n, r)| (n.as_str(), r))
    }

    /// Return the number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the first route matching `uri`.
    ///
    /// Leading and trailing `/` are trimmed from `uri` before matching.
    ///
    /// # Returns
    ///
    /// The first [`RouteMatch`] in registration order, or `None` when no route matches.
    pub fn find(&self, uri: &str) -> Option<RouteMatch> {
        let uri = uri.trim_matches('/');

        for (name, route) in &self.routes {
            trace!(route = %name, uri, "trying route");
            if let Some(params) = route.matches(uri) {
                debug!(route = %name, uri, "route matched");
                return Some(RouteMatch {
                    name: name.clone(),
                    route: Arc::clone(route),
                    params,
                });
            }
        }

        debug!(uri, "no route matched");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Routes {
        let mut routes = Routes::new();
        routes
            .set("about", Route::new("about").unwrap().defaults([("controller", "page"), ("action", "about")]))
            .unwrap()
            .set(
                "default",
                Route::new("(:controller(/:action(/:id)))")
                    .unwrap()
                    .defaults([("controller", "welcome"), ("action", "index")]),
            )
            .unwrap();
        routes
    }

    #[test]
    fn routes_start_empty() {
        let routes = Routes::new();
        assert!(routes.is_empty());
        assert_eq!(routes.len(), 0);
        assert!(routes.find("anything").is_none());
    }

    #[test]
    fn first_matching_route_wins() {
        let routes = registry();
        let found = routes.find("about").unwrap();
        assert_eq!(found.name, "about");
        assert_eq!(found.params.get("controller"), Some("page"));

        let found = routes.find("blog").unwrap();
        assert_eq!(found.name, "default");
    }

    #[test]
    fn registration_order_is_kept() {
        let routes = registry();
        let names: Vec<_> = routes.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["about", "default"]);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut routes = registry();
        let err = routes.set("about", Route::new("x").unwrap()).unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute { name } if name == "about"));
        assert_eq!(routes.len(), 2);
    }

    #[test]
    fn find_trims_slashes() {
        let routes = registry();
        let found = routes.find("/blog/view/").unwrap();
        assert_eq!(found.params.get("action"), Some("view"));
    }

    #[test]
    fn name_of_matched_route() {
        let routes = registry();
        let found = routes.find("about").unwrap();
        assert_eq!(routes.name_of(&found.route), Some("about"));
        assert!(routes.get("missing").is_none());
    }

    #[test]
    fn no_match_when_nothing_fits() {
        let mut routes = Routes::new();
        routes.set("blog", Route::new("blog/:id").unwrap()).unwrap();
        assert!(routes.find("news/1").is_none());
    }
}
