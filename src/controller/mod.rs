//! Controllers and the action registry the dispatcher resolves them through.
//!
//! A controller type implements [`Controller`] for its `before`/`after`
//! hooks. Its actions are registered by name on a [`ControllerDef`], which in
//! turn is registered on [`Controllers`] under the identifier built by
//! [`controller_id`]. Resolution is a map lookup; nothing is found by name at
//! runtime through reflection.
//!
//! ```
//! use hmvc::context::Context;
//! use hmvc::controller::{Controller, ControllerDef, Controllers};
//! use hmvc::Result;
//!
//! #[derive(Default)]
//! struct Blog;
//!
//! impl Controller for Blog {}
//!
//! impl Blog {
//!     fn view(&mut self, cx: &mut Context<'_>, params: &[String]) -> Result<()> {
//!         cx.response_mut().write(format!("post {}", params.join(",")));
//!         Ok(())
//!     }
//! }
//!
//! let mut controllers = Controllers::new();
//! controllers.register("blog", ControllerDef::new(Blog::default).action("view", Blog::view));
//! assert!(controllers.get("controller_blog").is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::{Method, StatusCode};

/// Action run for a RESTful controller when the request method has no mapping.
pub const INVALID_ACTION: &str = "invalid";

/// Reason carried by [`Error::ControllerNotFound`] for unregistered identifiers.
pub const MISSING_CONTROLLER: &str = "unable to find controller";

/// Reason carried by [`Error::ControllerNotFound`] for abstract controllers.
pub const ABSTRACT_CONTROLLER: &str = "cannot create instances of abstract controller";

/// Lifecycle hooks run around every action.
///
/// A fresh controller is created for each dispatch, so fields hold state for
/// one request only. Returning an error from `before` skips the action and
/// `after`.
pub trait Controller: Send + 'static {
    fn before(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }

    fn after(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let _ = cx;
        Ok(())
    }
}

/// A type-erased, reference-counted action entry point.
///
/// Receives the route parameters positionally, in the order the route
/// declared them.
pub type ActionHandler<C> =
    Arc<dyn Fn(&mut C, &mut Context<'_>, &[String]) -> Result<()> + Send + Sync + 'static>;

type Factory<C> = Arc<dyn Fn() -> C + Send + Sync + 'static>;

/// The method to action mapping of [`ControllerDef::restful`].
pub const REST_ACTIONS: [(Method, &str); 4] = [
    (Method::Get, "index"),
    (Method::Put, "update"),
    (Method::Post, "create"),
    (Method::Delete, "delete"),
];

/// How to create a controller and which actions it answers.
pub struct ControllerDef<C> {
    factory: Factory<C>,
    actions: HashMap<String, ActionHandler<C>>,
    rest: Option<Vec<(Method, String)>>,
}

impl<C: Controller> ControllerDef<C> {
    pub fn new(factory: impl Fn() -> C + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            actions: HashMap::new(),
            rest: None,
        }
    }

    /// Registers `action` under `name`, replacing an earlier action of that name.
    ///
    /// Names are matched case-insensitively.
    #[must_use]
    pub fn action<F>(mut self, name: &str, action: F) -> Self
    where
        F: Fn(&mut C, &mut Context<'_>, &[String]) -> Result<()> + Send + Sync + 'static,
    {
        self.actions
            .insert(name.to_ascii_lowercase(), Arc::new(action));
        self
    }

    /// Selects actions by request method with [`REST_ACTIONS`].
    #[must_use]
    pub fn restful(self) -> Self {
        self.restful_with(REST_ACTIONS)
    }

    /// Selects actions by request method with a custom mapping.
    ///
    /// Requests whose method is not mapped run [`INVALID_ACTION`], which
    /// answers `405 Method Not Allowed` unless the definition registers its
    /// own `invalid` action.
    #[must_use]
    pub fn restful_with<'m>(mut self, mapping: impl IntoIterator<Item = (Method, &'m str)>) -> Self {
        self.rest = Some(
            mapping
                .into_iter()
                .map(|(method, action)| (method, action.to_ascii_lowercase()))
                .collect(),
        );
        self
    }

    fn allowed_methods(&self) -> String {
        self.rest
            .iter()
            .flatten()
            .map(|(method, _)| method.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A controller definition with its type erased, as stored by [`Controllers`].
pub trait Dispatchable: Send + Sync {
    fn has_action(&self, action: &str) -> bool;

    /// The action selected by `method` for RESTful definitions, `None` otherwise.
    fn rest_action(&self, method: &Method) -> Option<String>;

    /// Creates a controller and runs `before`, the action, then `after`.
    fn invoke(&self, id: &str, action: &str, cx: &mut Context<'_>, params: &[String]) -> Result<()>;
}

impl<C: Controller> Dispatchable for ControllerDef<C> {
    fn has_action(&self, action: &str) -> bool {
        let action = action.to_ascii_lowercase();
        self.actions.contains_key(&action) || (self.rest.is_some() && action == INVALID_ACTION)
    }

    fn rest_action(&self, method: &Method) -> Option<String> {
        let mapping = self.rest.as_ref()?;
        let action = mapping
            .iter()
            .find(|(m, _)| m == method)
            .map_or(INVALID_ACTION, |(_, action)| action.as_str());
        Some(action.to_owned())
    }

    fn invoke(&self, id: &str, action: &str, cx: &mut Context<'_>, params: &[String]) -> Result<()> {
        let name = action.to_ascii_lowercase();
        let handler = self.actions.get(&name);
        if handler.is_none() && !(self.rest.is_some() && name == INVALID_ACTION) {
            return Err(Error::ActionNotFound {
                controller: id.to_owned(),
                action: action.to_owned(),
            });
        }

        let mut controller = (self.factory)();
        controller.before(cx)?;
        match handler {
            Some(handler) => handler(&mut controller, cx, params)?,
            None => {
                debug!(controller = id, "method not allowed");
                cx.response_mut()
                    .set_status(StatusCode::MethodNotAllowed)
                    .set_header("Allow", &self.allowed_methods());
            }
        }
        controller.after(cx)
    }
}

/// A registered controller identifier.
#[derive(Clone)]
pub enum ControllerEntry {
    /// Known, but cannot be instantiated.
    Abstract,
    Concrete(Arc<dyn Dispatchable>),
}

impl fmt::Debug for ControllerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstract => f.write_str("Abstract"),
            Self::Concrete(_) => f.write_str("Concrete(..)"),
        }
    }
}

/// Identifier a controller is registered under.
///
/// `("admin/users", "Roles")` → `controller_admin_users_roles`.
pub fn controller_id(directory: &str, controller: &str) -> String {
    let mut id = String::from("controller_");
    let directory = directory.trim_matches('/');
    if !directory.is_empty() {
        id.push_str(&directory.replace(['/', '\\'], "_"));
        id.push('_');
    }
    id.push_str(controller);
    id.to_ascii_lowercase()
}

/// Controller registry keyed by [`controller_id`].
#[derive(Default, Clone)]
pub struct Controllers {
    entries: HashMap<String, ControllerEntry>,
}

impl Controllers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a controller outside any directory.
    pub fn register<C: Controller>(&mut self, name: &str, def: ControllerDef<C>) -> &mut Self {
        self.register_in("", name, def)
    }

    pub fn register_in<C: Controller>(
        &mut self,
        directory: &str,
        name: &str,
        def: ControllerDef<C>,
    ) -> &mut Self {
        self.entries.insert(
            controller_id(directory, name),
            ControllerEntry::Concrete(Arc::new(def)),
        );
        self
    }

    /// Marks an identifier as an abstract controller that must not be dispatched to.
    pub fn register_abstract(&mut self, directory: &str, name: &str) -> &mut Self {
        self.entries
            .insert(controller_id(directory, name), ControllerEntry::Abstract);
        self
    }

    pub fn get(&self, id: &str) -> Option<&ControllerEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Controllers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Controller for Noop {}

    fn noop(_: &mut Noop, _: &mut Context<'_>, _: &[String]) -> Result<()> {
        Ok(())
    }

    #[test]
    fn ids_include_directory() {
        assert_eq!(controller_id("", "Welcome"), "controller_welcome");
        assert_eq!(controller_id("/admin/users/", "roles"), "controller_admin_users_roles");
        assert_eq!(controller_id("api\\v1", "Posts"), "controller_api_v1_posts");
    }

    #[test]
    fn actions_are_case_insensitive() {
        let def = ControllerDef::new(|| Noop).action("View", noop);
        assert!(def.has_action("view"));
        assert!(def.has_action("VIEW"));
        assert!(!def.has_action("edit"));
        assert!(!def.has_action(INVALID_ACTION));
        assert_eq!(def.rest_action(&Method::Get), None);
    }

    #[test]
    fn rest_mapping() {
        let def = ControllerDef::new(|| Noop).action("index", noop).restful();
        assert_eq!(def.rest_action(&Method::Get).as_deref(), Some("index"));
        assert_eq!(def.rest_action(&Method::Delete).as_deref(), Some("delete"));
        assert_eq!(def.rest_action(&Method::Patch).as_deref(), Some(INVALID_ACTION));
        assert!(def.has_action(INVALID_ACTION));
        assert_eq!(def.allowed_methods(), "GET, PUT, POST, DELETE");
    }

    #[test]
    fn registry_entries() {
        let mut controllers = Controllers::new();
        controllers
            .register("welcome", ControllerDef::new(|| Noop).action("index", noop))
            .register_in("admin", "users", ControllerDef::new(|| Noop))
            .register_abstract("", "template");

        assert_eq!(controllers.len(), 3);
        assert!(matches!(
            controllers.get("controller_welcome"),
            Some(ControllerEntry::Concrete(_))
        ));
        assert!(controllers.get("controller_admin_users").is_some());
        assert!(matches!(
            controllers.get("controller_template"),
            Some(ControllerEntry::Abstract)
        ));
        assert!(controllers.get("controller_missing").is_none());
    }
}
