//! # hmvc
//!
//! Request routing and hierarchical (HMVC) controller dispatch.
//!
//! Requests are detected from CGI-style environment signals, normalised, and
//! matched against an ordered table of [`Route`]s. The [`Dispatcher`] resolves
//! the matched controller and action, runs the `before` → action → `after`
//! lifecycle, and lets actions execute nested requests whose stack and
//! environment are restored on every exit path.
//!
//! ## Quick Start
//!
//! ```rust
//! use hmvc::{Config, Controller, ControllerDef, Controllers, Dispatcher, Route, Routes};
//! use hmvc::http::{BufferTransport, Environment};
//!
//! struct Blog;
//! impl Controller for Blog {}
//!
//! let mut routes = Routes::new();
//! routes.set("default", Route::new("(:controller(/:action(/:id)))")?
//!     .defaults([("controller", "blog")]))?;
//!
//! let mut controllers = Controllers::new();
//! controllers.register("blog", ControllerDef::new(|| Blog)
//!     .action("view", |_, cx, params| {
//!         let sidebar = cx.fetch("blog/sidebar")?;
//!         cx.response_mut().write(format!("post {} | {sidebar}", params[0]));
//!         Ok(())
//!     })
//!     .action("sidebar", |_, cx, _| {
//!         cx.response_mut().write("recent posts");
//!         Ok(())
//!     }));
//!
//! let dispatcher = Dispatcher::new(Config::default(), routes, controllers);
//! let mut out = BufferTransport::new();
//! dispatcher.serve(&Environment::new().with_var("PATH_INFO", "/blog/view/7"), &mut out)?;
//! assert_eq!(out.body(), b"post 7 | recent posts");
//! # Ok::<(), hmvc::Error>(())
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::Config;
pub use context::{Context, Parameters};
pub use controller::{Controller, ControllerDef, Controllers};
pub use dispatch::{Dispatcher, Interaction};
pub use error::{Error, Result};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{Route, Routes};
pub use server::{Server, ServerError};
