//! Request execution.
//!
//! [`Dispatcher`] owns the process-wide tables (configuration, routes,
//! controllers) and runs requests through them. Everything that changes while
//! an interaction is being served lives in an [`Interaction`]: the initial
//! request, the ambient environment, the request stack and the transport.
//!
//! One dispatch of a request goes through:
//!
//! 1. external requests are handed to the [`ExternalClient`], memoised by
//!    [`fingerprint`];
//! 2. a cached response short-circuits everything else;
//! 3. the controller and action are resolved, failing with `404`;
//! 4. the request is pushed on the [`RequestStack`], and a nested request
//!    binds its own [`Ambient`] environment;
//! 5. `before`, the action and `after` run; a failure marks the response
//!    `500` (halts excepted);
//! 6. guards restore the stack and environment, whatever the outcome.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{ResponseCache, fingerprint};
use crate::config::Config;
use crate::context::{Ambient, Context, Frame, RequestStack};
use crate::controller::{
    ABSTRACT_CONTROLLER, ControllerEntry, Controllers, MISSING_CONTROLLER, controller_id,
};
use crate::error::{Error, Halt, Result};
use crate::http::{Environment, Request, Response, StatusCode, Transport};
use crate::router::Routes;

/// Performs requests to other origins.
pub trait ExternalClient: Send + Sync {
    fn execute(&self, request: &Request) -> Result<Response>;
}

/// The mutable state a dispatch runs against, borrowed from an [`Interaction`].
pub struct Scope<'a> {
    pub ambient: &'a mut Ambient,
    pub stack: &'a mut RequestStack,
    pub transport: &'a mut dyn Transport,
}

impl Scope<'_> {
    /// A shorter-lived scope over the same state, for a nested dispatch.
    pub fn reborrow(&mut self) -> Scope<'_> {
        Scope {
            ambient: &mut *self.ambient,
            stack: &mut *self.stack,
            transport: &mut *self.transport,
        }
    }
}

/// State of one client interaction: the initial request and everything
/// nested dispatches share.
pub struct Interaction<'t> {
    initial: OnceCell<Request>,
    ambient: Ambient,
    stack: RequestStack,
    transport: &'t mut dyn Transport,
}

impl<'t> Interaction<'t> {
    pub fn new(transport: &'t mut dyn Transport) -> Self {
        Self {
            initial: OnceCell::new(),
            ambient: Ambient::default(),
            stack: RequestStack::new(),
            transport,
        }
    }

    /// Starts from the host's environment instead of an empty one.
    #[must_use]
    pub fn with_ambient(mut self, ambient: Ambient) -> Self {
        self.ambient = ambient;
        self
    }

    /// Records the initial request of this interaction.
    ///
    /// # Errors
    ///
    /// [`Error::InitialAlreadySet`] when called a second time.
    pub fn set_initial(&self, request: &Request) -> Result<()> {
        self.initial
            .set(request.clone())
            .map_err(|_| Error::InitialAlreadySet)
    }

    /// The initial request as it was before dispatch.
    pub fn initial(&self) -> Option<&Request> {
        self.initial.get()
    }

    pub fn ambient(&self) -> &Ambient {
        &self.ambient
    }

    pub fn stack(&self) -> &RequestStack {
        &self.stack
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        &mut *self.transport
    }

    pub fn scope(&mut self) -> Scope<'_> {
        Scope {
            ambient: &mut self.ambient,
            stack: &mut self.stack,
            transport: &mut *self.transport,
        }
    }
}

/// Routes, controllers and configuration, plus the collaborators consulted
/// while executing requests.
///
/// # Examples
///
/// ```
/// use hmvc::config::Config;
/// use hmvc::controller::{Controller, ControllerDef, Controllers};
/// use hmvc::dispatch::Dispatcher;
/// use hmvc::http::{BufferTransport, Environment};
/// use hmvc::router::{Route, Routes};
///
/// struct Welcome;
/// impl Controller for Welcome {}
///
/// let mut routes = Routes::new();
/// routes.set("default", Route::new("(:controller(/:action))").unwrap()
///     .defaults([("controller", "welcome")])).unwrap();
///
/// let mut controllers = Controllers::new();
/// controllers.register("welcome", ControllerDef::new(|| Welcome).action("index", |_, cx, _| {
///     cx.response_mut().write("hello, world!");
///     Ok(())
/// }));
///
/// let dispatcher = Dispatcher::new(Config::default(), routes, controllers);
/// let mut out = BufferTransport::new();
/// let env = Environment::new().with_var("PATH_INFO", "/");
///
/// let status = dispatcher.serve(&env, &mut out).unwrap();
/// assert_eq!(status.as_u16(), 200);
/// assert_eq!(out.body(), b"hello, world!");
/// ```
pub struct Dispatcher {
    config: Config,
    routes: Routes,
    controllers: Controllers,
    cache: Option<Arc<dyn ResponseCache>>,
    external: Option<Arc<dyn ExternalClient>>,
    memo: Mutex<HashMap<String, Response>>,
}

impl Dispatcher {
    pub fn new(config: Config, routes: Routes, controllers: Controllers) -> Self {
        Self {
            config,
            routes,
            controllers,
            cache: None,
            external: None,
            memo: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_external(mut self, client: Arc<dyn ExternalClient>) -> Self {
        self.external = Some(client);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    pub fn controllers(&self) -> &Controllers {
        &self.controllers
    }

    /// Creates a routed request for `uri`. See [`Request::factory`].
    pub fn factory(&self, uri: &str) -> Result<Request> {
        Request::factory(uri, &self.routes, &self.config)
    }

    /// Detects the initial request from `env`. See [`Request::detect`].
    pub fn detect(&self, env: &Environment) -> Result<Request> {
        Request::detect(env, &self.routes, &self.config)
    }

    /// Executes `request` within `interaction` and returns its response.
    ///
    /// The response is also stored on the request. On failure the request
    /// carries the response as it was when the failure happened: `404` for
    /// unresolved controllers and actions, `500` for failing actions.
    pub fn execute(&self, request: &mut Request, interaction: &mut Interaction<'_>) -> Result<Response> {
        self.run(request, interaction.scope())
    }

    pub(crate) fn run(&self, request: &mut Request, scope: Scope<'_>) -> Result<Response> {
        if request.is_external() {
            return self.execute_external(request);
        }

        if let Some(cache) = &self.cache {
            if let Some(response) = cache.fetch(request) {
                debug!(uri = request.uri(), "serving cached response");
                request.set_response(response.clone());
                return Ok(response);
            }
        }

        let id = controller_id(request.directory(), request.controller());
        let def = match self.controllers.get(&id) {
            Some(ControllerEntry::Concrete(def)) => Arc::clone(def),
            Some(ControllerEntry::Abstract) => {
                return Err(Error::ControllerNotFound {
                    controller: id,
                    reason: ABSTRACT_CONTROLLER,
                });
            }
            None => {
                request.create_response().set_status(StatusCode::NotFound);
                return Err(Error::ControllerNotFound {
                    controller: id,
                    reason: MISSING_CONTROLLER,
                });
            }
        };

        if let Some(action) = def.rest_action(request.method()) {
            request.set_action(action);
        }
        let action = request.action().to_owned();
        if !def.has_action(&action) {
            request.create_response().set_status(StatusCode::NotFound);
            return Err(Error::ActionNotFound {
                controller: id,
                action,
            });
        }

        let Scope {
            ambient,
            stack,
            transport,
        } = scope;

        let frame = Frame {
            uri: request.uri().to_owned(),
            method: request.method().clone(),
            initial: request.is_initial(),
        };
        let mut stack = stack.push(frame);
        let depth = stack.depth();
        debug!(uri = request.uri(), controller = %id, action = %action, depth, "dispatching");

        let mut ambient = if request.is_initial() {
            ambient.keep()
        } else {
            let headers = request.headers_mut();
            for (name, value) in ambient.http_headers() {
                if !headers.contains(&name) {
                    headers.insert_with(name, value, &self.config.comma_exempt);
                }
            }
            headers.sort_values_by_quality(&self.config.sort_filter);
            let next = ambient.for_request(request, &self.config);
            ambient.bind(next)
        };

        let params = request.params().values();
        let mut response = request.take_response().unwrap_or_default();
        let outcome = {
            let scope = Scope {
                ambient: &mut *ambient,
                stack: &mut *stack,
                transport: &mut *transport,
            };
            let mut cx = Context::new(request, &mut response, scope, self);
            def.invoke(&id, &action, &mut cx, &params)
        };

        drop(ambient);
        drop(stack);
        debug!(depth, "request popped");

        if let Err(e) = outcome {
            if let Error::Halt(halt) = &e {
                info!(uri = request.uri(), reason = %halt.reason, "request halted");
            } else {
                error!(uri = request.uri(), controller = %id, action = %action, error = %e, "action failed");
                response.set_status(StatusCode::InternalServerError);
            }
            request.set_response(response);
            return Err(e);
        }

        if request.is_initial() && !response.headers().contains("content-type") {
            response.set_header("Content-Type", &self.config.default_content_type());
        }

        if let Some(cache) = &self.cache {
            cache.store(request, &response);
        }

        request.set_response(response.clone());
        Ok(response)
    }

    fn execute_external(&self, request: &mut Request) -> Result<Response> {
        let key = fingerprint(request);
        if let Some(response) = self.memo.lock().get(&key).cloned() {
            debug!(uri = request.uri(), "external response memoised");
            request.set_response(response.clone());
            return Ok(response);
        }

        let client = self
            .external
            .as_ref()
            .ok_or_else(|| Error::ExternalUnavailable {
                uri: request.uri().to_owned(),
            })?;

        info!(uri = request.uri(), method = %request.method(), "executing external request");
        let response = client.execute(request)?;
        self.memo.lock().insert(key, response.clone());
        request.set_response(response.clone());
        Ok(response)
    }

    /// Serves one interaction end to end: detects the initial request from
    /// `env`, executes it, and transmits the outcome through `transport`.
    ///
    /// This is the outermost error boundary. Failures are rendered with the
    /// status dispatch put on the initial request's response, or with
    /// [`Error::status`] when it has none; halted requests transmit their carried
    /// response. Nothing is transmitted once headers were already sent.
    ///
    /// # Errors
    ///
    /// Only transmission failures are returned.
    pub fn serve(&self, env: &Environment, transport: &mut dyn Transport) -> Result<StatusCode> {
        let mut interaction = Interaction::new(transport).with_ambient(Ambient::from_environment(env));

        let mut initial = None;
        let outcome = self.detect(env).and_then(|request| {
            interaction.set_initial(&request)?;
            let request = initial.insert(request);
            self.execute(request, &mut interaction)
        });

        let mut response = match outcome {
            Ok(response) => response,
            Err(Error::Halt(halt)) => {
                let Halt { mut response, .. } = *halt;
                if !interaction.transport().headers_sent() {
                    response.send(&self.config, interaction.transport())?;
                }
                return Ok(response.status());
            }
            Err(e) => {
                // A failed request keeps the status dispatch gave its response.
                let status = initial
                    .as_ref()
                    .and_then(Request::response)
                    .map_or_else(|| e.status(), Response::status);
                if status == StatusCode::NotFound {
                    warn!(error = %e, "request not found");
                } else {
                    error!(error = %e, "request failed");
                }
                Response::new(status).body(status.canonical_reason())
            }
        };

        if !interaction.transport().headers_sent() {
            response.send(&self.config, interaction.transport())?;
        }
        Ok(response.status())
    }
}
