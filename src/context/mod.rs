//! Per-dispatch context: ambient environment, the request stack, and the
//! [`Context`] handed to controller code.
//!
//! Nothing here is global. The dispatcher threads one [`Ambient`] and one
//! [`RequestStack`] through every nested dispatch of an interaction, and binds
//! a child's values with guards that restore the parent's on every exit path.

pub mod params;
pub mod stack;

use std::convert::Infallible;
use std::mem;
use std::ops::{Deref, DerefMut};

pub use params::Parameters;
pub use stack::{Frame, RequestStack, StackGuard};

use crate::config::Config;
use crate::dispatch::{Dispatcher, Scope};
use crate::error::{Error, HaltReason, Result};
use crate::http::{Environment, FileSource, Request, Response, SendFileOptions, StatusCode};

/// Request-scoped environment observed by code that does not receive the
/// request explicitly: query data, post data and CGI-style server variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ambient {
    pub query: Parameters,
    pub post: Parameters,
    pub server: Parameters,
}

impl Ambient {
    /// The environment of the initial request, taken from the host.
    pub fn from_environment(env: &Environment) -> Self {
        Self {
            query: env.query().clone(),
            post: env.post().clone(),
            server: env.server().clone(),
        }
    }

    /// The environment a nested `request` runs under, layered over `self`.
    ///
    /// Server variables describing the request replace the parent's; every
    /// other parent variable is carried over.
    pub fn for_request(&self, request: &Request, config: &Config) -> Self {
        let uri = request.uri();
        let index = config.index_file.as_deref().unwrap_or_default();
        let query_string = request.query().to_urlencoded();
        let script = format!("/{index}//{uri}");

        let mut server = Parameters::new();
        server.insert("QUERY_STRING", query_string);
        server.insert("REQUEST_METHOD", request.method().as_str());
        server.insert("SCRIPT_NAME", script.as_str());
        server.insert("REQUEST_URI", format!("/{uri}"));
        server.insert("DOCUMENT_URI", script);
        server.insert("PHP_SELF", format!("/{index}/{uri}"));
        for (name, values) in request.headers().iter() {
            let joined = values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            server.insert(server_header_key(name), joined);
        }
        server.merge_missing(&self.server);

        Self {
            query: request.query().clone(),
            post: request.post().clone(),
            server,
        }
    }

    /// HTTP request headers recorded as `HTTP_*` server variables, as `(name, value)`.
    pub fn http_headers(&self) -> impl Iterator<Item = (String, &str)> {
        self.server.iter().filter_map(|(key, value)| {
            let name = key.strip_prefix("HTTP_")?;
            Some((name.replace('_', "-").to_ascii_lowercase(), value))
        })
    }

    /// Replaces the environment with `next` until the guard is dropped.
    pub fn bind(&mut self, next: Ambient) -> AmbientGuard<'_> {
        let previous = mem::replace(self, next);
        AmbientGuard {
            ambient: self,
            previous: Some(previous),
        }
    }

    /// A guard that leaves the environment as it is.
    pub fn keep(&mut self) -> AmbientGuard<'_> {
        AmbientGuard {
            ambient: self,
            previous: None,
        }
    }
}

/// `accept-language` → `HTTP_ACCEPT_LANGUAGE`.
pub fn server_header_key(name: &str) -> String {
    format!("HTTP_{}", name.replace('-', "_").to_ascii_uppercase())
}

/// Restores the environment that was replaced by [`Ambient::bind`].
#[derive(Debug)]
pub struct AmbientGuard<'a> {
    ambient: &'a mut Ambient,
    previous: Option<Ambient>,
}

impl Deref for AmbientGuard<'_> {
    type Target = Ambient;

    fn deref(&self) -> &Ambient {
        self.ambient
    }
}

impl DerefMut for AmbientGuard<'_> {
    fn deref_mut(&mut self) -> &mut Ambient {
        self.ambient
    }
}

impl Drop for AmbientGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.ambient = previous;
        }
    }
}

/// What a controller sees while one of its actions runs.
///
/// Gives access to the executing request and its response, the ambient
/// environment, and the dispatcher for nested (HMVC) requests.
pub struct Context<'a> {
    request: &'a mut Request,
    response: &'a mut Response,
    scope: Scope<'a>,
    dispatcher: &'a Dispatcher,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        request: &'a mut Request,
        response: &'a mut Response,
        scope: Scope<'a>,
        dispatcher: &'a Dispatcher,
    ) -> Self {
        Self {
            request,
            response,
            scope,
            dispatcher,
        }
    }

    pub fn request(&self) -> &Request {
        self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        self.request
    }

    pub fn response(&self) -> &Response {
        self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        self.response
    }

    /// A route parameter of the executing request.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.request.param(key)
    }

    pub fn ambient(&self) -> &Ambient {
        self.scope.ambient
    }

    pub fn stack(&self) -> &RequestStack {
        self.scope.stack
    }

    pub fn config(&self) -> &Config {
        self.dispatcher.config()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher
    }

    /// Builds a request for `uri` against the dispatcher's routes.
    pub fn factory(&self, uri: &str) -> Result<Request> {
        self.dispatcher.factory(uri)
    }

    /// Executes `request` nested inside the current one.
    ///
    /// The current request and the ambient environment are restored before
    /// this returns, whether the child succeeded or not.
    pub fn execute(&mut self, request: &mut Request) -> Result<Response> {
        self.dispatcher.run(request, self.scope.reborrow())
    }

    /// Routes `uri`, executes it nested, and returns the child's body as text.
    pub fn fetch(&mut self, uri: &str) -> Result<String> {
        let mut child = self.factory(uri)?;
        let response = self.execute(&mut child)?;
        Ok(response.body_text().into_owned())
    }

    /// Validates the client's cached copy against `etag` (or the body's own).
    ///
    /// On a match the `304` headers are transmitted and the rest of the
    /// action is skipped by returning [`Error::Halt`]; propagate it with `?`.
    pub fn check_cache(&mut self, etag: Option<&str>) -> Result<()> {
        match self.response.check_cache(etag, self.request) {
            Ok(_) => Ok(()),
            Err(Error::Halt(mut halt)) => {
                halt.response
                    .send_headers(self.dispatcher.config(), &mut *self.scope.transport)?;
                Err(Error::Halt(halt))
            }
            Err(e) => Err(e),
        }
    }

    /// Transmits a redirect to `url` and ends the interaction.
    pub fn redirect(&mut self, url: &str, status: StatusCode) -> Result<Infallible> {
        let mut response = Response::redirect(url, status, self.dispatcher.config());
        response.send_headers(self.dispatcher.config(), &mut *self.scope.transport)?;
        Err(response.halt(HaltReason::Redirect))
    }

    /// Streams a file download to the client and ends the interaction.
    pub fn send_file(
        &mut self,
        source: FileSource,
        download: Option<&str>,
        options: SendFileOptions,
    ) -> Result<Infallible> {
        self.response.send_file(
            source,
            download,
            options,
            self.dispatcher.config(),
            &mut *self.scope.transport,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    fn parent() -> Ambient {
        Ambient {
            query: [("q", "root")].into_iter().collect(),
            post: Parameters::new(),
            server: [
                ("REQUEST_URI", "/index.php/home"),
                ("REMOTE_ADDR", "10.0.0.1"),
                ("HTTP_ACCEPT_LANGUAGE", "fr"),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn child_environment_overlays_parent() {
        let request = Request::new("blog/view")
            .with_method(Method::Post)
            .with_query([("page", "2")].into_iter().collect())
            .with_header("X-Trace", "abc");
        let child = parent().for_request(&request, &Config::default());

        assert_eq!(child.query.get("page"), Some("2"));
        assert_eq!(child.query.get("q"), None);
        assert_eq!(child.server.get("REQUEST_URI"), Some("/blog/view"));
        assert_eq!(child.server.get("PHP_SELF"), Some("/index.php/blog/view"));
        assert_eq!(child.server.get("SCRIPT_NAME"), Some("/index.php//blog/view"));
        assert_eq!(child.server.get("REQUEST_METHOD"), Some("POST"));
        assert_eq!(child.server.get("QUERY_STRING"), Some("page=2"));
        assert_eq!(child.server.get("HTTP_X_TRACE"), Some("abc"));
        assert_eq!(child.server.get("REMOTE_ADDR"), Some("10.0.0.1"));
    }

    #[test]
    fn http_headers_from_server_vars() {
        let ambient = parent();
        let headers: Vec<_> = ambient.http_headers().collect();
        assert_eq!(headers, [("accept-language".to_owned(), "fr")]);
    }

    #[test]
    fn bind_restores_on_drop() {
        let mut ambient = parent();
        {
            let guard = ambient.bind(Ambient::default());
            assert!(guard.server.is_empty());
        }
        assert_eq!(ambient, parent());

        {
            let mut guard = ambient.keep();
            guard.query.insert("kept", "1");
        }
        assert_eq!(ambient.query.get("kept"), Some("1"));
    }

    fn fail_while_bound(ambient: &mut Ambient) {
        let _guard = ambient.bind(Ambient::default());
        panic!("child failed");
    }

    #[test]
    fn bind_restores_during_unwind() {
        let mut ambient = parent();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            fail_while_bound(&mut ambient)
        }));
        assert!(result.is_err());
        assert_eq!(ambient, parent());
    }

    #[test]
    fn header_keys() {
        assert_eq!(server_header_key("if-none-match"), "HTTP_IF_NONE_MATCH");
    }
}
