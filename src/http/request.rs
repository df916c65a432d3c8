//! Requests: URI detection and normalisation, routing, and per-request data.

use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::debug;

use super::transport::Cookie;
use super::{Accept, Environment, Headers, Method, Response};
use crate::config::Config;
use crate::context::Parameters;
use crate::error::{Error, Result};
use crate::router::{Route, Routes};

/// Protocol of requests that are neither HTTPS nor from the command line.
pub const DEFAULT_PROTOCOL: &str = "http";

/// Client address used when the environment names none.
pub const UNKNOWN_CLIENT_IP: &str = "0.0.0.0";

static MULTIPLE_SLASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("//+").expect("slash pattern is valid"));

static DOT_PATHS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[\s./]*/").expect("dot-path pattern is valid"));

/// Collapses repeated `/` and removes dot-paths from a detected URI.
///
/// Dot-path removal deletes every `.` run that is followed, possibly after
/// more dots, slashes or whitespace, by a `/`, together with that `/`. This is
/// not RFC 3986 segment resolution: `a/../b` becomes `a/b`, and `v1./x`
/// becomes `v1x`.
///
/// ```
/// use hmvc::http::request::normalize_uri;
///
/// assert_eq!(normalize_uri("blog//view///7"), "blog/view/7");
/// assert_eq!(normalize_uri("blog/./view/../7"), "blog/view/7");
/// assert_eq!(normalize_uri("feed.xml"), "feed.xml");
/// ```
pub fn normalize_uri(uri: &str) -> String {
    let collapsed = MULTIPLE_SLASHES.replace_all(uri, "/");
    DOT_PATHS.replace_all(&collapsed, "").into_owned()
}

/// Removes the base path and then the front-controller file from `uri`.
fn strip_base(mut uri: String, config: &Config) -> String {
    let base = config.base_path();
    if let Some(rest) = uri.strip_prefix(base.as_str()) {
        uri = rest.to_owned();
    }
    if let Some(index) = config.index_file.as_deref().filter(|i| !i.is_empty()) {
        if let Some(rest) = uri.strip_prefix(index) {
            uri = rest.to_owned();
        }
    }
    uri
}

/// Finds the URI in the environment's signals, in order of preference.
fn detect_uri(env: &Environment, config: &Config) -> Result<String> {
    if let Some(path_info) = env.var("PATH_INFO").filter(|p| !p.is_empty()) {
        return Ok(path_info.to_owned());
    }

    let uri = if let Some(request_uri) = env.var("REQUEST_URI") {
        let path = if request_uri.contains("://") {
            url::Url::parse(request_uri)
                .map(|url| url.path().to_owned())
                .unwrap_or_default()
        } else {
            request_uri
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_owned()
        };
        percent_decode_str(&path).decode_utf8_lossy().into_owned()
    } else if let Some(script) = env.var("PHP_SELF") {
        script.to_owned()
    } else if let Some(redirect) = env.var("REDIRECT_URL") {
        redirect.to_owned()
    } else {
        return Err(Error::UriDetection);
    };

    Ok(strip_base(uri, config))
}

/// One HTTP (or command line) request.
///
/// A routed request knows the route that matched it, the controller
/// `directory`, `controller` and `action`, and the remaining route
/// parameters in the order the route declared them.
///
/// # Examples
///
/// ```
/// use hmvc::config::Config;
/// use hmvc::http::Request;
/// use hmvc::router::{Route, Routes};
///
/// let mut routes = Routes::new();
/// routes.set("default", Route::new("(:controller(/:action(/:id)))").unwrap()
///     .defaults([("controller", "welcome")])).unwrap();
///
/// let request = Request::factory("blog/view/7", &routes, &Config::default()).unwrap();
/// assert_eq!(request.controller(), "blog");
/// assert_eq!(request.action(), "view");
/// assert_eq!(request.param("id"), Some("7"));
/// assert_eq!(request.param("controller"), None);
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    uri: String,
    method: Method,
    protocol: String,
    external: bool,
    initial: bool,
    route: Option<Arc<Route>>,
    route_name: Option<String>,
    directory: String,
    controller: String,
    action: String,
    params: Parameters,
    headers: Headers,
    cookies: Vec<Cookie>,
    query: Parameters,
    post: Parameters,
    body: Bytes,
    is_ajax: bool,
    referrer: Option<String>,
    user_agent: Option<String>,
    client_ip: String,
    response: Option<Response>,
}

impl Request {
    /// An unrouted `GET` request for `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: Method::Get,
            protocol: DEFAULT_PROTOCOL.to_owned(),
            external: false,
            initial: false,
            route: None,
            route_name: None,
            directory: String::new(),
            controller: String::new(),
            action: String::new(),
            params: Parameters::new(),
            headers: Headers::new(),
            cookies: Vec::new(),
            query: Parameters::new(),
            post: Parameters::new(),
            body: Bytes::new(),
            is_ajax: false,
            referrer: None,
            user_agent: None,
            client_ip: UNKNOWN_CLIENT_IP.to_owned(),
            response: None,
        }
    }

    /// Creates a request for `uri`, routed against `routes`.
    ///
    /// A URI containing `://` is external unless it starts with the configured
    /// `site_url`, in which case the site prefix, base path and front
    /// controller are removed and the rest is routed. Internal URIs are trimmed
    /// of `/` and matched against the routes in registration order.
    ///
    /// # Errors
    ///
    /// [`Error::NoRouteMatched`] when no route matches.
    pub fn factory(uri: &str, routes: &Routes, config: &Config) -> Result<Self> {
        let local = if uri.contains("://") {
            let site = config
                .site_url
                .as_deref()
                .map(|s| s.trim_end_matches('/'))
                .filter(|s| !s.is_empty());
            match site.and_then(|site| uri.strip_prefix(site)) {
                Some(rest) => strip_base(rest.to_owned(), config),
                None => {
                    debug!(uri, "external request");
                    let mut request = Self::new(uri);
                    request.external = true;
                    return Ok(request);
                }
            }
        } else {
            uri.to_owned()
        };

        let uri = local.trim_matches('/');
        let found = routes
            .find(uri)
            .ok_or_else(|| Error::NoRouteMatched {
                uri: uri.to_owned(),
            })?;

        let mut params = found.params;
        let directory = params.remove("directory").unwrap_or_default();
        let controller = params.remove("controller").unwrap_or_default();
        let action = params
            .remove("action")
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| config.default_action.clone());

        let mut request = Self::new(uri);
        request.route = Some(found.route);
        request.route_name = Some(found.name);
        request.directory = directory;
        request.controller = controller;
        request.action = action;
        request.params = params;
        Ok(request)
    }

    /// Detects the initial request of an interaction from its environment.
    ///
    /// The URI comes from the first present signal of `PATH_INFO`,
    /// `REQUEST_URI` (path only, percent-decoded), `PHP_SELF` and
    /// `REDIRECT_URL`; all but `PATH_INFO` have the base path and front
    /// controller removed. Command line environments use their `uri` option.
    /// The URI is then normalised with [`normalize_uri`] and routed.
    ///
    /// # Errors
    ///
    /// [`Error::UriDetection`] when no signal is present, or
    /// [`Error::NoRouteMatched`].
    pub fn detect(env: &Environment, routes: &Routes, config: &Config) -> Result<Self> {
        let (uri, protocol) = if env.is_cli() {
            (env.cli_uri().unwrap_or_default().to_owned(), "cli")
        } else if env.is_https() {
            (detect_uri(env, config)?, "https")
        } else {
            (detect_uri(env, config)?, DEFAULT_PROTOCOL)
        };

        let uri = normalize_uri(&uri);
        debug!(uri = %uri, protocol, "detected request URI");

        let mut request = Self::factory(&uri, routes, config)?;
        let method = env.method();

        request.post = if !env.is_cli() && !matches!(method, Method::Get | Method::Post) {
            Parameters::from_urlencoded(&String::from_utf8_lossy(env.body()))
        } else {
            env.post().clone()
        };
        request.method = method;
        request.protocol = protocol.to_owned();
        request.initial = true;
        request.headers = env.headers_with(&config.comma_exempt);
        request.headers.sort_values_by_quality(&config.sort_filter);
        request.query = env.query().clone();
        request.body = env.body().clone();
        request.is_ajax = env
            .header("x-requested-with")
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"));
        request.referrer = env.header("referer").map(str::to_owned);
        request.user_agent = env.header("user-agent").map(str::to_owned);
        request.client_ip = env
            .header("x-forwarded-for")
            .or_else(|| env.header("client-ip"))
            .or_else(|| env.var("REMOTE_ADDR"))
            .unwrap_or(UNKNOWN_CLIENT_IP)
            .to_owned();

        Ok(request)
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: Parameters) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_post(mut self, post: Parameters) -> Self {
        self.post = post;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// The normalised URI, without leading or trailing `/`.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// `http`, `https` or `cli`.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Returns `true` for requests to another origin.
    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Returns `true` for the request detected from the interaction's environment.
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    pub fn route_name(&self) -> Option<&str> {
        self.route_name.as_deref()
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = action.into();
    }

    /// Route parameters other than directory, controller and action.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// A request header rendered as one line.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name)
    }

    /// Cookies sent with an external request.
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn query(&self) -> &Parameters {
        &self.query
    }

    pub fn post(&self) -> &Parameters {
        &self.post
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_ajax(&self) -> bool {
        self.is_ajax
    }

    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    /// Preferred content types from the `Accept` header.
    pub fn accept_type(&self) -> Accept {
        Accept::types(self.header("accept").as_deref())
    }

    /// Preferred languages from the `Accept-Language` header.
    pub fn accept_lang(&self) -> Accept {
        Accept::languages(self.header("accept-language").as_deref())
    }

    /// Accepted encodings from the `Accept-Encoding` header.
    pub fn accept_encoding(&self) -> Accept {
        Accept::encodings(self.header("accept-encoding").as_deref())
    }

    /// Reverse-routes the matched route.
    ///
    /// Directory, controller and action default to this request's, and
    /// parameters missing from `params` are taken from this request.
    ///
    /// # Errors
    ///
    /// [`Error::NoRouteMatched`] for a request that was not routed, or
    /// [`Error::RouteParameterMissing`].
    pub fn uri_with(&self, params: &Parameters) -> Result<String> {
        let route = self.route.as_ref().ok_or_else(|| Error::NoRouteMatched {
            uri: self.uri.clone(),
        })?;

        let mut params = params.clone();
        for (key, current) in [
            ("directory", &self.directory),
            ("controller", &self.controller),
            ("action", &self.action),
        ] {
            if !params.contains(key) {
                params.insert(key, current.as_str());
            }
        }
        params.merge_missing(&self.params);

        route.uri(&params)
    }

    /// The response, created with status `200 OK` if there is none yet.
    pub fn create_response(&mut self) -> &mut Response {
        self.response.get_or_insert_with(Response::default)
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }
}
