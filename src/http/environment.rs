//! Environment signals a request is detected from.
//!
//! An [`Environment`] is a set of CGI-style server variables (`PATH_INFO`,
//! `REQUEST_URI`, `HTTP_*` headers, ...) plus query data, post data and the
//! raw body. Hosts build one per interaction: the [`server`](crate::server)
//! parses it from HTTP/1.1 bytes with [`Environment::parse_http`], command
//! line hosts convert [`CliOptions`].

use std::net::SocketAddr;

use bytes::Bytes;
use thiserror::Error;

use super::headers::DEFAULT_COMMA_EXEMPT;
use super::{Headers, Method};
use crate::context::{Parameters, server_header_key};

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("declared body of {length} bytes is too large")]
    PayloadTooLarge { length: usize },
}

/// Server variables and payload of one interaction.
///
/// # Examples
///
/// ```
/// use hmvc::http::Environment;
///
/// let env = Environment::from_server_vars([
///     ("REQUEST_METHOD", "post"),
///     ("REQUEST_URI", "/blog/view/7?draft=1"),
///     ("QUERY_STRING", "draft=1"),
///     ("HTTP_USER_AGENT", "curl/8.0"),
/// ]);
///
/// assert_eq!(env.method().as_str(), "POST");
/// assert_eq!(env.query().get("draft"), Some("1"));
/// assert_eq!(env.header("user-agent"), Some("curl/8.0"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Environment {
    server: Parameters,
    query: Parameters,
    post: Parameters,
    body: Bytes,
    cli: bool,
    cli_uri: Option<String>,
}

impl Environment {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an environment from server variables; `QUERY_STRING` is parsed into query data.
    pub fn from_server_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let server: Parameters = vars.into_iter().collect();
        let query = server
            .get("QUERY_STRING")
            .map(Parameters::from_urlencoded)
            .unwrap_or_default();
        Self {
            server,
            query,
            ..Self::default()
        }
    }

    /// Parses an HTTP/1.1 request head from `buf`.
    ///
    /// Returns the environment and the byte offset at which the body begins.
    /// Up to `Content-Length` bytes already present in `buf` become the body.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] when more data is needed to complete the head.
    /// - [`RequestError::Parse`] when the data is malformed.
    /// - [`RequestError::MissingField`] when method, path or version is absent.
    /// - [`RequestError::PayloadTooLarge`] when head plus declared body
    ///   exceeds `usize`.
    pub fn parse_http(buf: &[u8], peer: Option<SocketAddr>) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?;
        let path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut server = Parameters::new();
        server.insert("REQUEST_METHOD", method);
        server.insert("REQUEST_URI", path);
        server.insert("SERVER_PROTOCOL", format!("HTTP/1.{version}"));
        if let Some((_, query)) = path.split_once('?') {
            server.insert("QUERY_STRING", query);
        }
        if let Some(peer) = peer {
            server.insert("REMOTE_ADDR", peer.ip().to_string());
        }
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                server.insert(server_header_key(header.name), value);
            }
        }

        let mut env = Self::from_server_vars(server.iter());
        let end = match env.content_length() {
            Some(length) => body_offset
                .checked_add(length)
                .ok_or(RequestError::PayloadTooLarge { length })?
                .min(buf.len()),
            None => buf.len(),
        };
        env.body = Bytes::copy_from_slice(&buf[body_offset..end]);

        Ok((env, body_offset))
    }

    /// Sets one server variable.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.server.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
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

    pub fn var(&self, name: &str) -> Option<&str> {
        self.server.get(name)
    }

    pub fn server(&self) -> &Parameters {
        &self.server
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

    /// Returns `true` when the interaction comes from the command line.
    pub fn is_cli(&self) -> bool {
        self.cli
    }

    /// URI given on the command line, bypassing detection.
    pub fn cli_uri(&self) -> Option<&str> {
        self.cli_uri.as_deref()
    }

    /// An HTTP request header, looked up through its `HTTP_*` variable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.server.get(&server_header_key(name))
    }

    /// All `HTTP_*` variables as request headers.
    pub fn headers(&self) -> Headers {
        self.headers_with(&DEFAULT_COMMA_EXEMPT)
    }

    /// All `HTTP_*` variables as request headers, leaving values of the
    /// `comma_exempt` headers unsplit.
    pub fn headers_with<S: AsRef<str>>(&self, comma_exempt: &[S]) -> Headers {
        let mut headers = Headers::new();
        for (key, value) in self.server.iter() {
            if let Some(name) = key.strip_prefix("HTTP_") {
                let name = name.replace('_', "-").to_ascii_lowercase();
                headers.insert_with(name, value, comma_exempt);
            }
        }
        headers
    }

    /// Request method, `GET` when none was given.
    pub fn method(&self) -> Method {
        self.var("REQUEST_METHOD")
            .map_or(Method::Get, Method::from_name)
    }

    /// Returns `true` when the `HTTPS` variable holds a truthy value.
    pub fn is_https(&self) -> bool {
        self.var("HTTPS").is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "on" | "yes"
            )
        })
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")?.trim().parse().ok()
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.var("SERVER_PROTOCOL") == Some("HTTP/1.1"),
        }
    }
}

/// Command line request options: `uri`, `method`, `get` and `post`.
///
/// `get` and `post` are form-encoded strings such as `a=1&b=2`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub uri: Option<String>,
    pub method: Option<String>,
    pub get: Option<String>,
    pub post: Option<String>,
}

impl CliOptions {
    /// Converts the options into an environment detected with the `cli` protocol.
    pub fn into_environment(self) -> Environment {
        let mut env = Environment {
            cli: true,
            cli_uri: self.uri,
            ..Environment::default()
        };
        if let Some(method) = self.method {
            env.server
                .insert("REQUEST_METHOD", method.trim().to_ascii_uppercase());
        }
        if let Some(get) = self.get {
            env.query = Parameters::from_urlencoded(&get);
        }
        if let Some(post) = self.post {
            env.post = Parameters::from_urlencoded(&post);
        }
        env
    }
}
