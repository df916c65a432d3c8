//! Framework configuration.
//!
//! Every field has a default, so an empty JSON object (or [`Config::default`])
//! is a valid configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::http::headers::{DEFAULT_COMMA_EXEMPT, DEFAULT_SORT_FILTER};
use crate::router::DEFAULT_ACTION;

/// Crate version reported in the `X-Powered-By` header when `expose` is on.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Settings consulted during detection, dispatch and transmission.
///
/// # Examples
///
/// ```
/// use hmvc::config::Config;
///
/// let config = Config::from_json_str(r#"{ "base_url": "/app/", "expose": true }"#).unwrap();
/// assert_eq!(config.base_url, "/app/");
/// assert_eq!(config.index_file.as_deref(), Some("index.php"));
/// assert!(config.expose);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path (or absolute URL) the application is mounted under.
    pub base_url: String,
    /// Front-controller file name stripped from detected URIs.
    pub index_file: Option<String>,
    pub content_type: String,
    pub charset: String,
    /// Adds an `X-Powered-By` header to transmitted responses.
    pub expose: bool,
    /// Protocol written on the status line.
    pub protocol: String,
    pub default_action: String,
    /// Headers whose values are reordered by quality.
    pub sort_filter: Vec<String>,
    /// Headers whose values may contain commas without being split.
    pub comma_exempt: Vec<String>,
    /// Absolute origin of this application, e.g. `http://example.com/`.
    ///
    /// Absolute URIs under this origin are routed internally instead of being
    /// treated as external requests.
    pub site_url: Option<String>,
    /// Listen address used by [`Server`](crate::server::Server) hosts.
    pub bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "/".to_owned(),
            index_file: Some("index.php".to_owned()),
            content_type: "text/html".to_owned(),
            charset: "utf-8".to_owned(),
            expose: false,
            protocol: "HTTP/1.1".to_owned(),
            default_action: DEFAULT_ACTION.to_owned(),
            sort_filter: DEFAULT_SORT_FILTER.map(String::from).to_vec(),
            comma_exempt: DEFAULT_COMMA_EXEMPT.map(String::from).to_vec(),
            site_url: None,
            bind: "127.0.0.1:8080".to_owned(),
        }
    }
}

impl Config {
    /// Parses a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// The default `Content-Type` header value, e.g. `text/html; charset=utf-8`.
    pub fn default_content_type(&self) -> String {
        format!("{}; charset={}", self.content_type, self.charset)
    }

    /// The framework identification header value.
    pub fn powered_by(&self) -> String {
        format!("hmvc {VERSION}")
    }

    /// The path component of `base_url`, whether it was given as a path or a full URL.
    pub fn base_path(&self) -> String {
        match url::Url::parse(&self.base_url) {
            Ok(url) => url.path().to_owned(),
            Err(_) => self.base_url.clone(),
        }
    }

    /// URL of `uri` inside this application: `site_url` origin, base path,
    /// front-controller file, then the URI.
    ///
    /// ```
    /// use hmvc::config::Config;
    ///
    /// let config = Config { site_url: Some("http://example.com".into()), ..Config::default() };
    /// assert_eq!(config.site("/blog/7"), "http://example.com/index.php/blog/7");
    /// ```
    pub fn site(&self, uri: &str) -> String {
        let origin = self
            .site_url
            .as_deref()
            .and_then(|site| url::Url::parse(site).ok())
            .map(|url| url.origin().ascii_serialization())
            .unwrap_or_default();
        let mut base = self.base_path();
        if !base.ends_with('/') {
            base.push('/');
        }
        let index = match self.index_file.as_deref() {
            Some(index) if !index.is_empty() => format!("{index}/"),
            _ => String::new(),
        };
        format!("{origin}{base}{index}{}", uri.trim_start_matches('/'))
    }
}
