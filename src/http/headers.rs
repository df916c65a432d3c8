//! HTTP header map with case-insensitive name lookup.
//!
//! Header names are compared case-insensitively per [RFC 9110 §5] but keep
//! the spelling they were first stored with; on output they are title-cased
//! (`content-type` becomes `Content-Type`).
//!
//! [RFC 9110 §5]: https://www.rfc-editor.org/rfc/rfc9110#section-5

use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::sync::LazyLock;

use regex::Regex;

use super::transport::{Cookie, Transport};
use super::HeaderValue;
use crate::config::Config;

/// Headers whose values are reordered by [`Headers::sort_values_by_quality`] by default.
pub const DEFAULT_SORT_FILTER: [&str; 4] =
    ["accept", "accept-charset", "accept-encoding", "accept-language"];

/// Headers whose raw values may contain commas that do not separate values.
pub const DEFAULT_COMMA_EXEMPT: [&str; 4] = ["user-agent", "date", "expires", "last-modified"];

static HEADER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w[^\s:]*):[ ]*([^\r\n]*(?:\r\n[ \t][^\r\n]*)*)")
        .expect("header line pattern is valid")
});

/// A case-insensitive, ordered, multi-value HTTP header map.
///
/// Each header name maps to one or more parsed [`HeaderValue`]s. Raw values
/// are split on `,` unless the header is comma-exempt (see
/// [`DEFAULT_COMMA_EXEMPT`]).
///
/// # Examples
///
/// ```
/// use hmvc::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/html; charset=utf-8");
/// headers.insert("Accept", "text/html, application/xml;q=0.9");
///
/// assert_eq!(headers.get("content-type").as_deref(), Some("text/html; charset=utf-8"));
/// assert_eq!(headers.get_all("ACCEPT").len(), 2);
/// assert_eq!(headers.get_all("accept")[1].quality(), 0.9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, Vec<HeaderValue>)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header map with pre-allocated capacity for `capacity` names.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Splits a raw header value into its parsed values.
    ///
    /// The raw string is a single value when `name` is in `comma_exempt` or
    /// contains no comma; otherwise every comma-separated piece is parsed on
    /// its own. A later keyed value (`max-age=0`) replaces an earlier one with
    /// the same key.
    pub fn parse_values<S: AsRef<str>>(
        name: &str,
        raw: &str,
        comma_exempt: &[S],
    ) -> Vec<HeaderValue> {
        let exempt = comma_exempt
            .iter()
            .any(|n| n.as_ref().eq_ignore_ascii_case(name));

        if exempt || !raw.contains(',') {
            let value = if name.eq_ignore_ascii_case("user-agent") {
                HeaderValue::verbatim(raw.trim())
            } else {
                HeaderValue::parse(raw)
            };
            return vec![value];
        }

        let mut values: Vec<HeaderValue> = Vec::new();
        for piece in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let value = HeaderValue::parse(piece);
            let existing = value
                .key()
                .and_then(|key| values.iter().position(|v| v.key() == Some(key)));
            match existing {
                Some(idx) => values[idx] = value,
                None => values.push(value),
            }
        }
        values
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.inner
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Appends the parsed values of `raw` to the header `name`.
    pub fn insert(&mut self, name: impl Into<String>, raw: &str) {
        self.insert_with(name, raw, &DEFAULT_COMMA_EXEMPT);
    }

    /// Like [`insert`](Self::insert), splitting `raw` unless `name` is in `comma_exempt`.
    pub fn insert_with<S: AsRef<str>>(
        &mut self,
        name: impl Into<String>,
        raw: &str,
        comma_exempt: &[S],
    ) {
        let name = name.into();
        let values = Self::parse_values(&name, raw, comma_exempt);
        match self.position(&name) {
            Some(idx) => self.inner[idx].1.extend(values),
            None => self.inner.push((name, values)),
        }
    }

    /// Replaces the header `name` with the parsed values of `raw`.
    ///
    /// An existing header keeps its position and original spelling.
    pub fn set(&mut self, name: impl Into<String>, raw: &str) {
        let name = name.into();
        let values = Self::parse_values(&name, raw, &DEFAULT_COMMA_EXEMPT);
        self.set_values(name, values);
    }

    /// Replaces the header `name` with already-parsed values.
    pub fn set_values(&mut self, name: impl Into<String>, values: Vec<HeaderValue>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.inner[idx].1 = values,
            None => self.inner.push((name, values)),
        }
    }

    /// Returns the header rendered as a single line value (`v1, v2`), or `None`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.position(name)
            .map(|idx| join_values(&self.inner[idx].1))
    }

    /// Returns the first parsed value of the header.
    pub fn first(&self, name: &str) -> Option<&HeaderValue> {
        self.get_all(name).first()
    }

    /// Returns every parsed value of the header; empty when absent.
    pub fn get_all(&self, name: &str) -> &[HeaderValue] {
        match self.position(name) {
            Some(idx) => &self.inner[idx].1,
            None => &[],
        }
    }

    /// Removes the header. Returns `true` if it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if the map contains the header.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Returns the number of distinct header names.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over `(name, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[HeaderValue])> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Reorders multi-valued headers by descending quality.
    ///
    /// Only headers named in `filter` are touched; an empty filter means
    /// [`DEFAULT_SORT_FILTER`]. Equal qualities are ordered fully specific
    /// values first, then `type/*`, then `*/*`; anything else keeps its
    /// original relative order. Sorting is stable, so re-sorting a sorted
    /// map changes nothing.
    ///
    /// ```
    /// use hmvc::http::Headers;
    ///
    /// let mut headers = Headers::new();
    /// headers.insert("Accept", "*/*;q=0.8, text/*, application/xml;q=0.9, text/html");
    /// headers.sort_values_by_quality::<&str>(&[]);
    ///
    /// let order: Vec<_> = headers.get_all("accept").iter().map(|v| v.value()).collect();
    /// assert_eq!(order, ["text/html", "text/*", "application/xml", "*/*"]);
    /// ```
    pub fn sort_values_by_quality<S: AsRef<str>>(&mut self, filter: &[S]) -> &mut Self {
        let selected = |name: &str| {
            if filter.is_empty() {
                DEFAULT_SORT_FILTER
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case(name))
            } else {
                filter.iter().any(|f| f.as_ref().eq_ignore_ascii_case(name))
            }
        };

        for (name, values) in &mut self.inner {
            if values.len() > 1 && selected(name) {
                values.sort_by(compare_by_quality);
            }
        }

        self
    }

    /// Parses raw `Name: value` lines (folded continuations allowed) into this map.
    ///
    /// Returns the number of bytes consumed, which is always the input length.
    pub fn parse_header_string(&mut self, text: &str) -> usize {
        for caps in HEADER_LINE.captures_iter(text) {
            self.set(caps[1].to_owned(), &caps[2]);
        }
        text.len()
    }

    /// Header lines in output form (`Title-Case: v1, v2`), without line terminators.
    pub fn lines(&self) -> Vec<String> {
        self.inner
            .iter()
            .map(|(name, values)| format!("{}: {}", title_case(name), join_values(values)))
            .collect()
    }

    /// Transmits a status line plus these headers through `transport`.
    ///
    /// A `Content-Type` default is added when absent, as is the `X-Powered-By`
    /// identification header when the configuration exposes it. Cookies are
    /// handed to [`Transport::set_cookie`] rather than rendered as raw lines.
    pub fn send_headers(
        &mut self,
        status_line: String,
        cookies: &[Cookie],
        config: &Config,
        replace: bool,
        transport: &mut dyn Transport,
    ) -> io::Result<()> {
        if transport.headers_sent() {
            return Ok(());
        }

        if !self.contains("content-type") {
            self.set("content-type", &config.default_content_type());
        }
        if config.expose && !self.contains("x-powered-by") {
            self.set_values("x-powered-by", vec![HeaderValue::verbatim(config.powered_by())]);
        }

        let mut lines = Vec::with_capacity(self.len() + 1);
        lines.push(status_line);
        lines.extend(self.lines());
        transport.send_headers(&lines, replace)?;

        for cookie in cookies {
            transport.set_cookie(cookie)?;
        }
        Ok(())
    }
}

/// Upper-cases the first letter of every `-`-separated word.
pub fn title_case(name: &str) -> String {
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

fn join_values(values: &[HeaderValue]) -> String {
    values
        .iter()
        .map(HeaderValue::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// 0 = fully specific, 1 = `type/*`, 2 = `*/*`.
fn wildcard_rank(value: &HeaderValue) -> u8 {
    let primary = value.render(false);
    if primary == "*/*" {
        2
    } else if primary.ends_with("/*") {
        1
    } else {
        0
    }
}

fn compare_by_quality(a: &HeaderValue, b: &HeaderValue) -> Ordering {
    b.quality()
        .total_cmp(&a.quality())
        .then_with(|| wildcard_rank(a).cmp(&wildcard_rank(b)))
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            write!(f, "{line}\r\n")?;
        }
        f.write_str("\r\n")
    }
}
