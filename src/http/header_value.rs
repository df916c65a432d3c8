//! A single parsed HTTP header value: primary token plus `;`-separated properties.

use std::fmt;

/// One value of an HTTP header.
///
/// A raw value such as `application/xml;q=0.9` is split on `;`. The first part
/// is the primary token, stored as `key=value` when it contains `=` and as a
/// bare `value` otherwise. Every following part becomes a property, either
/// `name=value` or a bare `name`.
///
/// # Examples
///
/// ```
/// use hmvc::http::HeaderValue;
///
/// let value = HeaderValue::parse("application/xml;q=0.9");
/// assert_eq!(value.key(), None);
/// assert_eq!(value.value(), "application/xml");
/// assert_eq!(value.property("q"), Some("0.9"));
/// assert_eq!(value.quality(), 0.9);
///
/// let directive = HeaderValue::parse("max-age=200; public");
/// assert_eq!(directive.key(), Some("max-age"));
/// assert_eq!(directive.value(), "200");
/// assert!(directive.has_property("public"));
/// assert_eq!(directive.to_string(), "max-age=200; public");
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderValue {
    key: Option<String>,
    value: String,
    properties: Vec<(String, Option<String>)>,
}

impl HeaderValue {
    /// Quality assumed when no `q` property is present.
    pub const DEFAULT_QUALITY: f32 = 1.0;

    /// Parses a raw header value.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';').map(str::trim);
        let primary = parts.next().unwrap_or_default();

        let (key, value) = match primary.split_once('=') {
            Some((k, v)) => (Some(k.trim().to_owned()), v.trim().to_owned()),
            None => (None, primary.to_owned()),
        };

        let properties = parts
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((k, v)) => (k.trim().to_owned(), Some(v.trim().to_owned())),
                None => (part.to_owned(), None),
            })
            .collect();

        Self {
            key,
            value,
            properties,
        }
    }

    /// Wraps a raw value without interpreting `;` or `=`, as done for `User-Agent`.
    pub fn verbatim(raw: impl Into<String>) -> Self {
        Self {
            key: None,
            value: raw.into(),
            properties: Vec::new(),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Properties in the order they appeared.
    pub fn properties(&self) -> &[(String, Option<String>)] {
        &self.properties
    }

    /// Returns the value of a `name=value` property.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    /// Returns `true` if a property (bare or valued) with this name exists.
    pub fn has_property(&self, name: &str) -> bool {
        self.properties
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Sets or replaces a property, keeping its position when it already exists.
    pub fn set_property(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self
            .properties
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.properties.push((name, value)),
        }
    }

    /// The `q` property as a float, or [`DEFAULT_QUALITY`](Self::DEFAULT_QUALITY).
    ///
    /// The result is always within `0.0..=1.0`; `NaN` and infinities count as `0.0`.
    pub fn quality(&self) -> f32 {
        self.property("q")
            .and_then(|q| q.parse().ok())
            .map_or(Self::DEFAULT_QUALITY, clamp_quality)
    }

    /// Renders the value, optionally dropping the properties.
    pub fn render(&self, with_properties: bool) -> String {
        let mut out = match &self.key {
            Some(key) => format!("{key}={}", self.value),
            None => self.value.clone(),
        };

        if with_properties {
            for (name, value) in &self.properties {
                out.push_str("; ");
                out.push_str(name);
                if let Some(value) = value {
                    out.push('=');
                    out.push_str(value);
                }
            }
        }

        out
    }
}

/// Bounds a parsed quality to `0.0..=1.0`, mapping non-finite values to `0.0`.
pub fn clamp_quality(q: f32) -> f32 {
    if q.is_finite() { q.clamp(0.0, 1.0) } else { 0.0 }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

impl From<&str> for HeaderValue {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}
