//! A single compiled route pattern.

use regex::Regex;

use crate::context::Parameters;
use crate::error::{Error, Result};

/// Constraint used for placeholders that do not declare their own.
pub const DEFAULT_CONSTRAINT: &str = r"[^/.,;?\n]+";

/// Default for [`Config::default_action`](crate::config::Config::default_action): the action of a route that captures none.
pub const DEFAULT_ACTION: &str = "index";

// One element of a parsed pattern.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
    Optional(Vec<Segment>),
}

/// A URI pattern compiled into an anchored matcher.
///
/// Pattern syntax:
///
/// | Syntax     | Meaning                                              |
/// |------------|------------------------------------------------------|
/// | `:name`    | named placeholder, `[^/.,;?\n]+` unless constrained  |
/// | `( … )`    | optional group; may nest                             |
/// | anything else | literal text                                      |
///
/// Leading and trailing `/` are ignored, matching how request URIs are
/// trimmed before routing.
///
/// # Examples
///
/// ```
/// use hmvc::router::Route;
///
/// let route = Route::new("(:controller(/:action(/:id)))")
///     .unwrap()
///     .defaults([("controller", "welcome"), ("action", "index")]);
///
/// let params = route.matches("blog/view/7").unwrap();
/// assert_eq!(params.get("controller"), Some("blog"));
/// assert_eq!(params.get("id"), Some("7"));
///
/// let params = route.matches("").unwrap();
/// assert_eq!(params.get("controller"), Some("welcome"));
///
/// assert_eq!(route.uri(&params).unwrap(), "");
/// ```
#[derive(Debug, Clone)]
pub struct Route {
    pattern: String,
    segments: Vec<Segment>,
    keys: Vec<String>,
    regex: Regex,
    defaults: Parameters,
}

impl Route {
    /// Compiles `pattern` with default placeholder constraints.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRoute`] for unbalanced groups or a pattern that does
    /// not compile (e.g. a placeholder name used twice).
    pub fn new(pattern: &str) -> Result<Self> {
        Self::with_constraints(pattern, &[])
    }

    /// Compiles `pattern`, using the given regular expressions for the named placeholders.
    ///
    /// ```
    /// use hmvc::router::Route;
    ///
    /// let route = Route::with_constraints("(:path/):file(.:format)", &[("path", ".*")]).unwrap();
    /// let params = route.matches("templates/awesome.haml").unwrap();
    /// assert_eq!(params.get("path"), Some("templates"));
    /// assert_eq!(params.get("file"), Some("awesome"));
    /// assert_eq!(params.get("format"), Some("haml"));
    /// ```
    pub fn with_constraints(pattern: &str, constraints: &[(&str, &str)]) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidRoute {
            pattern: pattern.to_owned(),
            reason,
        };

        let segments = parse(pattern.trim_matches('/')).map_err(|r| invalid(r.to_owned()))?;

        let mut body = String::with_capacity(pattern.len() * 2);
        let mut keys = Vec::new();
        compile(&segments, constraints, &mut body, &mut keys);

        let regex = Regex::new(&format!("^{body}$")).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            pattern: pattern.to_owned(),
            segments,
            keys,
            regex,
            defaults: Parameters::new(),
        })
    }

    /// Sets the values used for placeholders absent from a matched URI.
    #[must_use]
    pub fn defaults<K, V>(mut self, defaults: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.defaults = defaults.into_iter().collect();
        self
    }

    /// The pattern as written.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Placeholder names in declaration order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn default_values(&self) -> &Parameters {
        &self.defaults
    }

    /// Matches a trimmed, normalized URI against the whole pattern.
    ///
    /// Captured placeholders come first in declaration order, followed by any
    /// defaults that were not captured. A placeholder inside an optional group
    /// that did not take part in the match is treated as absent.
    pub fn matches(&self, uri: &str) -> Option<Parameters> {
        let caps = self.regex.captures(uri)?;

        let mut params = Parameters::new();
        for key in &self.keys {
            if let Some(m) = caps.name(key) {
                params.insert(key.as_str(), m.as_str());
            }
        }
        params.merge_missing(&self.defaults);

        Some(params)
    }

    /// Builds the shortest URI this route would match for `params`.
    ///
    /// Missing values are taken from the defaults. An optional group is only
    /// written when it holds a value that differs from its default (or has
    /// none), or a nested group that is written.
    ///
    /// # Errors
    ///
    /// [`Error::RouteParameterMissing`] when a placeholder outside any
    /// optional group has neither a value nor a default.
    ///
    /// ```
    /// use hmvc::router::Route;
    /// use hmvc::context::Parameters;
    ///
    /// let route = Route::new("(:controller(/:action(/:id)))")
    ///     .unwrap()
    ///     .defaults([("controller", "welcome"), ("action", "index")]);
    ///
    /// let params: Parameters = [("controller", "blog"), ("id", "7")].into_iter().collect();
    /// assert_eq!(route.uri(&params).unwrap(), "blog/index/7");
    ///
    /// let params: Parameters = [("controller", "blog")].into_iter().collect();
    /// assert_eq!(route.uri(&params).unwrap(), "blog");
    /// ```
    pub fn uri(&self, params: &Parameters) -> Result<String> {
        let (raw, _) = self
            .render(&self.segments, params, true)?
            .unwrap_or_default();

        let mut uri = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c == '/' && uri.ends_with('/') {
                continue;
            }
            uri.push(c);
        }
        Ok(uri.trim_end_matches('/').to_owned())
    }

    // Renders `segments`; `Ok(None)` drops an optional group with a missing value.
    fn render(
        &self,
        segments: &[Segment],
        params: &Parameters,
        required: bool,
    ) -> Result<Option<(String, bool)>> {
        let mut out = String::new();
        let mut provided = false;

        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param(name) => {
                    let supplied = params.get(name);
                    let default = self.defaults.get(name);
                    match supplied.or(default) {
                        Some(value) => {
                            if supplied.is_some() && supplied != default {
                                provided = true;
                            }
                            out.push_str(value);
                        }
                        None if required => {
                            return Err(Error::RouteParameterMissing {
                                param: name.clone(),
                            });
                        }
                        None => return Ok(None),
                    }
                }
                Segment::Optional(inner) => {
                    if let Some((text, true)) = self.render(inner, params, false)? {
                        out.push_str(&text);
                        provided = true;
                    }
                }
            }
        }

        Ok(Some((out, provided)))
    }
}

fn flush(literal: &mut String, stack: &mut [Vec<Segment>]) {
    if literal.is_empty() {
        return;
    }
    if let Some(top) = stack.last_mut() {
        top.push(Segment::Literal(std::mem::take(literal)));
    }
}

fn parse(pattern: &str) -> std::result::Result<Vec<Segment>, &'static str> {
    let mut stack: Vec<Vec<Segment>> = vec![Vec::new()];
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' => {
                flush(&mut literal, &mut stack);
                stack.push(Vec::new());
            }
            ')' => {
                flush(&mut literal, &mut stack);
                let group = stack.pop().unwrap_or_default();
                let Some(parent) = stack.last_mut() else {
                    return Err("unbalanced ')'");
                };
                parent.push(Segment::Optional(group));
            }
            ':' => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if !(n.is_ascii_alphanumeric() || n == '_') {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                if name.is_empty() {
                    literal.push(':');
                } else {
                    flush(&mut literal, &mut stack);
                    if let Some(top) = stack.last_mut() {
                        top.push(Segment::Param(name));
                    }
                }
            }
            other => literal.push(other),
        }
    }

    flush(&mut literal, &mut stack);
    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok(root),
        _ => Err("unclosed '('"),
    }
}

fn compile(segments: &[Segment], constraints: &[(&str, &str)], out: &mut String, keys: &mut Vec<String>) {
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(&regex::escape(text)),
            Segment::Param(name) => {
                let constraint = constraints
                    .iter()
                    .find(|(k, _)| k == name)
                    .map_or(DEFAULT_CONSTRAINT, |(_, c)| *c);
                out.push_str(&format!("(?P<{name}>{constraint})"));
                keys.push(name.clone());
            }
            Segment::Optional(inner) => {
                out.push_str("(?:");
                compile(inner, constraints, out, keys);
                out.push_str(")?");
            }
        }
    }
}
