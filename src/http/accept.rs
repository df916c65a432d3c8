//! `Accept`-family negotiation: token → quality preference maps.

use super::header_value::clamp_quality;

/// Which `Accept*` header a preference map was parsed from.
///
/// The kind decides what [`Accept::quality`] answers for tokens the client
/// did not list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptKind {
    /// `Accept`; unlisted types fall back to the `*/*` entry.
    Type,
    /// `Accept-Language`; unlisted languages are not accepted.
    Language,
    /// `Accept-Encoding`; unlisted encodings are not accepted.
    Encoding,
    /// `Accept-Charset`; unlisted charsets are not accepted.
    Charset,
}

/// Quality-ordered preferences parsed from an `Accept*` header.
///
/// # Examples
///
/// ```
/// use hmvc::http::Accept;
///
/// let types = Accept::types(Some("text/html, application/xml;q=0.9, */*;q=0.8"));
/// assert_eq!(types.quality("text/html"), Some(1.0));
/// assert_eq!(types.quality("image/png"), Some(0.8)); // falls back to */*
///
/// let langs = Accept::languages(Some("en-gb, fr;q=0.5"));
/// assert_eq!(langs.quality("fr"), Some(0.5));
/// assert_eq!(langs.quality("de"), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Accept {
    kind: AcceptKind,
    entries: Vec<(String, f32)>,
}

impl Accept {
    /// Parses `header` on top of `defaults`.
    ///
    /// Each comma-separated token gets quality `1.0` unless a `q=` parameter
    /// overrides it. A token listed twice keeps its first position and its
    /// last quality. The result is ordered by descending quality; equal
    /// qualities keep their listed order.
    pub fn parse(kind: AcceptKind, header: Option<&str>, defaults: &[(&str, f32)]) -> Self {
        let mut entries: Vec<(String, f32)> = defaults
            .iter()
            .map(|(token, q)| ((*token).to_owned(), *q))
            .collect();

        for item in header.unwrap_or_default().split(',') {
            let mut parts = item.split(';');
            let token = parts.next().unwrap_or_default().trim();
            if token.is_empty() {
                continue;
            }

            let mut quality: f32 = 1.0;
            for part in parts {
                let Some((key, value)) = part.trim().split_once('=') else {
                    continue;
                };
                if key.trim() == "q" {
                    quality = value.trim().parse::<f32>().map_or(0.0, clamp_quality);
                }
            }

            match entries.iter_mut().find(|(t, _)| t == token) {
                Some(entry) => entry.1 = quality,
                None => entries.push((token.to_owned(), quality)),
            }
        }

        entries.sort_by(|a, b| b.1.total_cmp(&a.1));

        Self { kind, entries }
    }

    /// Parses an `Accept` header; `*/*` is accepted at `1.0` unless overridden.
    pub fn types(header: Option<&str>) -> Self {
        Self::parse(AcceptKind::Type, header, &[("*/*", 1.0)])
    }

    pub fn languages(header: Option<&str>) -> Self {
        Self::parse(AcceptKind::Language, header, &[])
    }

    pub fn encodings(header: Option<&str>) -> Self {
        Self::parse(AcceptKind::Encoding, header, &[])
    }

    pub fn charsets(header: Option<&str>) -> Self {
        Self::parse(AcceptKind::Charset, header, &[])
    }

    pub fn kind(&self) -> AcceptKind {
        self.kind
    }

    /// Quality for `token`, or `None` when it is not accepted.
    ///
    /// Content types fall back to the `*/*` entry.
    pub fn quality(&self, token: &str) -> Option<f32> {
        let exact = self.lookup(token);
        match self.kind {
            AcceptKind::Type => exact.or_else(|| self.lookup("*/*")),
            _ => exact,
        }
    }

    /// The most preferred token.
    pub fn preferred(&self) -> Option<&str> {
        self.entries.first().map(|(t, _)| t.as_str())
    }

    /// `(token, quality)` pairs, best first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.entries.iter().map(|(t, q)| (t.as_str(), *q))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, token: &str) -> Option<f32> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, q)| *q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_by_quality_stable_for_ties() {
        let accept = Accept::types(Some(
            "text/html, application/xhtml+xml, application/xml;q=0.9, */*;q=0.8",
        ));
        let order: Vec<_> = accept.iter().collect();
        assert_eq!(
            order,
            vec![
                ("text/html", 1.0),
                ("application/xhtml+xml", 1.0),
                ("application/xml", 0.9),
                ("*/*", 0.8),
            ]
        );
    }

    #[test]
    fn wildcard_default_when_header_missing() {
        let accept = Accept::types(None);
        assert_eq!(accept.len(), 1);
        assert_eq!(accept.quality("application/json"), Some(1.0));
    }

    #[test]
    fn languages_do_not_fall_back() {
        let langs = Accept::languages(Some("*;q=0.1, en"));
        assert_eq!(langs.preferred(), Some("en"));
        assert_eq!(langs.quality("fr"), None);
        assert_eq!(langs.quality("*"), Some(0.1));
    }

    #[test]
    fn empty_encoding_header_accepts_nothing() {
        let enc = Accept::encodings(Some(""));
        assert!(enc.is_empty());
        assert_eq!(enc.quality("gzip"), None);
        assert_eq!(enc.kind(), AcceptKind::Encoding);
    }

    #[test]
    fn hostile_qualities_do_not_break_ordering() {
        let header = (0..30)
            .map(|i| match i % 3 {
                0 => format!("lang{i};q=NaN"),
                1 => format!("lang{i};q=0.5"),
                _ => format!("lang{i};q=-inf"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let langs = Accept::languages(Some(&header));
        assert_eq!(langs.len(), 30);
        assert_eq!(langs.preferred(), Some("lang1"));
        assert_eq!(langs.quality("lang0"), Some(0.0));
        assert_eq!(langs.quality("lang2"), Some(0.0));
        assert_eq!(Accept::types(Some("a/b;q=9")).quality("a/b"), Some(1.0));
    }

    #[test]
    fn parameters_other_than_q_are_ignored() {
        let accept = Accept::charsets(Some("utf-8;level=1;q=0.4, iso-8859-1;bogus"));
        assert_eq!(accept.quality("utf-8"), Some(0.4));
        assert_eq!(accept.quality("iso-8859-1"), Some(1.0));
    }
}
