//! Ordered string map used for route parameters, query data and post data.

use std::fmt;

/// An insertion-ordered `name → value` map.
///
/// Order matters: route parameters are passed to actions positionally in the
/// order the route declared them.
///
/// # Examples
///
/// ```
/// use hmvc::context::Parameters;
///
/// let mut params = Parameters::new();
/// params.insert("controller", "blog");
/// params.insert("id", "7");
/// params.insert("controller", "news"); // replaces in place
///
/// assert_eq!(params.get("controller"), Some("news"));
/// assert_eq!(params.keys().collect::<Vec<_>>(), ["controller", "id"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: Vec<(String, String)>,
}

impl Parameters {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `a=1&b=two` form/query encoding. Malformed input yields an empty map.
    pub fn from_urlencoded(encoded: &str) -> Self {
        serde_urlencoded::from_str::<Vec<(String, String)>>(encoded)
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default()
    }

    /// Inserts or replaces a value; a replaced key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Get a value from the parameters map
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Remove a value from the parameters map
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Values in order, as positional action arguments.
    pub fn values(&self) -> Vec<String> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Adds every entry of `other` whose key is not already present.
    pub fn merge_missing(&mut self, other: &Parameters) {
        for (k, v) in other.iter() {
            if !self.contains(k) {
                self.entries.push((k.to_owned(), v.to_owned()));
            }
        }
    }

    /// Form/query encoding of the entries, e.g. `a=1&b=two+words`.
    pub fn to_urlencoded(&self) -> String {
        serde_urlencoded::to_string(&self.entries).unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_urlencoded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoded_round_trip() {
        let params = Parameters::from_urlencoded("q=rust+lang&page=2&empty=");
        assert_eq!(params.get("q"), Some("rust lang"));
        assert_eq!(params.get("empty"), Some(""));
        assert_eq!(params.to_urlencoded(), "q=rust+lang&page=2&empty=");
    }

    #[test]
    fn merge_missing_keeps_existing() {
        let mut a: Parameters = [("x", "1")].into_iter().collect();
        let b: Parameters = [("x", "2"), ("y", "3")].into_iter().collect();
        a.merge_missing(&b);
        assert_eq!(a.get("x"), Some("1"));
        assert_eq!(a.values(), vec!["1".to_owned(), "3".to_owned()]);
    }

    #[test]
    fn remove_returns_value() {
        let mut p: Parameters = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(p.remove("a"), Some("1".to_owned()));
        assert_eq!(p.remove("a"), None);
        assert_eq!(p.len(), 1);
    }
}
