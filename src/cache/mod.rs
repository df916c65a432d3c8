//! Response caching collaborator and request fingerprints.
//!
//! The dispatcher consults a [`ResponseCache`] before resolving a controller
//! and offers it every successfully dispatched response. [`MemoryCache`] is a
//! process-local implementation keyed by [`cache_key`].

use std::collections::HashMap;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::http::{Request, Response};

/// Storage for dispatched responses.
pub trait ResponseCache: Send + Sync {
    /// A stored response for `request`, if any.
    fn fetch(&self, request: &Request) -> Option<Response>;

    /// Offers a freshly dispatched response for storage.
    fn store(&self, request: &Request, response: &Response);
}

/// Key identifying a request for caching: method, URI and encoded query.
pub fn cache_key(request: &Request) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method().as_str());
    hasher.update(b" ");
    hasher.update(request.uri());
    hasher.update(b"?");
    hasher.update(request.query().to_urlencoded());
    hex::encode(hasher.finalize())
}

/// Content hash of everything an outbound request sends: method, URI with
/// encoded query, headers, cookies and post data.
pub fn fingerprint(request: &Request) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method().as_str());
    hasher.update(b"\n");
    hasher.update(request.uri());
    let query = request.query().to_urlencoded();
    if !query.is_empty() {
        hasher.update(b"?");
        hasher.update(query);
    }
    for line in request.headers().lines() {
        hasher.update(b"\n");
        hasher.update(line);
    }
    for cookie in request.cookies() {
        hasher.update(b"\ncookie:");
        hasher.update(cookie.to_string());
    }
    hasher.update(b"\n\n");
    hasher.update(request.post().to_urlencoded());
    hex::encode(hasher.finalize())
}

/// An unbounded in-memory cache.
///
/// # Examples
///
/// ```
/// use hmvc::cache::{MemoryCache, ResponseCache};
/// use hmvc::http::{Request, Response, StatusCode};
///
/// let cache = MemoryCache::new();
/// let request = Request::new("news");
/// assert!(cache.fetch(&request).is_none());
///
/// cache.store(&request, &Response::new(StatusCode::Ok).body("headlines"));
/// assert_eq!(cache.fetch(&request).unwrap().bytes(), b"headlines");
/// ```
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Response>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl ResponseCache for MemoryCache {
    fn fetch(&self, request: &Request) -> Option<Response> {
        self.entries.lock().get(&cache_key(request)).cloned()
    }

    fn store(&self, request: &Request, response: &Response) {
        let key = cache_key(request);
        trace!(uri = request.uri(), key = %key, "storing response");
        self.entries.lock().insert(key, response.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Parameters;
    use crate::http::{Cookie, Method, StatusCode};

    #[test]
    fn key_depends_on_method_uri_and_query() {
        let get = Request::new("news");
        let post = Request::new("news").with_method(Method::Post);
        let paged = Request::new("news").with_query([("page", "2")].into_iter().collect());

        assert_eq!(cache_key(&get), cache_key(&Request::new("news")));
        assert_ne!(cache_key(&get), cache_key(&post));
        assert_ne!(cache_key(&get), cache_key(&paged));
        assert_eq!(cache_key(&get).len(), 64);
    }

    #[test]
    fn fingerprint_covers_headers_cookies_and_post() {
        let base = Request::new("http://api.example.com/items");
        let with_header = base.clone().with_header("Accept", "application/json");
        let with_cookie = base.clone().with_cookie(Cookie::new("sid", "1"));
        let mut post = Parameters::new();
        post.insert("name", "widget");
        let with_post = base.clone().with_post(post);

        let prints = [&base, &with_header, &with_cookie, &with_post].map(fingerprint);
        for (i, a) in prints.iter().enumerate() {
            for b in &prints[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(fingerprint(&base), fingerprint(&base.clone()));
    }

    #[test]
    fn memory_cache_clear() {
        let cache = MemoryCache::new();
        cache.store(&Request::new("a"), &Response::new(StatusCode::Ok));
        cache.store(&Request::new("b"), &Response::new(StatusCode::Ok));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
