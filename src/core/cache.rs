use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use url::Url;

/// Defines the behavior of the in-memory response cache for a single request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present; otherwise fetch
    /// from the network and write the response to the cache. (Default)
    #[default]
    Use,
    /// Always fetch from the network, bypassing any cached entry, and write
    /// the new response to the cache.
    Refresh,
    /// Always fetch from the network and do not read from or write to the cache.
    Bypass,
}

/// A successful response body as stored in (and replayed from) the cache.
#[derive(Clone, Debug)]
pub(crate) struct CachedResponse {
    pub(crate) content_type: String,
    pub(crate) body: String,
}

#[derive(Debug)]
struct CacheEntry {
    response: CachedResponse,
    expires_at: Option<Instant>,
}

/// Read-through response store, keyed by `METHOD:full-URL`.
///
/// The orchestrator only ever reads or writes entries for GET requests, and
/// only populates an entry after a successful response. Entries without a TTL
/// never expire; eviction beyond TTL is the owner's concern.
#[derive(Debug)]
pub(crate) struct CacheStore {
    map: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Option<Duration>,
}

impl CacheStore {
    pub(crate) fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Cache key for a resolved request. The URL already carries the
    /// serialized query string, so identical logical requests collide.
    pub(crate) fn key(method: &str, url: &Url) -> String {
        format!("{method}:{url}")
    }

    pub(crate) async fn get(&self, key: &str) -> Option<CachedResponse> {
        let guard = self.map.read().await;
        if let Some(entry) = guard.get(key)
            && entry.expires_at.is_none_or(|at| Instant::now() <= at)
        {
            return Some(entry.response.clone());
        }
        None
    }

    pub(crate) async fn put(&self, key: String, response: CachedResponse) {
        let expires_at = self.default_ttl.map(|ttl| Instant::now() + ttl);
        let entry = CacheEntry {
            response,
            expires_at,
        };
        let mut guard = self.map.write().await;
        guard.insert(key, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str) -> CachedResponse {
        CachedResponse {
            content_type: "application/json".into(),
            body: text.into(),
        }
    }

    #[test]
    fn key_includes_method_and_query() {
        let url = Url::parse("http://localhost:3000/v1/accounts?limit=10").unwrap();
        assert_eq!(
            CacheStore::key("GET", &url),
            "GET:http://localhost:3000/v1/accounts?limit=10"
        );
    }

    #[tokio::test]
    async fn entries_without_ttl_never_expire() {
        let store = CacheStore::new(None);
        store.put("GET:http://x/a".into(), body("{}")).await;
        assert!(store.get("GET:http://x/a").await.is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let store = CacheStore::new(Some(Duration::from_millis(5)));
        store.put("GET:http://x/a".into(), body("{}")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("GET:http://x/a").await.is_none());
    }

    #[tokio::test]
    async fn distinct_methods_never_collide() {
        let store = CacheStore::new(None);
        let url = Url::parse("http://localhost/v1/accounts").unwrap();
        store
            .put(CacheStore::key("GET", &url), body(r#"{"id":1}"#))
            .await;
        assert!(store.get(&CacheStore::key("POST", &url)).await.is_none());
    }
}
