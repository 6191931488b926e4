use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::sync::Mutex;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type LookupFuture = Pin<Box<dyn Future<Output = Result<Vec<SocketAddr>, BoxError>> + Send>>;
type LookupFn = Arc<dyn Fn(&str) -> LookupFuture + Send + Sync>;

#[derive(Clone, Debug)]
struct CachedLookup {
    addrs: Vec<SocketAddr>,
    expires_at: Instant,
}

/// Memoizes hostname lookups with a TTL to cut repeated-request latency.
///
/// Wraps a lookup function (by default `tokio::net::lookup_host`); live
/// entries short-circuit the real lookup. A TTL of zero disables caching
/// entirely, so every call performs a real lookup.
#[derive(Clone)]
pub struct DnsCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, CachedLookup>>>,
    lookup: LookupFn,
}

impl std::fmt::Debug for DnsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsCache").field("ttl", &self.ttl).finish()
    }
}

impl DnsCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_lookup(
            ttl,
            Arc::new(|host: &str| {
                let host = host.to_owned();
                Box::pin(async move {
                    let addrs = tokio::net::lookup_host((host.as_str(), 0))
                        .await
                        .map_err(|e| Box::new(e) as BoxError)?
                        .collect::<Vec<_>>();
                    Ok(addrs)
                }) as LookupFuture
            }),
        )
    }

    pub(crate) fn with_lookup(ttl: Duration, lookup: LookupFn) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
            lookup,
        }
    }

    pub(crate) async fn resolve_host(&self, host: &str) -> Result<Vec<SocketAddr>, BoxError> {
        if self.ttl.is_zero() {
            return (self.lookup)(host).await;
        }

        {
            let guard = self.entries.lock().await;
            if let Some(hit) = guard.get(host)
                && Instant::now() <= hit.expires_at
            {
                return Ok(hit.addrs.clone());
            }
        }

        let addrs = (self.lookup)(host).await?;
        let mut guard = self.entries.lock().await;
        guard.insert(
            host.to_owned(),
            CachedLookup {
                addrs: addrs.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(addrs)
    }
}

impl Resolve for DnsCache {
    fn resolve(&self, name: Name) -> Resolving {
        let cache = self.clone();
        Box::pin(async move {
            let addrs = cache.resolve_host(name.as_str()).await?;
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}
