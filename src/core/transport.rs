use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use url::Url;

use crate::core::client::constants::{DEFAULT_KEEP_ALIVE, DEFAULT_MAX_SOCKETS_PER_HOST};
use crate::core::dns::DnsCache;
use crate::core::error::LedgerError;

/// TLS trust and identity material for the secure pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM-encoded custom root CA appended to the trust store.
    pub root_ca_pem: Option<Vec<u8>>,
    /// PEM-encoded client certificate + key for mutual TLS.
    pub identity_pem: Option<Vec<u8>>,
    /// Skip peer verification. Test environments only.
    pub accept_invalid_certs: bool,
}

/// Per-pool connection parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub keep_alive: bool,
    /// Socket ceiling, enforced per destination authority.
    pub max_sockets_per_host: usize,
    pub keep_alive_duration: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_sockets_per_host: DEFAULT_MAX_SOCKETS_PER_HOST,
            keep_alive_duration: DEFAULT_KEEP_ALIVE,
        }
    }
}

/// Everything that shapes the two pools. A change to any field requires a
/// pool rebuild, which `LedgerClient::update_config` performs atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportConfig {
    pub plain: PoolConfig,
    pub secure: PoolConfig,
    pub tls: TlsOptions,
    /// TTL for the DNS resolution cache. Zero disables the cache.
    pub dns_ttl: Duration,
}

/// Socket counts for one pool, summed per authority at call time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub active: usize,
    pub idle: usize,
    pub total: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionPoolStats {
    pub plain: PoolCounts,
    pub secure: PoolCounts,
}

struct HostEntry {
    active: usize,
    idle: usize,
    limiter: Arc<Semaphore>,
}

impl HostEntry {
    fn new(max_sockets: usize) -> Self {
        Self {
            active: 0,
            idle: 0,
            limiter: Arc::new(Semaphore::new(max_sockets.max(1))),
        }
    }
}

struct Pool {
    client: RwLock<reqwest::Client>,
    config: PoolConfig,
    tls: Option<TlsOptions>,
    // std Mutex so lease drops can update the counters synchronously.
    hosts: Mutex<HashMap<String, HostEntry>>,
}

impl Pool {
    fn hosts(&self) -> MutexGuard<'_, HashMap<String, HostEntry>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reusable-connection transport: one pool for plain and one for encrypted
/// destinations, each independently configured.
pub(crate) struct Transport {
    plain: Pool,
    secure: Pool,
    dns: Option<Arc<DnsCache>>,
    client_name: String,
    destroyed: AtomicBool,
}

/// Borrowed slot for one physical attempt. Holds the per-authority permit
/// until it goes away, which is what enforces the socket ceiling.
pub(crate) struct ConnectionLease<'a> {
    pool: &'a Pool,
    authority: String,
    client: reqwest::Client,
    max_idle: usize,
    released: bool,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionLease<'_> {
    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Settle the attempt: the slot moves from active to idle (capped).
    ///
    /// A lease that is dropped without being released, e.g. because the
    /// request future was abandoned mid-attempt, only decrements the active
    /// count; the socket is not known to be reusable.
    pub(crate) fn release(mut self) {
        {
            let mut hosts = self.pool.hosts();
            if let Some(entry) = hosts.get_mut(&self.authority) {
                entry.active = entry.active.saturating_sub(1);
                if entry.idle < self.max_idle {
                    entry.idle += 1;
                }
            }
        }
        self.released = true;
    }
}

impl Drop for ConnectionLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut hosts = self.pool.hosts();
        if let Some(entry) = hosts.get_mut(&self.authority) {
            entry.active = entry.active.saturating_sub(1);
        }
    }
}

impl Transport {
    pub(crate) fn new(config: &TransportConfig, client_name: &str) -> Result<Self, LedgerError> {
        let dns = (!config.dns_ttl.is_zero()).then(|| Arc::new(DnsCache::new(config.dns_ttl)));
        let plain = Pool {
            client: RwLock::new(build_client(&config.plain, None, dns.clone(), client_name)?),
            config: config.plain.clone(),
            tls: None,
            hosts: Mutex::new(HashMap::new()),
        };
        let secure = Pool {
            client: RwLock::new(build_client(
                &config.secure,
                Some(&config.tls),
                dns.clone(),
                client_name,
            )?),
            config: config.secure.clone(),
            tls: Some(config.tls.clone()),
            hosts: Mutex::new(HashMap::new()),
        };
        Ok(Self {
            plain,
            secure,
            dns,
            client_name: client_name.to_owned(),
            destroyed: AtomicBool::new(false),
        })
    }

    fn pool_for(&self, url: &Url) -> &Pool {
        if url.scheme() == "https" {
            &self.secure
        } else {
            &self.plain
        }
    }

    pub(crate) async fn acquire(&self, url: &Url) -> Result<ConnectionLease<'_>, LedgerError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(LedgerError::Internal(
                "transport has been destroyed".into(),
            ));
        }
        let pool = self.pool_for(url);
        let authority = authority_of(url);

        let (client, limiter) = {
            let client = pool.client.read().await.clone();
            let mut hosts = pool.hosts();
            let entry = hosts
                .entry(authority.clone())
                .or_insert_with(|| HostEntry::new(pool.config.max_sockets_per_host));
            (client, entry.limiter.clone())
        };

        let permit = limiter
            .acquire_owned()
            .await
            .map_err(|_| LedgerError::Internal("connection limiter closed".into()))?;

        let mut hosts = pool.hosts();
        if let Some(entry) = hosts.get_mut(&authority) {
            entry.active += 1;
            // Reuse an idle socket when one is available.
            entry.idle = entry.idle.saturating_sub(1);
        }
        drop(hosts);

        let max_idle = if pool.config.keep_alive {
            pool.config.max_sockets_per_host
        } else {
            0
        };
        Ok(ConnectionLease {
            pool,
            authority,
            client,
            max_idle,
            released: false,
            _permit: permit,
        })
    }

    /// Active/idle/total per pool, computed by summing per-authority counts
    /// at call time.
    pub(crate) fn stats(&self) -> ConnectionPoolStats {
        ConnectionPoolStats {
            plain: pool_counts(&self.plain),
            secure: pool_counts(&self.secure),
        }
    }

    /// Destroys every currently-idle socket in both pools and returns the
    /// count destroyed. In-flight attempts hold clones of the old clients and
    /// finish undisturbed; the old pool drops once they settle.
    pub(crate) async fn close_idle_connections(&self) -> usize {
        let mut closed = 0;
        for pool in [&self.plain, &self.secure] {
            {
                let mut hosts = pool.hosts();
                for entry in hosts.values_mut() {
                    closed += entry.idle;
                    entry.idle = 0;
                }
            }
            if let Ok(fresh) = build_client(
                &pool.config,
                pool.tls.as_ref(),
                self.dns.clone(),
                &self.client_name,
            ) {
                *pool.client.write().await = fresh;
            }
        }
        closed
    }

    /// Tears down both pools; the transport must not be used afterward.
    pub(crate) async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        for pool in [&self.plain, &self.secure] {
            pool.hosts().clear();
            if let Ok(fresh) = reqwest::Client::builder().build() {
                *pool.client.write().await = fresh;
            }
        }
    }
}

fn pool_counts(pool: &Pool) -> PoolCounts {
    let hosts = pool.hosts();
    let mut counts = PoolCounts::default();
    for entry in hosts.values() {
        counts.active += entry.active;
        counts.idle += entry.idle;
    }
    counts.total = counts.active + counts.idle;
    counts
}

fn authority_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

fn build_client(
    config: &PoolConfig,
    tls: Option<&TlsOptions>,
    dns: Option<Arc<DnsCache>>,
    client_name: &str,
) -> Result<reqwest::Client, LedgerError> {
    let mut builder = reqwest::Client::builder().user_agent(client_name);
    builder = if config.keep_alive {
        builder
            .pool_max_idle_per_host(config.max_sockets_per_host)
            .pool_idle_timeout(config.keep_alive_duration)
            .tcp_keepalive(config.keep_alive_duration)
    } else {
        builder.pool_max_idle_per_host(0)
    };
    if let Some(dns) = dns {
        builder = builder.dns_resolver(dns);
    }
    if let Some(tls) = tls {
        if let Some(pem) = &tls.root_ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| LedgerError::Internal(format!("invalid root CA: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = &tls.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| LedgerError::Internal(format!("invalid client identity: {e}")))?;
            builder = builder.identity(identity);
        }
        if tls.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }
    builder
        .build()
        .map_err(|e| LedgerError::Internal(format!("failed to build http client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> Transport {
        Transport::new(&TransportConfig::default(), "ledgerkit-http-test")
            .expect("transport builds")
    }

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    #[tokio::test]
    async fn lease_accounting_tracks_active_then_idle() {
        let transport = transport();
        let target = url("http://localhost:3000/v1/organizations");

        let lease = transport.acquire(&target).await.unwrap();
        let stats = transport.stats();
        assert_eq!(stats.plain.active, 1);
        assert_eq!(stats.plain.idle, 0);
        assert_eq!(stats.secure.total, 0);

        lease.release();
        let stats = transport.stats();
        assert_eq!(stats.plain.active, 0);
        assert_eq!(stats.plain.idle, 1);
        assert_eq!(stats.plain.total, 1);
    }

    #[tokio::test]
    async fn dropped_lease_decrements_active_without_promoting_idle() {
        let transport = transport();
        let target = url("http://localhost:3000/v1/transactions");

        let lease = transport.acquire(&target).await.unwrap();
        drop(lease);

        let stats = transport.stats();
        assert_eq!(stats.plain.active, 0);
        assert_eq!(stats.plain.idle, 0);
        assert_eq!(stats.plain.total, 0);

        // The permit came back with the drop, so the slot is reusable.
        let lease = transport.acquire(&target).await.unwrap();
        lease.release();
        assert_eq!(transport.stats().plain.idle, 1);
    }

    #[tokio::test]
    async fn plain_and_secure_pools_are_independent() {
        let transport = transport();
        let plain = transport
            .acquire(&url("http://localhost:3000/v1/ledgers"))
            .await
            .unwrap();
        let secure = transport
            .acquire(&url("https://localhost:3443/v1/ledgers"))
            .await
            .unwrap();

        let stats = transport.stats();
        assert_eq!(stats.plain.active, 1);
        assert_eq!(stats.secure.active, 1);

        plain.release();
        secure.release();
    }

    #[tokio::test]
    async fn socket_ceiling_is_enforced_per_authority() {
        let config = TransportConfig {
            plain: PoolConfig {
                max_sockets_per_host: 1,
                ..PoolConfig::default()
            },
            ..TransportConfig::default()
        };
        let transport = Transport::new(&config, "ledgerkit-http-test").unwrap();
        let target = url("http://localhost:3000/v1/accounts");

        let held = transport.acquire(&target).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), transport.acquire(&target)).await;
        assert!(blocked.is_err(), "second acquire should wait for the permit");

        // A different authority is not affected by the ceiling.
        let other = transport
            .acquire(&url("http://localhost:4000/v1/accounts"))
            .await
            .unwrap();
        other.release();

        held.release();
        let lease = transport.acquire(&target).await.unwrap();
        lease.release();
    }

    #[tokio::test]
    async fn close_idle_reports_and_zeroes_idle_counts() {
        let transport = transport();
        let target = url("http://localhost:3000/v1/balances");

        for _ in 0..3 {
            let lease = transport.acquire(&target).await.unwrap();
            lease.release();
        }
        let before = transport.stats();
        assert!(before.plain.idle >= 1);

        let closed = transport.close_idle_connections().await;
        assert_eq!(closed, before.plain.idle);
        let after = transport.stats();
        assert_eq!(after.plain.idle, 0);
        assert_eq!(after.plain.active, 0);
    }

    #[tokio::test]
    async fn destroyed_transport_rejects_new_leases() {
        let transport = transport();
        transport.destroy().await;
        let result = transport
            .acquire(&url("http://localhost:3000/v1/organizations"))
            .await;
        assert!(matches!(result, Err(LedgerError::Internal(_))));
    }
}
