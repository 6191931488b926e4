//! Client construction and the public verb surface.

pub(crate) mod constants;
pub mod idempotency;
mod request;
pub mod retry;

pub use request::RequestOptions;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::core::cache::CacheStore;
use crate::core::error::LedgerError;
use crate::core::observe::{NoopObservability, Observability};
use crate::core::transport::{
    ConnectionPoolStats, PoolConfig, TlsOptions, Transport, TransportConfig,
};
use constants::{CLIENT_NAME, DEFAULT_DNS_TTL, DEFAULT_IDEMPOTENCY_HEADER, DEFAULT_TIMEOUT};
use retry::RetryConfig;

/// Effective client configuration, swapped wholesale on [`LedgerClient::update_config`].
#[derive(Clone, Debug)]
pub(crate) struct ClientConfig {
    pub(crate) base_urls: HashMap<String, Url>,
    pub(crate) default_base: Option<Url>,
    pub(crate) api_key: Option<String>,
    pub(crate) timeout: Duration,
    pub(crate) default_headers: Vec<(String, String)>,
    pub(crate) idempotency_enabled: bool,
    pub(crate) idempotency_header: String,
    pub(crate) debug: bool,
    pub(crate) retry: RetryConfig,
    pub(crate) transport: TransportConfig,
}

struct ClientState {
    config: ClientConfig,
    transport: Arc<Transport>,
}

/// Resilient HTTP client for ledger-platform services.
///
/// Cheap to clone; all clones share the connection pools, the response cache,
/// and the current configuration snapshot.
#[derive(Clone)]
pub struct LedgerClient {
    state: Arc<RwLock<Arc<ClientState>>>,
    observability: Arc<dyn Observability>,
    cache: Option<Arc<CacheStore>>,
}

impl fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        f.debug_struct("LedgerClient")
            .field("config", &state.config)
            .field("cache_enabled", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

/// Partial configuration applied atomically by [`LedgerClient::update_config`].
///
/// `None` fields keep their current value. Named base URLs are merged into
/// the existing map rather than replacing it.
#[derive(Clone, Debug, Default)]
pub struct ConfigUpdate {
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
    pub default_headers: Option<Vec<(String, String)>>,
    pub base_urls: Option<HashMap<String, Url>>,
    pub default_base: Option<Url>,
    pub idempotency_enabled: Option<bool>,
    pub idempotency_header: Option<String>,
    pub debug: Option<bool>,
    pub retry: Option<RetryConfig>,
    pub plain_pool: Option<PoolConfig>,
    pub secure_pool: Option<PoolConfig>,
    pub tls: Option<TlsOptions>,
    pub dns_ttl: Option<Duration>,
}

impl LedgerClient {
    #[must_use]
    pub fn builder() -> LedgerClientBuilder {
        LedgerClientBuilder::default()
    }

    fn snapshot(&self) -> Arc<ClientState> {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn cache(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref()
    }

    pub(crate) fn observability(&self) -> &dyn Observability {
        self.observability.as_ref()
    }

    /// Base URL registered under `service`, if any.
    #[must_use]
    pub fn base_url(&self, service: &str) -> Option<Url> {
        self.snapshot().config.base_urls.get(service).cloned()
    }

    #[must_use]
    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Apply a partial configuration change. In-flight requests finish under
    /// the snapshot they started with; later requests see the new values.
    /// Transport-level changes rebuild the connection pools.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<(), LedgerError> {
        let current = self.snapshot();
        let mut config = current.config.clone();

        if let Some(api_key) = update.api_key {
            config.api_key = Some(api_key);
        }
        if let Some(timeout) = update.timeout {
            config.timeout = timeout;
        }
        if let Some(headers) = update.default_headers {
            config.default_headers = headers;
        }
        if let Some(base_urls) = update.base_urls {
            config.base_urls.extend(base_urls);
        }
        if let Some(default_base) = update.default_base {
            config.default_base = Some(default_base);
        }
        if let Some(enabled) = update.idempotency_enabled {
            config.idempotency_enabled = enabled;
        }
        if let Some(header) = update.idempotency_header {
            config.idempotency_header = header;
        }
        if let Some(debug) = update.debug {
            config.debug = debug;
        }
        if let Some(retry) = update.retry {
            config.retry = retry;
        }
        if let Some(plain) = update.plain_pool {
            config.transport.plain = plain;
        }
        if let Some(secure) = update.secure_pool {
            config.transport.secure = secure;
        }
        if let Some(tls) = update.tls {
            config.transport.tls = tls;
        }
        if let Some(dns_ttl) = update.dns_ttl {
            config.transport.dns_ttl = dns_ttl;
        }

        let transport = if config.transport == current.config.transport {
            current.transport.clone()
        } else {
            Arc::new(Transport::new(&config.transport, CLIENT_NAME)?)
        };

        let next = Arc::new(ClientState { config, transport });
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        Ok(())
    }

    /// Current logical connection counts per pool.
    #[must_use]
    pub fn connection_stats(&self) -> ConnectionPoolStats {
        self.snapshot().transport.stats()
    }

    /// Drop idle connections in both pools; returns how many were closed.
    pub async fn close_idle_connections(&self) -> usize {
        self.snapshot().transport.close_idle_connections().await
    }

    /// Tear the transport down. Subsequent requests fail immediately;
    /// in-flight requests are allowed to finish.
    pub async fn destroy(&self) {
        self.snapshot().transport.destroy().await;
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, options)))]
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, LedgerError> {
        self.execute_request(Method::GET, path, None, options).await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, body, options)))]
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, LedgerError> {
        let body = encode_body(body)?;
        self.execute_request(Method::POST, path, Some(body), options)
            .await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, body, options)))]
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, LedgerError> {
        let body = encode_body(body)?;
        self.execute_request(Method::PUT, path, Some(body), options)
            .await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, body, options)))]
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, LedgerError> {
        let body = encode_body(body)?;
        self.execute_request(Method::PATCH, path, Some(body), options)
            .await
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, options)))]
    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, LedgerError> {
        self.execute_request(Method::DELETE, path, None, options)
            .await
    }
}

fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, LedgerError> {
    serde_json::to_value(body)
        .map_err(|e| LedgerError::Data(format!("failed to serialize request body: {e}")))
}

/// Builder for [`LedgerClient`].
///
/// ```no_run
/// use ledgerkit_http::LedgerClient;
/// use url::Url;
///
/// # fn main() -> Result<(), ledgerkit_http::LedgerError> {
/// let client = LedgerClient::builder()
///     .base_url("onboarding", Url::parse("https://onboarding.example.com/v1")?)
///     .default_base_url(Url::parse("https://api.example.com/v1")?)
///     .api_key("sk_test_123")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct LedgerClientBuilder {
    base_urls: HashMap<String, Url>,
    default_base: Option<Url>,
    api_key: Option<String>,
    timeout: Option<Duration>,
    headers: Vec<(String, String)>,
    idempotency_enabled: Option<bool>,
    idempotency_header: Option<String>,
    debug: bool,
    retry: Option<RetryConfig>,
    cache: bool,
    cache_ttl: Option<Duration>,
    plain_pool: Option<PoolConfig>,
    secure_pool: Option<PoolConfig>,
    tls: Option<TlsOptions>,
    dns_ttl: Option<Duration>,
    keep_alive: Option<bool>,
    max_sockets_per_host: Option<usize>,
    keep_alive_duration: Option<Duration>,
    observability: Option<Arc<dyn Observability>>,
}

impl LedgerClientBuilder {
    /// Register a named base URL; requests whose first path segment matches
    /// `service` resolve against it.
    #[must_use]
    pub fn base_url(mut self, service: impl Into<String>, url: Url) -> Self {
        self.base_urls.insert(service.into(), url);
        self
    }

    /// Fallback base for paths whose first segment matches no registered name.
    #[must_use]
    pub fn default_base_url(mut self, url: Url) -> Self {
        self.default_base = Some(url);
        self
    }

    /// API key attached verbatim as the `Authorization` header.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Header sent with every request; per-request headers take precedence.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub const fn idempotency_enabled(mut self, enabled: bool) -> Self {
        self.idempotency_enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn idempotency_header(mut self, name: impl Into<String>) -> Self {
        self.idempotency_header = Some(name.into());
        self
    }

    /// Log each outgoing request to stderr.
    #[must_use]
    pub const fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Enable the in-memory GET cache.
    #[must_use]
    pub const fn cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    /// Enable the GET cache with a time-to-live per entry.
    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = true;
        self.cache_ttl = Some(ttl);
        self
    }

    #[must_use]
    pub const fn plain_pool(mut self, pool: PoolConfig) -> Self {
        self.plain_pool = Some(pool);
        self
    }

    #[must_use]
    pub const fn secure_pool(mut self, pool: PoolConfig) -> Self {
        self.secure_pool = Some(pool);
        self
    }

    #[must_use]
    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// DNS cache time-to-live. `Duration::ZERO` disables DNS caching.
    #[must_use]
    pub const fn dns_cache_ttl(mut self, ttl: Duration) -> Self {
        self.dns_ttl = Some(ttl);
        self
    }

    /// Toggle keep-alive on both pools.
    #[must_use]
    pub const fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = Some(enabled);
        self
    }

    /// Socket ceiling per authority, applied to both pools.
    #[must_use]
    pub const fn max_sockets_per_host(mut self, max: usize) -> Self {
        self.max_sockets_per_host = Some(max);
        self
    }

    /// Idle socket lifetime, applied to both pools.
    #[must_use]
    pub const fn keep_alive_duration(mut self, duration: Duration) -> Self {
        self.keep_alive_duration = Some(duration);
        self
    }

    #[must_use]
    pub fn observability(mut self, observability: Arc<dyn Observability>) -> Self {
        self.observability = Some(observability);
        self
    }

    pub fn build(self) -> Result<LedgerClient, LedgerError> {
        let mut plain = self.plain_pool.unwrap_or_default();
        let mut secure = self.secure_pool.unwrap_or_default();
        if let Some(keep_alive) = self.keep_alive {
            plain.keep_alive = keep_alive;
            secure.keep_alive = keep_alive;
        }
        if let Some(max) = self.max_sockets_per_host {
            plain.max_sockets_per_host = max;
            secure.max_sockets_per_host = max;
        }
        if let Some(duration) = self.keep_alive_duration {
            plain.keep_alive_duration = duration;
            secure.keep_alive_duration = duration;
        }
        let transport_config = TransportConfig {
            plain,
            secure,
            tls: self.tls.unwrap_or_default(),
            dns_ttl: self.dns_ttl.unwrap_or(DEFAULT_DNS_TTL),
        };
        let transport = Arc::new(Transport::new(&transport_config, CLIENT_NAME)?);

        let config = ClientConfig {
            base_urls: self.base_urls,
            default_base: self.default_base,
            api_key: self.api_key,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            default_headers: self.headers,
            idempotency_enabled: self.idempotency_enabled.unwrap_or(true),
            idempotency_header: self
                .idempotency_header
                .unwrap_or_else(|| DEFAULT_IDEMPOTENCY_HEADER.to_owned()),
            debug: self.debug,
            retry: self.retry.unwrap_or_default(),
            transport: transport_config,
        };

        Ok(LedgerClient {
            state: Arc::new(RwLock::new(Arc::new(ClientState { config, transport }))),
            observability: self
                .observability
                .unwrap_or_else(|| Arc::new(NoopObservability)),
            cache: self.cache.then(|| Arc::new(CacheStore::new(self.cache_ttl))),
        })
    }
}
