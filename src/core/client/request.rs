use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::ClientConfig;
use super::LedgerClient;
use super::constants::ERROR_BODY_SNIPPET_LEN;
use super::idempotency::generate_idempotency_key;
use super::retry::{self, RetryConfig};
use crate::core::cache::{CacheMode, CacheStore, CachedResponse};
use crate::core::error::{LedgerError, classify_status};
use crate::core::transport::{ConnectionLease, Transport};

/// Per-request options accepted by every verb operation.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Query parameters. Scalars are stringified, arrays are repeated under a
    /// `key[]` suffix, objects are JSON-stringified, nulls are omitted.
    pub params: BTreeMap<String, Value>,
    /// Overrides the client default timeout for this request.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation signal; aborts the in-flight attempt and any
    /// backoff wait.
    pub cancel: Option<CancellationToken>,
    /// Explicit idempotency key; used unmodified instead of a generated one.
    pub idempotency_key: Option<String>,
    /// Per-request header overrides (highest precedence).
    pub headers: Vec<(String, String)>,
    /// Overrides the client retry configuration for this request.
    pub retry_override: Option<RetryConfig>,
    pub cache_mode: CacheMode,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry_override = Some(retry);
        self
    }

    pub const fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }
}

impl LedgerClient {
    /// Single entry point behind the verb operations: URL resolution, header
    /// construction, cache check, retry-wrapped transport call, parsing, and
    /// span bookkeeping.
    pub(crate) async fn execute_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<T, LedgerError> {
        let state = self.snapshot();
        let config = &state.config;
        let url = resolve_url(config, path, &options.params)?;
        let headers = build_headers(config, &method, &options)?;

        if config.debug {
            eprintln!("ledgerkit-http: {method} {url} body={body:?}");
        }

        let mut span = self.observability().start_span(method.as_str());
        span.set_attribute("http.method", method.as_str());
        span.set_attribute("url", url.as_str());

        let cache_key = CacheStore::key(method.as_str(), &url);
        let cacheable = method == Method::GET;
        if cacheable
            && options.cache_mode == CacheMode::Use
            && let Some(cache) = self.cache()
            && let Some(hit) = cache.get(&cache_key).await
        {
            span.set_attribute("cache.hit", "true");
            span.set_status(true, "");
            span.end();
            return parse_body(&hit);
        }

        let retry_config = options
            .retry_override
            .clone()
            .unwrap_or_else(|| config.retry.clone());
        let timeout = options.timeout.unwrap_or(config.timeout);
        let cancel = options.cancel.clone();
        let transport = state.transport.clone();

        let mut retries_used: u32 = 0;
        let result = retry::execute(
            &retry_config,
            cancel.as_ref(),
            |_attempt| {
                attempt_once(
                    transport.clone(),
                    method.clone(),
                    url.clone(),
                    headers.clone(),
                    body.clone(),
                    timeout,
                    cancel.clone(),
                )
            },
            |ctx| {
                retries_used = ctx.attempt;
                if ctx.attempt == 0 {
                    span.set_attribute("retry.max_retries", &ctx.max_retries.to_string());
                } else {
                    span.set_attribute("retry.attempt", &ctx.attempt.to_string());
                    span.set_attribute("retry.delay_ms", &ctx.delay.as_millis().to_string());
                }
            },
        )
        .await;
        span.set_attribute("retry.count", &retries_used.to_string());

        match result {
            Ok(response) => {
                if cacheable
                    && options.cache_mode != CacheMode::Bypass
                    && let Some(cache) = self.cache()
                {
                    cache.put(cache_key, response.clone()).await;
                }
                span.set_status(true, "");
                span.end();
                parse_body(&response)
            }
            Err(error) => {
                span.record_exception(&error);
                span.set_status(false, error.code());
                span.end();
                Err(error)
            }
        }
    }
}

async fn attempt_once(
    transport: Arc<Transport>,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Value>,
    timeout: Duration,
    cancel: Option<CancellationToken>,
) -> Result<CachedResponse, LedgerError> {
    let lease = transport.acquire(&url).await?;
    let outcome = perform(&lease, &method, &url, headers, body.as_ref(), timeout, cancel.as_ref()).await;
    lease.release();
    outcome
}

async fn perform(
    lease: &ConnectionLease<'_>,
    method: &Method,
    url: &Url,
    headers: HeaderMap,
    body: Option<&Value>,
    timeout: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<CachedResponse, LedgerError> {
    let mut request = lease
        .client()
        .request(method.clone(), url.clone())
        .headers(headers)
        .timeout(timeout);
    if let Some(body) = body {
        request = request.json(body);
    }

    let send = send_and_read(request, method, url, timeout);
    match cancel {
        Some(token) => {
            tokio::select! {
                () = token.cancelled() => Err(LedgerError::Cancelled {
                    method: method.to_string(),
                    url: url.to_string(),
                    retried: false,
                    retry_count: 0,
                }),
                outcome = send => outcome,
            }
        }
        None => send.await,
    }
}

async fn send_and_read(
    request: reqwest::RequestBuilder,
    method: &Method,
    url: &Url,
    timeout: Duration,
) -> Result<CachedResponse, LedgerError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(e, method, url, timeout))?;
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let text = response
        .text()
        .await
        .map_err(|e| classify_transport(e, method, url, timeout))?;

    if !status.is_success() {
        let (category, code) = classify_status(status.as_u16());
        let message: String = text.chars().take(ERROR_BODY_SNIPPET_LEN).collect();
        return Err(LedgerError::Status {
            status: status.as_u16(),
            category,
            code,
            message,
            method: method.to_string(),
            url: url.to_string(),
            retried: false,
            retry_count: 0,
        });
    }
    Ok(CachedResponse {
        content_type,
        body: text,
    })
}

fn classify_transport(
    error: reqwest::Error,
    method: &Method,
    url: &Url,
    timeout: Duration,
) -> LedgerError {
    if error.is_timeout() {
        LedgerError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
            method: method.to_string(),
            url: url.to_string(),
            retried: false,
            retry_count: 0,
        }
    } else {
        LedgerError::Transport {
            method: method.to_string(),
            url: url.to_string(),
            retried: false,
            retry_count: 0,
            source: error,
        }
    }
}

/// Resolve a logical path against the configured base URLs.
///
/// Absolute URLs pass through verbatim; otherwise the first path segment
/// selects a named base, falling back to the default base when no name
/// matches.
pub(crate) fn resolve_url(
    config: &ClientConfig,
    path: &str,
    params: &BTreeMap<String, Value>,
) -> Result<Url, LedgerError> {
    let mut url = if path.starts_with("http://") || path.starts_with("https://") {
        Url::parse(path)?
    } else {
        let trimmed = path.trim_start_matches('/');
        let (head, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        match config.base_urls.get(head) {
            Some(base) => join_base(base, rest)?,
            None => {
                let base = config.default_base.as_ref().ok_or_else(|| {
                    LedgerError::Internal(format!(
                        "no base URL configured for `{head}` and no default base set"
                    ))
                })?;
                join_base(base, trimmed)?
            }
        }
    };
    append_query(&mut url, params);
    Ok(url)
}

fn join_base(base: &Url, rest: &str) -> Result<Url, LedgerError> {
    let joined = if rest.is_empty() {
        base.as_str().trim_end_matches('/').to_owned()
    } else {
        format!("{}/{}", base.as_str().trim_end_matches('/'), rest)
    };
    Ok(Url::parse(&joined)?)
}

/// Serialize query parameters onto the URL. Scalars are stringified, arrays
/// repeat under `key[]`, objects are JSON-stringified into a single value,
/// and nulls are omitted entirely.
pub(crate) fn append_query(url: &mut Url, params: &BTreeMap<String, Value>) {
    if params.is_empty() {
        return;
    }
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    let array_key = format!("{key}[]");
                    for item in items {
                        if item.is_null() {
                            continue;
                        }
                        pairs.append_pair(&array_key, &scalar_text(item));
                    }
                }
                Value::Object(_) => {
                    pairs.append_pair(key, &value.to_string());
                }
                _ => {
                    pairs.append_pair(key, &scalar_text(value));
                }
            }
        }
    }
    // All-null params leave an empty query behind.
    if url.query() == Some("") {
        url.set_query(None);
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Merge headers in increasing precedence: defaults, client-wide, per-request.
/// Attaches the API key and, for mutating methods, exactly one idempotency key.
pub(crate) fn build_headers(
    config: &ClientConfig,
    method: &Method,
    options: &RequestOptions,
) -> Result<HeaderMap, LedgerError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

    for (name, value) in &config.default_headers {
        insert_header(&mut headers, name, value)?;
    }
    for (name, value) in &options.headers {
        insert_header(&mut headers, name, value)?;
    }

    if !headers.contains_key(header::AUTHORIZATION)
        && let Some(api_key) = &config.api_key
    {
        let value = HeaderValue::from_str(api_key).map_err(|_| LedgerError::InvalidHeader {
            name: "Authorization".into(),
        })?;
        headers.insert(header::AUTHORIZATION, value);
    }

    if config.idempotency_enabled && *method != Method::GET {
        let name = HeaderName::from_bytes(config.idempotency_header.as_bytes()).map_err(|_| {
            LedgerError::InvalidHeader {
                name: config.idempotency_header.clone(),
            }
        })?;
        if let Some(key) = &options.idempotency_key {
            let value = HeaderValue::from_str(key).map_err(|_| LedgerError::InvalidHeader {
                name: config.idempotency_header.clone(),
            })?;
            headers.insert(name, value);
        } else if !headers.contains_key(&name) {
            let generated = generate_idempotency_key();
            let value =
                HeaderValue::from_str(&generated).map_err(|_| LedgerError::InvalidHeader {
                    name: config.idempotency_header.clone(),
                })?;
            headers.insert(name, value);
        }
    }

    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), LedgerError> {
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| LedgerError::InvalidHeader {
            name: name.to_owned(),
        })?;
    let header_value = HeaderValue::from_str(value).map_err(|_| LedgerError::InvalidHeader {
        name: name.to_owned(),
    })?;
    headers.insert(header_name, header_value);
    Ok(())
}

/// Branch on content type: JSON deserializes as JSON, `text/*` and anything
/// else surfaces as text.
pub(crate) fn parse_body<T: DeserializeOwned>(response: &CachedResponse) -> Result<T, LedgerError> {
    if response.body.trim().is_empty() {
        return serde_json::from_value(Value::Null)
            .map_err(|e| LedgerError::Data(format!("failed to decode empty response: {e}")));
    }
    let is_json = response.content_type.starts_with("application/json")
        || response.content_type.contains("+json");
    if is_json {
        serde_json::from_str(&response.body)
            .map_err(|e| LedgerError::Data(format!("failed to decode response json: {e}")))
    } else {
        serde_json::from_value(Value::String(response.body.clone()))
            .map_err(|e| LedgerError::Data(format!("failed to decode response text: {e}")))
    }
}
