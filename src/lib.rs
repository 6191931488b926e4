//! ledgerkit-http: resilient HTTP request core for ledger-platform services.
//!
//! Wraps [`reqwest`] with the behaviors a financial client needs on every
//! call: configurable retries with exponential backoff and jitter, automatic
//! idempotency keys on mutating requests, a GET response cache, an in-process
//! DNS cache, per-authority connection pooling with live stats, and
//! span-based observability hooks.
//!
//! ```no_run
//! use ledgerkit_http::{LedgerClient, RequestOptions};
//! use serde_json::{Value, json};
//! use url::Url;
//!
//! # async fn run() -> Result<(), ledgerkit_http::LedgerError> {
//! let client = LedgerClient::builder()
//!     .base_url("onboarding", Url::parse("https://onboarding.example.com/v1")?)
//!     .base_url("transaction", Url::parse("https://transaction.example.com/v1")?)
//!     .api_key("sk_test_123")
//!     .build()?;
//!
//! // Resolves against the `onboarding` base; retried on transient failures.
//! let org: Value = client
//!     .get("onboarding/organizations/org_123", RequestOptions::new())
//!     .await?;
//!
//! // Mutating requests get an idempotency key automatically.
//! let tx: Value = client
//!     .post(
//!         "transaction/transactions",
//!         &json!({"amount": 1000, "currency": "USD"}),
//!         RequestOptions::new(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use core::{
    Backoff, CacheMode, ConfigUpdate, ConnectionPoolStats, DnsCache, ErrorCategory, LedgerClient,
    LedgerClientBuilder, LedgerError, NoopObservability, Observability, PoolConfig, PoolCounts,
    RequestOptions, RetryCondition, RetryConfig, RetryContext, Span, TlsOptions, TransportConfig,
    generate_idempotency_key,
};

#[cfg(feature = "tracing")]
pub use core::TracingObservability;
