//! Core components of the `ledgerkit-http` client.
//!
//! This module contains the foundational building blocks of the library, including:
//! - The main [`LedgerClient`] and its builder.
//! - The primary [`LedgerError`] type and its category taxonomy.
//! - The retry policy and backoff machinery.
//! - The connection-pooled transport, DNS cache, and GET response cache.

/// Response cache for GET requests and the per-request [`CacheMode`].
pub mod cache;
/// The main client (`LedgerClient`), builder, and request orchestration.
pub mod client;
/// In-process DNS cache plugged into the transport resolver.
pub mod dns;
/// The primary error type (`LedgerError`) for the crate.
pub mod error;
/// Span-based observability hooks.
pub mod observe;
/// Connection pools, TLS options, and socket bookkeeping.
pub mod transport;

// convenient re-exports so most code can just `use crate::core::LedgerClient`
pub use cache::CacheMode;
pub use client::idempotency::generate_idempotency_key;
pub use client::retry::{Backoff, RetryCondition, RetryConfig, RetryContext};
pub use client::{ConfigUpdate, LedgerClient, LedgerClientBuilder, RequestOptions};
pub use dns::DnsCache;
pub use error::{ErrorCategory, LedgerError};
pub use observe::{NoopObservability, Observability, Span};
pub use transport::{ConnectionPoolStats, PoolConfig, PoolCounts, TlsOptions, TransportConfig};

#[cfg(feature = "tracing")]
pub use observe::TracingObservability;
