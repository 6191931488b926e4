use std::time::Duration;

pub(crate) const CLIENT_NAME: &str = concat!("ledgerkit-http/", env!("CARGO_PKG_VERSION"));

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_MAX_SOCKETS_PER_HOST: usize = 10;
pub(crate) const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_DNS_TTL: Duration = Duration::from_secs(300);

pub(crate) const DEFAULT_IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// How much of an error response body is kept in the error message.
pub(crate) const ERROR_BODY_SNIPPET_LEN: usize = 512;
