use thiserror::Error;

/// Coarse classification of a failed request, for programmatic branching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-level failure (refused, reset, DNS, TLS).
    Network,
    /// The per-request or client default deadline expired.
    Timeout,
    /// The caller's cancellation signal fired.
    Cancelled,
    /// The server rejected the request shape (400/422).
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimit,
    /// Server-side failure (5xx) or an unclassified status.
    Internal,
    /// The response body could not be decoded.
    Data,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::RateLimit => "rate_limit",
            Self::Internal => "internal",
            Self::Data => "data",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an HTTP status code to its category and machine code.
pub(crate) const fn classify_status(status: u16) -> (ErrorCategory, &'static str) {
    match status {
        400 | 422 => (ErrorCategory::Validation, "validation_error"),
        401 => (ErrorCategory::Unauthorized, "unauthorized"),
        403 => (ErrorCategory::Forbidden, "forbidden"),
        404 => (ErrorCategory::NotFound, "not_found"),
        409 => (ErrorCategory::Conflict, "conflict"),
        429 => (ErrorCategory::RateLimit, "rate_limited"),
        s if s >= 500 => (ErrorCategory::Internal, "internal_server_error"),
        _ => (ErrorCategory::Internal, "unexpected_status"),
    }
}

/// The primary error type for all fallible operations in this crate.
///
/// Every request settles with at most one `LedgerError` carrying enough
/// context (category, code, status, retry metadata, cancelled flag) for the
/// caller to branch without inspecting a stack trace.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A connection-level failure reported by the transport.
    #[error("transport error for {method} {url}: {source}")]
    Transport {
        method: String,
        url: String,
        retried: bool,
        retry_count: u32,
        #[source]
        source: reqwest::Error,
    },

    /// The server returned a non-2xx status.
    #[error("unexpected response status {status} for {method} {url}: {message}")]
    Status {
        status: u16,
        category: ErrorCategory,
        code: &'static str,
        message: String,
        method: String,
        url: String,
        retried: bool,
        retry_count: u32,
    },

    /// The per-request (or client default) timeout expired.
    #[error("request timed out after {timeout_ms}ms for {method} {url}")]
    Timeout {
        timeout_ms: u64,
        method: String,
        url: String,
        retried: bool,
        retry_count: u32,
    },

    /// The caller's cancellation token fired before the request settled.
    #[error("request cancelled for {method} {url}")]
    Cancelled {
        method: String,
        url: String,
        retried: bool,
        retry_count: u32,
    },

    /// A provided URL could not be parsed.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A header name or value supplied by configuration or the caller was
    /// not a valid HTTP header.
    #[error("invalid header: {name}")]
    InvalidHeader { name: String },

    /// The response body was in an unexpected format.
    #[error("data format unexpected or missing field: {0}")]
    Data(String),

    /// Any failure not otherwise classified, wrapped rather than surfaced raw.
    #[error("internal client error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport { .. } => ErrorCategory::Network,
            Self::Status { category, .. } => *category,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::Url(_) | Self::InvalidHeader { .. } => ErrorCategory::Validation,
            Self::Data(_) => ErrorCategory::Data,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Stable machine code for the failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "network_error",
            Self::Status { code, .. } => code,
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Url(_) => "invalid_url",
            Self::InvalidHeader { .. } => "invalid_header",
            Self::Data(_) => "invalid_response",
            Self::Internal(_) => "internal_client_error",
        }
    }

    /// The HTTP status code, when the failure was status-derived.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether any retry was attempted before this failure propagated.
    pub fn retried(&self) -> bool {
        self.retry_count() > 0
    }

    /// Number of retries attempted (0 means the first attempt failed terminally).
    pub fn retry_count(&self) -> u32 {
        match self {
            Self::Transport { retry_count, .. }
            | Self::Status { retry_count, .. }
            | Self::Timeout { retry_count, .. }
            | Self::Cancelled { retry_count, .. } => *retry_count,
            _ => 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub(crate) fn set_retry_meta(&mut self, count: u32) {
        match self {
            Self::Transport {
                retried,
                retry_count,
                ..
            }
            | Self::Status {
                retried,
                retry_count,
                ..
            }
            | Self::Timeout {
                retried,
                retry_count,
                ..
            }
            | Self::Cancelled {
                retried,
                retry_count,
                ..
            } => {
                *retried = count > 0;
                *retry_count = count;
            }
            _ => {}
        }
    }

    /// Rewrite a failure observed during a backoff wait into a cancellation,
    /// preserving the method/URL context of the triggering error.
    pub(crate) fn into_cancelled(self, retry_count: u32) -> Self {
        let (method, url) = match &self {
            Self::Transport { method, url, .. }
            | Self::Status { method, url, .. }
            | Self::Timeout { method, url, .. }
            | Self::Cancelled { method, url, .. } => (method.clone(), url.clone()),
            _ => (String::new(), String::new()),
        };
        Self::Cancelled {
            method,
            url,
            retried: retry_count > 0,
            retry_count,
        }
    }
}
