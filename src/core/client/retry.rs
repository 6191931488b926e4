use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::core::error::LedgerError;

/// Specifies the backoff strategy for retrying failed requests.
#[derive(Clone, Debug)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed(Duration),
    /// Uses an exponential delay between retries.
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before the retry following attempt `attempt` (0-based).
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let max_ms = max.as_millis() as f64;
                let raw_ms = (base.as_millis() as f64 * factor.powi(attempt as i32)).min(max_ms);
                let ms = if *jitter && raw_ms > 1.0 {
                    let span = raw_ms * 0.5;
                    let low = (raw_ms - span).max(0.0);
                    let high = raw_ms + span;
                    rand::rng().random_range(low..=high).min(max_ms)
                } else {
                    raw_ms
                };
                Duration::from_millis(ms.round() as u64)
            }
        }
    }
}

/// Caller-supplied override for retry eligibility.
///
/// When set, it is consulted instead of the built-in decision; delegate to
/// [`RetryConfig::default_should_retry`] from inside the closure to compose
/// with the default classification.
pub type RetryCondition = Arc<dyn Fn(&LedgerError) -> bool + Send + Sync>;

/// Configuration for the automatic retry mechanism.
#[derive(Clone)]
pub struct RetryConfig {
    /// Enables or disables the retry mechanism.
    pub enabled: bool,
    /// The maximum number of retries to attempt. The total number of attempts
    /// will be `max_retries + 1`.
    pub max_retries: u32,
    /// The backoff strategy to use between retries.
    pub backoff: Backoff,
    /// HTTP status codes that should trigger a retry.
    pub retry_on_status: Vec<u16>,
    /// Whether to retry on request timeouts.
    pub retry_on_timeout: bool,
    /// Whether to retry on connection-level transport errors.
    pub retry_on_connect: bool,
    /// Optional predicate overriding the built-in eligibility decision.
    pub retry_condition: Option<RetryCondition>,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("enabled", &self.enabled)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("retry_on_status", &self.retry_on_status)
            .field("retry_on_timeout", &self.retry_on_timeout)
            .field("retry_on_connect", &self.retry_on_connect)
            .field("retry_condition", &self.retry_condition.is_some())
            .finish()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(200),
                factor: 2.0,
                max: Duration::from_secs(2),
                jitter: true,
            },
            retry_on_status: vec![408, 429, 500, 502, 503, 504],
            retry_on_timeout: true,
            retry_on_connect: true,
            retry_condition: None,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The built-in eligibility decision: connection-level failures, timeouts
    /// and listed status codes retry; everything else propagates immediately.
    pub fn default_should_retry(&self, error: &LedgerError) -> bool {
        match error {
            LedgerError::Status { status, .. } => self.retry_on_status.contains(status),
            LedgerError::Timeout { .. } => self.retry_on_timeout,
            LedgerError::Transport { .. } => self.retry_on_connect,
            _ => false,
        }
    }

    pub(crate) fn should_retry(&self, error: &LedgerError) -> bool {
        match &self.retry_condition {
            Some(condition) => condition(error),
            None => self.default_should_retry(error),
        }
    }
}

/// Per-attempt instrumentation context handed to the `on_attempt` observer.
#[derive(Debug)]
pub struct RetryContext<'a> {
    /// 0 for the initial attempt, then the retry index.
    pub attempt: u32,
    pub max_retries: u32,
    /// Delay waited before this attempt (zero for the initial attempt).
    pub delay: Duration,
    /// The classified failure that triggered this retry, if any.
    pub error: Option<&'a LedgerError>,
}

/// Runs `operation` under the retry policy.
///
/// `on_attempt` fires once with attempt 0 before the first attempt, then once
/// per retry with the computed delay. The final failure propagates unwrapped
/// but carries retry metadata. Both the backoff wait and further attempts are
/// abandoned as soon as `cancel` fires.
pub(crate) async fn execute<T, F, Fut, O>(
    config: &RetryConfig,
    cancel: Option<&CancellationToken>,
    mut operation: F,
    mut on_attempt: O,
) -> Result<T, LedgerError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
    O: FnMut(&RetryContext<'_>),
{
    let max_retries = if config.enabled { config.max_retries } else { 0 };
    on_attempt(&RetryContext {
        attempt: 0,
        max_retries,
        delay: Duration::ZERO,
        error: None,
    });

    let mut attempt: u32 = 0;
    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.is_cancelled() || !config.should_retry(&error) || attempt >= max_retries {
            let mut error = error;
            error.set_retry_meta(attempt);
            return Err(error);
        }

        let delay = config.backoff.delay_for(attempt);
        attempt += 1;
        on_attempt(&RetryContext {
            attempt,
            max_retries,
            delay,
            error: Some(&error),
        });

        if let Some(token) = cancel {
            tokio::select! {
                () = token.cancelled() => return Err(error.into_cancelled(attempt)),
                () = tokio::time::sleep(delay) => {}
            }
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}
