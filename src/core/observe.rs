use crate::core::error::LedgerError;

/// One logical request's trace record.
///
/// The orchestrator starts exactly one span per logical request, sets the URL
/// and retry attributes on it, marks it ok or records the failure, and ends
/// it exactly once regardless of how many physical attempts occurred.
pub trait Span: Send {
    fn set_attribute(&mut self, key: &str, value: &str);
    fn record_exception(&mut self, error: &LedgerError);
    fn set_status(&mut self, ok: bool, description: &str);
    fn end(&mut self);
}

/// Span factory injected at client construction.
///
/// When no provider is configured the client uses [`NoopObservability`], so
/// the request path never branches on provider presence.
pub trait Observability: Send + Sync {
    fn start_span(&self, name: &str) -> Box<dyn Span>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObservability;

struct NoopSpan;

impl Span for NoopSpan {
    fn set_attribute(&mut self, _key: &str, _value: &str) {}
    fn record_exception(&mut self, _error: &LedgerError) {}
    fn set_status(&mut self, _ok: bool, _description: &str) {}
    fn end(&mut self) {}
}

impl Observability for NoopObservability {
    fn start_span(&self, _name: &str) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

/// Emits spans as `tracing` events.
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObservability;

#[cfg(feature = "tracing")]
struct TracingSpan {
    name: String,
    attributes: Vec<(String, String)>,
    ok: Option<bool>,
    ended: bool,
}

#[cfg(feature = "tracing")]
impl Span for TracingSpan {
    fn set_attribute(&mut self, key: &str, value: &str) {
        self.attributes.push((key.to_owned(), value.to_owned()));
    }

    fn record_exception(&mut self, error: &LedgerError) {
        tracing::error!(
            span = %self.name,
            category = %error.category(),
            code = error.code(),
            retried = error.retried(),
            retry_count = error.retry_count(),
            "request failed: {error}"
        );
    }

    fn set_status(&mut self, ok: bool, description: &str) {
        self.ok = Some(ok);
        if !ok && !description.is_empty() {
            tracing::debug!(span = %self.name, status = description, "span status");
        }
    }

    fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        tracing::debug!(
            span = %self.name,
            ok = self.ok.unwrap_or(true),
            attributes = ?self.attributes,
            "span end"
        );
    }
}

#[cfg(feature = "tracing")]
impl Observability for TracingObservability {
    fn start_span(&self, name: &str) -> Box<dyn Span> {
        Box::new(TracingSpan {
            name: name.to_owned(),
            attributes: Vec::new(),
            ok: None,
            ended: false,
        })
    }
}
