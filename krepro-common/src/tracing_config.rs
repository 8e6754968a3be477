use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::SafeDisplay;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    pub json: bool,
    pub ansi: bool,
    pub default_level: String,
}

impl TracingConfig {
    /// The configuration used for local development and tests: plain, colored,
    /// line-oriented output at `info`.
    pub fn local_dev(service_name: impl Into<String>) -> Self {
        TracingConfig {
            service_name: service_name.into(),
            json: false,
            ansi: true,
            default_level: "info".to_string(),
        }
    }

    /// Installs the global `tracing` subscriber described by this config. Call
    /// once, at process startup, before constructing the composition root.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.default_level));

        let registry = Registry::default().with(filter);

        if self.json {
            let _ = registry
                .with(tracing_subscriber::fmt::layer().json().with_target(true))
                .try_init();
        } else {
            let _ = registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(self.ansi)
                        .with_target(true),
                )
                .try_init();
        }
    }
}

impl SafeDisplay for TracingConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "service name: {}", self.service_name);
        let _ = writeln!(&mut result, "format: {}", if self.json { "json" } else { "text" });
        let _ = writeln!(&mut result, "default level: {}", self.default_level);
        result
    }
}

/// Distinguishes routine (4xx) outcomes from unexpected (5xx) ones so error-rate
/// dashboards built from trace data don't page on expected client errors.
pub trait TraceErrorKind {
    fn trace_error_kind(&self) -> &'static str;
    fn is_expected(&self) -> bool;
}

/// The span and timer for one HTTP handler invocation, produced by
/// [`recorded_http_api_request!`] and consumed by [`RequestRecord::result`]
/// once the handler's inner call resolves. Kept separate from the handler's
/// own `#[instrument]`, if any, so the outer request span always records an
/// outcome even when the inner call is itself traced.
pub struct RequestRecord {
    pub span: tracing::Span,
    start: std::time::Instant,
}

impl RequestRecord {
    pub fn new(span: tracing::Span) -> Self {
        RequestRecord {
            span,
            start: std::time::Instant::now(),
        }
    }

    /// Records the outcome on the span and logs it, then returns the result
    /// unchanged so this can sit inline between the handler's inner call and
    /// its `?`/return.
    pub fn result<T, E: TraceErrorKind>(self, result: Result<T, E>) -> Result<T, E> {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.span.record("result", "success");
                tracing::debug!(parent: &self.span, elapsed_ms, "request completed");
            }
            Err(err) => {
                let kind = err.trace_error_kind();
                self.span.record("result", kind);
                if err.is_expected() {
                    tracing::info!(parent: &self.span, elapsed_ms, error_kind = kind, "request completed with an expected error");
                } else {
                    tracing::error!(parent: &self.span, elapsed_ms, error_kind = kind, "request completed with an unexpected error");
                }
            }
        }
        result
    }
}

/// Opens a named request span with the given fields plus an empty `result`
/// field to be filled in by [`RequestRecord::result`], and wraps it in a
/// [`RequestRecord`]. Mirrors the call-site shape of this codebase's HTTP
/// handlers: `let record = recorded_http_api_request!("name", field = value);`
/// followed by `.instrument(record.span.clone())` on the inner call and
/// `record.result(response)` on the way out.
#[macro_export]
macro_rules! recorded_http_api_request {
    ($name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::tracing_config::RequestRecord::new(
            tracing::info_span!(
                "http_api_request",
                name = $name,
                $($key = tracing::field::display(&$value),)*
                result = tracing::field::Empty
            )
        )
    };
}
