//! Span utilities for generation tracing.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for per-generation spans.
pub struct GenerationSpan;

impl GenerationSpan {
    /// Create a generation span.
    ///
    /// `status`, `error.message`, `finish_reason`, `tokens_generated` and
    /// `latency_ms` are filled in when the generation ends.
    pub fn new(session_id: &str, max_new_tokens: u32) -> Span {
        info_span!(
            "generation",
            session_id = %session_id,
            max_new_tokens,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            finish_reason = tracing::field::Empty,
            tokens_generated = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
