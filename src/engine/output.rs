//! Generation output types.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Reason why text generation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Model emitted an end-of-generation or end-of-text token.
    Stop,
    /// Cursor reached the requested maximum length.
    MaxTokens,
    /// Cursor reached the context window.
    ContextFull,
    /// Reconstructed text contained an end-of-turn marker or stop sequence.
    StopSequence,
    /// The repetition heuristic fired.
    LoopDetected,
    /// A single decode call exceeded the watchdog threshold.
    Timeout,
    /// The backend rejected a decode call.
    DecodeFailed,
    /// The consumer went away.
    Cancelled,
}

impl FinishReason {
    /// True for endings caused by degradation rather than the model or the caller.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Timeout | Self::DecodeFailed)
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stop => "stop",
            Self::MaxTokens => "max_tokens",
            Self::ContextFull => "context_full",
            Self::StopSequence => "stop_sequence",
            Self::LoopDetected => "loop_detected",
            Self::Timeout => "timeout",
            Self::DecodeFailed => "decode_failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One step of the decode loop as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationStep {
    /// Valid, filtered text. Empty when the piece was held or stripped.
    Fragment(String),
    /// The loop stopped. The stopping step emits no fragment; text held
    /// back by earlier steps comes out as `tail`.
    End { reason: FinishReason, tail: Option<String> },
}

impl GenerationStep {
    /// An end with nothing left to flush.
    pub fn end(reason: FinishReason) -> Self {
        Self::End { reason, tail: None }
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        match self {
            Self::Fragment(_) => None,
            Self::End { reason, .. } => Some(*reason),
        }
    }
}

/// Timing for a finished generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GenerationStats {
    pub prompt_tokens: usize,
    pub elapsed_ms: u64,
    pub tokens_per_second: f64,
}

impl GenerationStats {
    pub fn new(prompt_tokens: usize, tokens_generated: u32, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let tokens_per_second = if secs > 0.0 { f64::from(tokens_generated) / secs } else { 0.0 };
        Self {
            prompt_tokens,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            tokens_per_second,
        }
    }
}

/// Result of a complete generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    /// Concatenation of every emitted fragment.
    pub text: String,
    /// Number of steps that returned a fragment, empty ones included.
    /// A flushed tail is not a step.
    pub fragments: usize,
    /// Number of tokens fed back into the context.
    pub tokens_generated: u32,
    pub finish_reason: FinishReason,
    pub stats: GenerationStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_reasons() {
        assert!(FinishReason::Timeout.is_degraded());
        assert!(FinishReason::DecodeFailed.is_degraded());
        assert!(!FinishReason::Stop.is_degraded());
        assert!(!FinishReason::LoopDetected.is_degraded());
    }

    #[test]
    fn test_end_step_reason() {
        assert_eq!(GenerationStep::end(FinishReason::Stop).finish_reason(), Some(FinishReason::Stop));
        assert_eq!(GenerationStep::Fragment("a".into()).finish_reason(), None);
    }

    #[test]
    fn test_stats_rate() {
        let stats = GenerationStats::new(3, 10, Duration::from_millis(500));
        assert_eq!(stats.elapsed_ms, 500);
        assert!((stats.tokens_per_second - 20.0).abs() < 1e-9);
        assert_eq!(GenerationStats::new(0, 5, Duration::ZERO).tokens_per_second, 0.0);
    }

    #[test]
    fn test_finish_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FinishReason::LoopDetected).unwrap();
        assert_eq!(json, "\"loop_detected\"");
        assert_eq!(FinishReason::MaxTokens.to_string(), "max_tokens");
    }
}
