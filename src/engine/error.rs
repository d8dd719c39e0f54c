//! Inference error types for the streaming engine.
//!
//! Only fatal-to-call conditions cross the host boundary. Recoverable
//! degradation (ingestion retries, watchdog trips) is absorbed internally and
//! surfaces as a `FinishReason`, never as one of these.

use thiserror::Error;

/// Errors that can occur during generation operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Context creation failed: {0}")]
    ContextCreate(String),

    #[error("Tokenization failed: {0}")]
    Tokenize(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Batch full: capacity {capacity}")]
    BatchFull { capacity: usize },

    #[error("Input validation failed: {0}")]
    InputValidation(String),

    #[error("Unknown backend: {0}")]
    InvalidBackend(String),

    #[error("Unknown quantization type: {0}")]
    InvalidQuantType(String),

    #[error("Backend busy: {active} session(s) still active")]
    BackendBusy { active: u32 },

    #[error("Session {0} is closed")]
    SessionClosed(String),

    #[error("Invalid model format: {0}")]
    InvalidFormat(String),
}

impl InferenceError {
    /// Returns true if the host call must fail without retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ModelLoad(_) | Self::ContextCreate(_) | Self::InvalidFormat(_)
        )
    }

    /// Returns true if this error was raised while parsing host configuration,
    /// before any backend call was made.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidBackend(_) | Self::InvalidQuantType(_) | Self::InputValidation(_)
        )
    }
}
