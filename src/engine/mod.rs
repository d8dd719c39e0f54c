//! Streaming generation engine.
//!
//! Negotiates the compute backend, ingests prompts in adaptive chunks,
//! runs the token-by-token decode loop and turns raw token pieces into
//! filtered text fragments.

pub mod assembler;
pub mod backend;
pub mod chunk;
pub mod config;
pub mod decode;
pub mod error;
pub mod filter;
pub mod negotiator;
pub mod output;
pub mod prefill;
pub mod quantize;
pub mod session;
pub mod streaming;

#[cfg(feature = "gguf")]
pub mod gguf;

pub use assembler::{Assembled, TextAssembler};
pub use backend::{
    Accelerator, Batch, BatchEntry, BackendContext, ContextParams, DeviceClass, InferenceBackend,
    LoadTelemetry, LoadedModel, Token,
};
pub use chunk::{AdaptiveChunkSize, DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use config::{GenerationConfig, SamplerConfig};
pub use decode::{DecodeConfig, DecodeExecutor};
pub use error::InferenceError;
pub use filter::{
    FilterConfig, HintReasoningClassifier, LoopDetector, MarkerLoopDetector, ReasoningClassifier,
    ReasoningSplit, ReasoningSplitter, ThinkTagStripper,
};
pub use negotiator::{
    resolve_threads, BackendKind, BackendNegotiator, GpuLayers, OffloadPreference, OffloadReport,
    MAX_OFFLOAD_LAYERS,
};
pub use output::{FinishReason, GenerationResult, GenerationStats, GenerationStep};
pub use prefill::{PrefillExecutor, PrefillResult};
pub use quantize::{QuantType, QUANT_TYPES};
pub use session::{
    create_session, create_session_with, ActiveSessions, Session, SessionGuard, SessionOptions,
};
pub use streaming::{FragmentSender, FragmentStream, StreamEvent, StreamSendError};

#[cfg(feature = "gguf")]
pub use gguf::{GgufBackend, GgufContext};
