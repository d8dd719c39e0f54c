//! Telemetry: structured logging, generation spans and metrics.
//!
//! Nothing here opens a network connection. Hosts that want metrics
//! exported install their own `metrics` recorder.

mod logging;
mod metrics;
mod offload;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    describe_metrics, record_active_sessions, record_chunk_size, record_decode_failure,
    record_decode_latency, record_fragment, record_generation, record_ingest_retry,
    record_loop_discard, record_watchdog_trip,
};
pub use self::metrics::{
    ACTIVE_SESSIONS, CHUNK_SIZE, DECODE_FAILURES, DECODE_LATENCY, FRAGMENTS_EMITTED, GENERATIONS,
    INGEST_RETRIES, LOOP_DISCARDS, TOKENS_PER_SECOND, WATCHDOG_TRIPS,
};
pub use offload::{capture_offload, parse_offload_line, OffloadCount, OffloadLogLayer};
pub use spans::{GenerationSpan, SpanExt};
pub use store::{HistogramSummary, MetricsSnapshot, MetricsStore};
