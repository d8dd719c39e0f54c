//! Engine metrics mirrored into the in-process store.
//!
//! Tests in this binary share the global store, so counters are compared
//! as deltas.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{params, MockBackend, MockModel, Script};
use gg_stream::engine::{create_session, DecodeConfig, FilterConfig, GenerationConfig};
use gg_stream::telemetry::{
    record_decode_failure, record_decode_latency, GenerationSpan, LogConfig, LogFormat,
    MetricsStore, ACTIVE_SESSIONS, DECODE_FAILURES, DECODE_LATENCY, FRAGMENTS_EMITTED,
    GENERATIONS, INGEST_RETRIES, LOOP_DISCARDS,
};
use gg_stream::RuntimeConfig;

fn counter(name: &str) -> u64 {
    MetricsStore::global().snapshot().counter(name)
}

#[test]
fn test_generation_updates_counters() {
    let before_fragments = counter(FRAGMENTS_EMITTED);
    let before_generations = counter(GENERATIONS);

    let backend = MockBackend::new(Script::text(&["a", "b", "c"]));
    let runtime = Arc::new(RuntimeConfig::new(
        params(256, 32, 16),
        DecodeConfig::default(),
        FilterConfig::default(),
    ));
    let mut session = create_session(&backend, &MockModel, &runtime, 0).unwrap();
    session.generate("Hi", &GenerationConfig::default()).unwrap();

    assert!(counter(FRAGMENTS_EMITTED) >= before_fragments + 3);
    assert!(counter(GENERATIONS) >= before_generations + 1);
}

#[test]
fn test_ingest_retry_counted() {
    let before = counter(INGEST_RETRIES);

    let mut script = Script::text(&["ok"]);
    script.max_batch = Some(20);
    let backend = MockBackend::new(script);
    let runtime = Arc::new(RuntimeConfig::new(
        params(256, 64, 64),
        DecodeConfig::default(),
        FilterConfig::default(),
    ));
    let mut session = create_session(&backend, &MockModel, &runtime, 0).unwrap();
    session.generate(&"x".repeat(40), &GenerationConfig::default()).unwrap();

    assert!(counter(INGEST_RETRIES) >= before + 2);
}

#[test]
fn test_loop_discard_counted() {
    let before = counter(LOOP_DISCARDS);

    let backend = MockBackend::new(Script::endless("I apologize, but I cannot "));
    let runtime = Arc::new(RuntimeConfig::new(
        params(256, 32, 16),
        DecodeConfig::default(),
        FilterConfig::default(),
    ));
    let mut session = create_session(&backend, &MockModel, &runtime, 0).unwrap();
    session.generate("Hi", &GenerationConfig::default()).unwrap();

    assert!(counter(LOOP_DISCARDS) >= before + 1);
}

#[test]
fn test_decode_failures_tracked_by_stage() {
    let before_total = counter(DECODE_FAILURES);
    let stage = format!("{DECODE_FAILURES}.step");
    let before_stage = counter(&stage);

    record_decode_failure("step");

    assert!(counter(DECODE_FAILURES) > before_total);
    assert!(counter(&stage) > before_stage);
}

#[test]
fn test_decode_latency_histogram() {
    record_decode_latency(Duration::from_millis(5));

    let snapshot = MetricsStore::global().snapshot();
    let summary = snapshot.histograms.get(DECODE_LATENCY).copied().unwrap();
    assert!(summary.count >= 1);
    assert!(summary.max >= 0.005);
}

#[test]
fn test_active_sessions_gauge_present() {
    let backend = MockBackend::new(Script::default());
    let runtime = Arc::new(RuntimeConfig::default());
    let session = create_session(&backend, &MockModel, &runtime, 0).unwrap();
    drop(session);

    assert!(MetricsStore::global().snapshot().gauge(ACTIVE_SESSIONS).is_some());
}

#[test]
fn test_snapshot_serializes() {
    record_decode_failure("ingest");
    let json = serde_json::to_value(MetricsStore::global().snapshot()).unwrap();
    assert!(json["counters"].is_object());
    assert!(json["histograms"].is_object());
}

#[test]
fn test_generation_span_and_log_config() {
    let span = GenerationSpan::new("session-1", 16);
    let _entered = span.enter();

    let config = LogConfig::default();
    assert_eq!(config.format, LogFormat::Json);
    assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
}
