//! Engine metrics through the `metrics` facade.
//!
//! No exporter is installed here. Every value is also mirrored into
//! [`MetricsStore::global`].

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

use super::store::MetricsStore;

pub const FRAGMENTS_EMITTED: &str = "gg_stream_fragments_emitted_total";
pub const DECODE_FAILURES: &str = "gg_stream_decode_failures_total";
pub const WATCHDOG_TRIPS: &str = "gg_stream_watchdog_trips_total";
pub const INGEST_RETRIES: &str = "gg_stream_ingest_retries_total";
pub const LOOP_DISCARDS: &str = "gg_stream_loop_discards_total";
pub const GENERATIONS: &str = "gg_stream_generations_total";
pub const CHUNK_SIZE: &str = "gg_stream_chunk_size";
pub const ACTIVE_SESSIONS: &str = "gg_stream_active_sessions";
pub const DECODE_LATENCY: &str = "gg_stream_decode_latency_seconds";
pub const TOKENS_PER_SECOND: &str = "gg_stream_tokens_per_second";

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(FRAGMENTS_EMITTED, "Fragments returned by successful decode steps");
    describe_counter!(DECODE_FAILURES, "Backend decode failures by stage");
    describe_counter!(WATCHDOG_TRIPS, "Decode calls that exceeded the watchdog");
    describe_counter!(INGEST_RETRIES, "Prompt chunks retried after a smaller chunk size");
    describe_counter!(LOOP_DISCARDS, "Generations ended by the repetition heuristic");
    describe_counter!(GENERATIONS, "Completed generate/stream calls");
    describe_gauge!(CHUNK_SIZE, "Current adaptive ingestion chunk size");
    describe_gauge!(ACTIVE_SESSIONS, "Sessions currently holding a context");
    describe_histogram!(DECODE_LATENCY, Unit::Seconds, "Latency of single-token decode calls");
    describe_histogram!(TOKENS_PER_SECOND, "Generation throughput per call");
}

pub fn record_fragment() {
    counter!(FRAGMENTS_EMITTED).increment(1);
    MetricsStore::global().increment_counter(FRAGMENTS_EMITTED, 1);
}

/// `stage` is one of `ingest`, `step` or `piece`.
pub fn record_decode_failure(stage: &'static str) {
    counter!(DECODE_FAILURES, "stage" => stage).increment(1);
    let store = MetricsStore::global();
    store.increment_counter(DECODE_FAILURES, 1);
    store.increment_counter(&format!("{DECODE_FAILURES}.{stage}"), 1);
}

pub fn record_watchdog_trip() {
    counter!(WATCHDOG_TRIPS).increment(1);
    MetricsStore::global().increment_counter(WATCHDOG_TRIPS, 1);
}

pub fn record_ingest_retry() {
    counter!(INGEST_RETRIES).increment(1);
    MetricsStore::global().increment_counter(INGEST_RETRIES, 1);
}

pub fn record_loop_discard() {
    counter!(LOOP_DISCARDS).increment(1);
    MetricsStore::global().increment_counter(LOOP_DISCARDS, 1);
}

pub fn record_chunk_size(size: usize) {
    gauge!(CHUNK_SIZE).set(size as f64);
    MetricsStore::global().set_gauge(CHUNK_SIZE, size as f64);
}

pub fn record_active_sessions(count: u32) {
    gauge!(ACTIVE_SESSIONS).set(f64::from(count));
    MetricsStore::global().set_gauge(ACTIVE_SESSIONS, f64::from(count));
}

pub fn record_decode_latency(elapsed: Duration) {
    histogram!(DECODE_LATENCY).record(elapsed.as_secs_f64());
    MetricsStore::global().record_histogram(DECODE_LATENCY, elapsed.as_secs_f64());
}

pub fn record_generation(tokens: u32, elapsed: Duration) {
    counter!(GENERATIONS).increment(1);
    let store = MetricsStore::global();
    store.increment_counter(GENERATIONS, 1);
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        let rate = f64::from(tokens) / secs;
        histogram!(TOKENS_PER_SECOND).record(rate);
        store.record_histogram(TOKENS_PER_SECOND, rate);
    }
}
