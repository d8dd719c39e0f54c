//! Runtime configuration loading from environment variables.
//!
//! All values come from `GG_STREAM_*` variables with sensible defaults.
//! Invalid values fall back to defaults without crashing, except an unknown
//! `GG_STREAM_BACKEND`, which [`EnvConfig::validate`] rejects.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GG_STREAM_N_CTX` | 2048 | Context window (tokens, floor 128) |
//! | `GG_STREAM_N_BATCH` | 256 | Batch capacity per session |
//! | `GG_STREAM_N_UBATCH` | 64 | Physical micro-batch (capped at `N_BATCH`) |
//! | `GG_STREAM_N_THREADS` | 0 | Worker threads (0 = auto) |
//! | `GG_STREAM_GPU_LAYERS` | auto | Layers to offload (`auto` or integer) |
//! | `GG_STREAM_BACKEND` | auto | cpu, vulkan, opencl, cuda, metal or auto |
//! | `GG_STREAM_CHUNK_SIZE` | 64 | Starting ingestion chunk (floor 16) |
//! | `GG_STREAM_WATCHDOG_MS` | 5000 | Decode watchdog threshold (ms, floor 1) |
//! | `GG_STREAM_STRIP_THINK` | false | Strip `<think>` spans from output |
//! | `GG_STREAM_MAX_LENGTH` | 256 | Default tokens to generate |
//! | `GG_STREAM_LOG_FORMAT` | json | json or pretty |
//! | `GG_STREAM_LOG_LEVEL` | info | Log filter directive |

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::engine::{
    BackendKind, ContextParams, GpuLayers, InferenceError, DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE,
};
use crate::telemetry::{LogConfig, LogFormat};

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_ubatch: u32,
    pub n_threads: u32,
    pub gpu_layers: String,
    pub backend: String,
    pub chunk_size: usize,
    pub watchdog_ms: u64,
    pub strip_think: bool,
    pub max_length: u32,
    pub log_format: String,
    pub log_level: String,
}

/// Context sizing loaded from env.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextEnvConfig {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_ubatch: u32,
    pub n_threads: u32,
}

impl Default for ContextEnvConfig {
    fn default() -> Self {
        Self { n_ctx: 2048, n_batch: 256, n_ubatch: 64, n_threads: 0 }
    }
}

impl ContextEnvConfig {
    /// Sizing for new contexts. Threads are resolved per session.
    pub fn params(&self) -> ContextParams {
        ContextParams {
            n_ctx: self.n_ctx,
            n_batch: self.n_batch,
            n_ubatch: self.n_ubatch,
            ..ContextParams::default()
        }
    }
}

/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub context: ContextEnvConfig,
    pub gpu_layers: GpuLayers,
    /// `None` lets the negotiator pick any accelerator.
    pub backend: Option<BackendKind>,
    /// Raw `GG_STREAM_BACKEND` value that named no known backend.
    pub invalid_backend: Option<String>,
    pub chunk_size: usize,
    pub watchdog: Duration,
    pub strip_think: bool,
    pub max_length: u32,
    pub log: LogConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            context: ContextEnvConfig::default(),
            gpu_layers: GpuLayers::Auto,
            backend: None,
            invalid_backend: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            watchdog: Duration::from_millis(5000),
            strip_think: false,
            max_length: 256,
            log: LogConfig::default(),
        }
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn load_context_config() -> ContextEnvConfig {
    let n_ctx = parse_u32("GG_STREAM_N_CTX", 2048).max(128);
    let n_batch = parse_u32("GG_STREAM_N_BATCH", 256).max(1);
    let n_ubatch = parse_u32("GG_STREAM_N_UBATCH", 64).clamp(1, n_batch);
    let n_threads = parse_u32("GG_STREAM_N_THREADS", 0);
    ContextEnvConfig { n_ctx, n_batch, n_ubatch, n_threads }
}

fn load_gpu_layers() -> GpuLayers {
    match std::env::var("GG_STREAM_GPU_LAYERS") {
        Ok(val) => val.parse::<GpuLayers>().unwrap_or_else(|e| {
            warn!(value = %val, error = %e, "Ignoring GG_STREAM_GPU_LAYERS");
            GpuLayers::Auto
        }),
        Err(_) => GpuLayers::Auto,
    }
}

/// Backend preference, or the raw value when it names no backend.
fn load_backend() -> Result<Option<BackendKind>, String> {
    let Ok(val) = std::env::var("GG_STREAM_BACKEND") else {
        return Ok(None);
    };
    if val.trim().eq_ignore_ascii_case("auto") || val.trim().is_empty() {
        return Ok(None);
    }
    match val.parse::<BackendKind>() {
        Ok(kind) => Ok(Some(kind)),
        Err(e) => {
            warn!(value = %val, error = %e, "Rejecting GG_STREAM_BACKEND");
            Err(val)
        }
    }
}

fn load_log_config() -> LogConfig {
    let format = std::env::var("GG_STREAM_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse::<LogFormat>().ok())
        .unwrap_or_default();
    let level = std::env::var("GG_STREAM_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    LogConfig { format, level, output_path: None }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let chunk_size = parse_usize("GG_STREAM_CHUNK_SIZE", DEFAULT_CHUNK_SIZE).max(MIN_CHUNK_SIZE);
    let watchdog_ms = parse_u64("GG_STREAM_WATCHDOG_MS", 5000).max(1);
    let max_length = parse_u32("GG_STREAM_MAX_LENGTH", 256).max(1);
    let (backend, invalid_backend) = match load_backend() {
        Ok(backend) => (backend, None),
        Err(raw) => (None, Some(raw)),
    };

    EnvConfig {
        context: load_context_config(),
        gpu_layers: load_gpu_layers(),
        backend,
        invalid_backend,
        chunk_size,
        watchdog: Duration::from_millis(watchdog_ms),
        strip_think: parse_bool("GG_STREAM_STRIP_THINK", false),
        max_length,
        log: load_log_config(),
    }
}

impl EnvConfig {
    /// Reject values that must not silently fall back.
    ///
    /// Callers check this before any backend call.
    pub fn validate(&self) -> Result<(), InferenceError> {
        match &self.invalid_backend {
            Some(raw) => Err(InferenceError::InvalidBackend(raw.trim().to_string())),
            None => Ok(()),
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            n_ctx: self.context.n_ctx,
            n_batch: self.context.n_batch,
            n_ubatch: self.context.n_ubatch,
            n_threads: self.context.n_threads,
            gpu_layers: self.gpu_layers.to_string(),
            backend: self.backend.map(|b| b.to_string()).unwrap_or_else(|| "auto".to_string()),
            chunk_size: self.chunk_size,
            watchdog_ms: u64::try_from(self.watchdog.as_millis()).unwrap_or(u64::MAX),
            strip_think: self.strip_think,
            max_length: self.max_length,
            log_format: self.log.format.as_str().to_string(),
            log_level: self.log.level.clone(),
        }
    }
}

/// Serializes env-mutating tests across modules.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) const ENV_KEYS: &[&str] = &[
    "GG_STREAM_N_CTX",
    "GG_STREAM_N_BATCH",
    "GG_STREAM_N_UBATCH",
    "GG_STREAM_N_THREADS",
    "GG_STREAM_GPU_LAYERS",
    "GG_STREAM_BACKEND",
    "GG_STREAM_CHUNK_SIZE",
    "GG_STREAM_WATCHDOG_MS",
    "GG_STREAM_STRIP_THINK",
    "GG_STREAM_MAX_LENGTH",
    "GG_STREAM_LOG_FORMAT",
    "GG_STREAM_LOG_LEVEL",
];
