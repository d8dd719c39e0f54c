//! GG Stream
//!
//! Streaming text generation over a pre-loaded sequence model: backend
//! negotiation, chunked prompt ingestion, a watchdog-guarded decode loop
//! and UTF-8-safe text assembly with loop detection and think-tag
//! filtering.
//!
//! # Layout
//!
//! - [`engine`]: the generation core and the backend boundary
//! - [`models`]: model-file validation
//! - [`config`]: `GG_STREAM_*` environment configuration
//! - [`telemetry`]: logging, spans and metrics
//!
//! Process-wide state (negotiation, chunk size, live-session count) lives
//! in a [`RuntimeConfig`] that the host creates once and shares.

pub mod cli;
pub mod config;
pub mod engine;
pub mod models;
pub mod telemetry;

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::info;

use engine::{
    Accelerator, ActiveSessions, AdaptiveChunkSize, BackendKind, BackendNegotiator, ContextParams,
    DecodeConfig, FilterConfig, GpuLayers, InferenceBackend, InferenceError, LoadedModel,
    OffloadPreference, OffloadReport,
};

/// Process-wide generation state shared by every session.
#[derive(Debug)]
pub struct RuntimeConfig {
    negotiator: BackendNegotiator,
    chunk: AdaptiveChunkSize,
    sessions: ActiveSessions,
    strip_think: AtomicBool,
    context: ContextParams,
    decode: DecodeConfig,
    filter: FilterConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(ContextParams::default(), DecodeConfig::default(), FilterConfig::default())
    }
}

impl RuntimeConfig {
    pub fn new(context: ContextParams, decode: DecodeConfig, filter: FilterConfig) -> Self {
        Self {
            negotiator: BackendNegotiator::default(),
            chunk: AdaptiveChunkSize::default(),
            sessions: ActiveSessions::new(),
            strip_think: AtomicBool::new(filter.strip_think),
            context,
            decode,
            filter,
        }
    }

    /// Build from environment configuration.
    pub fn from_env(env: &config::EnvConfig) -> Self {
        let filter = FilterConfig { strip_think: env.strip_think, ..FilterConfig::default() };
        let mut runtime = Self::new(
            env.context.params(),
            DecodeConfig { watchdog: env.watchdog },
            filter,
        );
        runtime.negotiator = BackendNegotiator::new(env.backend, env.gpu_layers);
        runtime.chunk = AdaptiveChunkSize::new(env.chunk_size);
        runtime
    }

    /// Replace the starting chunk size.
    pub fn with_chunk_size(mut self, initial: usize) -> Self {
        self.chunk = AdaptiveChunkSize::new(initial);
        self
    }

    /// Replace the negotiator preferences.
    pub fn with_backend(mut self, preferred: Option<BackendKind>, gpu_layers: GpuLayers) -> Self {
        self.negotiator = BackendNegotiator::new(preferred, gpu_layers);
        self
    }

    pub fn negotiator(&self) -> &BackendNegotiator {
        &self.negotiator
    }

    pub fn chunk(&self) -> &AdaptiveChunkSize {
        &self.chunk
    }

    pub fn sessions(&self) -> &ActiveSessions {
        &self.sessions
    }

    pub fn active_sessions(&self) -> u32 {
        self.sessions.count()
    }

    pub fn context_defaults(&self) -> ContextParams {
        self.context
    }

    pub fn decode_config(&self) -> DecodeConfig {
        self.decode
    }

    /// Filter settings for a new assembler, with the current strip flag.
    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig { strip_think: self.structural_tag_filtering(), ..self.filter.clone() }
    }

    pub fn set_offload_preference(&self, layers: GpuLayers) {
        self.negotiator.set_gpu_layers(layers);
    }

    pub fn offload_report(&self) -> Option<OffloadReport> {
        self.negotiator.offload_report()
    }

    /// Toggle think-tag stripping. Applies from the next `begin_generation`.
    pub fn set_structural_tag_filtering(&self, enabled: bool) {
        self.strip_think.store(enabled, Ordering::SeqCst);
    }

    pub fn structural_tag_filtering(&self) -> bool {
        self.strip_think.load(Ordering::SeqCst)
    }

    /// Probe the backend's devices and decide the offload target.
    pub fn probe_and_configure<B: InferenceBackend>(&self, backend: &B) -> OffloadPreference {
        self.negotiator.probe_and_configure(backend.accelerators())
    }

    /// Probe, load a model and record the observed offload.
    pub fn load_model<B: InferenceBackend>(
        &self,
        backend: &B,
        path: &Path,
    ) -> Result<LoadedModel<B::Model>, InferenceError> {
        let preference = self.probe_and_configure(backend);
        let loaded = backend.load_model(path, preference.requested_layers)?;
        let report = self.negotiator.record_load(&loaded.telemetry);
        info!(
            path = %path.display(),
            offloaded = ?report.offloaded_layers,
            total = report.total_layers,
            forced_cpu = report.forced_cpu,
            "Model loaded"
        );
        Ok(loaded)
    }

    /// Switch backend family. Soft-fails while any session is live.
    pub fn switch_backend<B: InferenceBackend>(&self, backend: &B, target: BackendKind) -> bool {
        self.negotiator.switch_backend(target, backend.accelerators(), self.active_sessions())
    }

    /// Reset negotiated state and the chunk size. Refused while sessions are live.
    pub fn teardown(&self) -> Result<(), InferenceError> {
        let active = self.active_sessions();
        if active > 0 {
            return Err(InferenceError::BackendBusy { active });
        }
        self.negotiator.reset();
        self.chunk.reset();
        info!("Backend state torn down");
        Ok(())
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let report = self.offload_report();
        Diagnostics {
            backend: self
                .negotiator
                .preferred_backend()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "auto".to_string()),
            gpu_layers: self.negotiator.gpu_layers().to_string(),
            accelerators: self.negotiator.accelerators(),
            active_sessions: self.active_sessions(),
            offloaded_layers: report.and_then(|r| r.offloaded_layers),
            total_layers: report.map(|r| r.total_layers),
            forced_cpu: self.negotiator.forced_cpu(),
            kv_cache_mib: report.and_then(|r| r.kv_cache_bytes.map(|_| r.kv_cache_mib())),
            chunk_size: self.chunk.get(),
            strip_think: self.structural_tag_filtering(),
        }
    }
}

/// Snapshot of negotiation and engine state.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub backend: String,
    pub gpu_layers: String,
    pub accelerators: Vec<Accelerator>,
    pub active_sessions: u32,
    pub offloaded_layers: Option<u32>,
    pub total_layers: Option<u32>,
    pub forced_cpu: bool,
    pub kv_cache_mib: Option<f64>,
    pub chunk_size: usize,
    pub strip_think: bool,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "backend={} devices={} sessions={}",
            self.backend,
            self.accelerators.len(),
            self.active_sessions
        )?;
        match (self.offloaded_layers, self.total_layers) {
            (Some(done), Some(total)) => write!(f, " offload={done}/{total}")?,
            (None, Some(total)) => write!(f, " offload=?/{total}")?,
            _ => write!(f, " offload=n/a")?,
        }
        write!(f, " forced_cpu={}", self.forced_cpu)?;
        if let Some(mib) = self.kv_cache_mib {
            write!(f, " kv={mib:.1}MiB")?;
        }
        write!(f, " chunk={}", self.chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_refused_while_session_live() {
        let runtime = RuntimeConfig::default();
        let guard = runtime.sessions().acquire();
        let err = runtime.teardown().unwrap_err();
        assert!(matches!(err, InferenceError::BackendBusy { active: 1 }));
        drop(guard);
        assert!(runtime.teardown().is_ok());
    }

    #[test]
    fn test_teardown_resets_chunk_size() {
        let runtime = RuntimeConfig::default().with_chunk_size(128);
        runtime.chunk().degrade();
        runtime.teardown().unwrap();
        assert_eq!(runtime.chunk().get(), 128);
    }

    #[test]
    fn test_strip_flag_flows_into_filter_config() {
        let runtime = RuntimeConfig::default();
        assert!(!runtime.filter_config().strip_think);
        runtime.set_structural_tag_filtering(true);
        assert!(runtime.filter_config().strip_think);
    }

    #[test]
    fn test_diagnostics_line_before_load() {
        let runtime = RuntimeConfig::default();
        let line = runtime.diagnostics().to_string();
        assert!(line.starts_with("backend=auto"));
        assert!(line.contains("offload=n/a"));
        assert!(line.contains("chunk=64"));
    }
}
