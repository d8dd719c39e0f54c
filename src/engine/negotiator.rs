// Copyright 2024-2026 GG-CORE Contributors
// Licensed under the Apache License, Version 2.0

//! Backend negotiation: accelerator probing, offload targets, CPU fallback.
//!
//! The negotiator decides how many layers to request from the backend and
//! remembers what the last load actually achieved. When a load on an
//! accelerator-capable machine ends up with zero offloaded layers, the
//! session is flagged forced-CPU and contexts are created without K/Q/V
//! offload.

use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use super::backend::{Accelerator, ContextParams, LoadTelemetry};
use super::error::InferenceError;

/// Layer count requested in auto mode. The backend caps it to the model.
pub const MAX_OFFLOAD_LAYERS: u32 = 999;

/// Upper bound for explicit thread requests.
pub const MAX_THREADS: u32 = 16;

/// Compute backend families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Cpu,
    Vulkan,
    OpenCl,
    Cuda,
    Metal,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "CPU"),
            BackendKind::Vulkan => write!(f, "Vulkan"),
            BackendKind::OpenCl => write!(f, "OpenCL"),
            BackendKind::Cuda => write!(f, "CUDA"),
            BackendKind::Metal => write!(f, "Metal"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "vulkan" => Ok(Self::Vulkan),
            "opencl" => Ok(Self::OpenCl),
            "cuda" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            other => Err(InferenceError::InvalidBackend(other.to_string())),
        }
    }
}

/// Host offload preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuLayers {
    /// Request maximal offload and let the backend cap it.
    #[default]
    Auto,
    Fixed(u32),
}

impl GpuLayers {
    /// Convert a signed host value. Negative values floor to zero.
    pub fn from_signed(layers: i64) -> Self {
        Self::Fixed(u32::try_from(layers.max(0)).unwrap_or(u32::MAX))
    }
}

impl fmt::Display for GpuLayers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuLayers::Auto => write!(f, "auto"),
            GpuLayers::Fixed(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for GpuLayers {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse::<i64>()
            .map(Self::from_signed)
            .map_err(|_| InferenceError::InputValidation(format!("gpu layers: {s}")))
    }
}

/// Outcome of a probe: what the next model load should request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OffloadPreference {
    pub requested_layers: u32,
    /// Device the layers are expected to land on.
    pub accelerator: Option<Accelerator>,
}

/// What the most recent load actually achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OffloadReport {
    /// `None` when the load did not report what it achieved.
    pub offloaded_layers: Option<u32>,
    pub total_layers: u32,
    pub forced_cpu: bool,
    pub kv_cache_bytes: Option<u64>,
}

impl OffloadReport {
    pub fn kv_cache_mib(&self) -> f64 {
        self.kv_cache_bytes.map(|b| b as f64 / (1024.0 * 1024.0)).unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
struct NegotiatorState {
    /// `None` lets any offload-capable device win.
    preferred: Option<BackendKind>,
    gpu_layers: GpuLayers,
    accelerators: Vec<Accelerator>,
    forced_cpu: bool,
    report: Option<OffloadReport>,
}

impl NegotiatorState {
    fn usable_accelerator(&self) -> Option<&Accelerator> {
        match self.preferred {
            Some(BackendKind::Cpu) => None,
            Some(kind) => self.accelerators.iter().find(|a| a.kind == kind && a.can_offload()),
            None => self.accelerators.iter().find(|a| a.can_offload()),
        }
    }
}

/// Process-wide negotiation state.
#[derive(Debug, Default)]
pub struct BackendNegotiator {
    state: RwLock<NegotiatorState>,
}

impl BackendNegotiator {
    pub fn new(preferred: Option<BackendKind>, gpu_layers: GpuLayers) -> Self {
        Self {
            state: RwLock::new(NegotiatorState { preferred, gpu_layers, ..Default::default() }),
        }
    }

    /// Record the visible devices and decide the offload target for the next load.
    ///
    /// Missing accelerators are a capability absence, not an error. The
    /// forced-CPU flag from any earlier load is cleared here.
    pub fn probe_and_configure(&self, accelerators: Vec<Accelerator>) -> OffloadPreference {
        let mut state = self.state.write();
        state.accelerators = accelerators;
        state.forced_cpu = false;

        let accelerator = state.usable_accelerator().cloned();
        let requested_layers = match (state.gpu_layers, state.preferred) {
            (_, Some(BackendKind::Cpu)) => 0,
            (GpuLayers::Auto, _) if accelerator.is_some() => MAX_OFFLOAD_LAYERS,
            (GpuLayers::Auto, _) => 0,
            (GpuLayers::Fixed(n), _) => n,
        };

        info!(
            requested_layers,
            accelerator = accelerator.as_ref().map(|a| a.name.as_str()).unwrap_or("none"),
            devices = state.accelerators.len(),
            "Offload target negotiated"
        );
        OffloadPreference { requested_layers, accelerator }
    }

    /// Store the structured telemetry of a completed load.
    ///
    /// Only an observed count of zero forces CPU; an unknown count leaves
    /// the session on the accelerator.
    pub fn record_load(&self, telemetry: &LoadTelemetry) -> OffloadReport {
        let mut state = self.state.write();
        let accelerator_capable = state.usable_accelerator().is_some();
        if accelerator_capable && telemetry.offloaded_layers.is_none() {
            warn!(
                total_layers = telemetry.total_layers,
                "Offloaded layer count not observed for this load"
            );
        }
        let forced_cpu = accelerator_capable
            && telemetry.offloaded_layers == Some(0)
            && telemetry.total_layers > 0;
        if forced_cpu {
            warn!(
                total_layers = telemetry.total_layers,
                "No layers offloaded on an accelerator system, forcing CPU session"
            );
        }
        state.forced_cpu = forced_cpu;
        let report = OffloadReport {
            offloaded_layers: telemetry.offloaded_layers,
            total_layers: telemetry.total_layers,
            forced_cpu,
            kv_cache_bytes: telemetry.kv_cache_bytes,
        };
        state.report = Some(report);
        report
    }

    /// Update the KV-cache size once a context reports it.
    pub fn record_kv_cache(&self, bytes: u64) {
        if let Some(report) = self.state.write().report.as_mut() {
            report.kv_cache_bytes = Some(bytes);
        }
    }

    /// Last load's report. `None` until a model has loaded.
    pub fn offload_report(&self) -> Option<OffloadReport> {
        self.state.read().report
    }

    pub fn forced_cpu(&self) -> bool {
        self.state.read().forced_cpu
    }

    pub fn set_gpu_layers(&self, layers: GpuLayers) {
        self.state.write().gpu_layers = layers;
    }

    pub fn gpu_layers(&self) -> GpuLayers {
        self.state.read().gpu_layers
    }

    pub fn preferred_backend(&self) -> Option<BackendKind> {
        self.state.read().preferred
    }

    pub fn accelerators(&self) -> Vec<Accelerator> {
        self.state.read().accelerators.clone()
    }

    /// Switch the preferred backend family.
    ///
    /// Soft-fails (returns false) while sessions are active or when the
    /// target accelerator is not among `available`.
    pub fn switch_backend(
        &self,
        target: BackendKind,
        available: Vec<Accelerator>,
        active_sessions: u32,
    ) -> bool {
        if active_sessions > 0 {
            warn!(%target, active_sessions, "Backend switch refused while sessions are active");
            return false;
        }
        let present = target == BackendKind::Cpu
            || available.iter().any(|a| a.kind == target && a.can_offload());
        if !present {
            warn!(%target, "Backend switch refused, accelerator not available");
            return false;
        }
        let mut state = self.state.write();
        state.preferred = Some(target);
        state.accelerators = available;
        state.forced_cpu = false;
        info!(%target, "Backend switched");
        true
    }

    /// Context sizing for a new session.
    pub fn context_params(&self, sizing: &ContextParams, requested_threads: u32) -> ContextParams {
        let state = self.state.read();
        let offload_kqv = state.usable_accelerator().is_some() && !state.forced_cpu;
        ContextParams {
            n_ctx: sizing.n_ctx,
            n_batch: sizing.n_batch.max(1),
            n_ubatch: sizing.n_ubatch.clamp(1, sizing.n_batch.max(1)),
            n_threads: resolve_threads(requested_threads),
            offload_kqv,
        }
    }

    /// Forget everything negotiated since start-up. Keeps host preferences.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.accelerators.clear();
        state.forced_cpu = false;
        state.report = None;
    }
}

/// Worker thread count for a context.
///
/// `0` selects automatically: two cores are left to the host, within `[4, 8]`.
/// Explicit values are clamped to `[1, MAX_THREADS]`.
pub fn resolve_threads(requested: u32) -> i32 {
    let threads = if requested == 0 {
        let cpus = u32::try_from(num_cpus::get()).unwrap_or(4);
        cpus.saturating_sub(2).clamp(4, 8)
    } else {
        requested.clamp(1, MAX_THREADS)
    };
    i32::try_from(threads).unwrap_or(4)
}
