//! llama-cpp-2 implementation of the backend boundary.
//!
//! Model loading, context creation, decode and sampling via the
//! llama-cpp-2 Rust bindings.

use std::num::NonZeroU32;
use std::path::Path;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::{
    list_llama_ggml_backend_devices, send_logs_to_tracing, LlamaBackendDeviceType, LogOptions,
    TokenToStringError,
};
use tracing::debug;

use super::EOT_MARKERS;
use crate::engine::backend::{
    Accelerator, Batch, BackendContext, ContextParams, DeviceClass, InferenceBackend,
    LoadTelemetry, LoadedModel, Token,
};
use crate::engine::config::SamplerConfig;
use crate::engine::{BackendKind, InferenceError};
use crate::models::validate_model_file;
use crate::telemetry::capture_offload;

/// Initial buffer for token pieces; most pieces are a few bytes.
const PIECE_BUFFER: usize = 32;

/// Process-wide llama.cpp backend.
pub struct GgufBackend {
    backend: LlamaBackend,
}

impl GgufBackend {
    /// Initialise llama.cpp. Only one instance may exist per process.
    ///
    /// llama.cpp logs are routed into `tracing`; the offload count of each
    /// load is read from them.
    pub fn init() -> Result<Self, InferenceError> {
        send_logs_to_tracing(LogOptions::default());
        let backend = LlamaBackend::init()
            .map_err(|e| InferenceError::ModelLoad(format!("backend init: {e}")))?;
        Ok(Self { backend })
    }
}

impl InferenceBackend for GgufBackend {
    type Model = LlamaModel;
    type Context<'m> = GgufContext<'m> where Self: 'm;

    fn accelerators(&self) -> Vec<Accelerator> {
        list_llama_ggml_backend_devices()
            .into_iter()
            .map(|device| {
                let class = match device.device_type {
                    LlamaBackendDeviceType::Cpu => DeviceClass::Cpu,
                    LlamaBackendDeviceType::Gpu => DeviceClass::Gpu,
                    LlamaBackendDeviceType::IntegratedGpu => DeviceClass::IntegratedGpu,
                    _ => DeviceClass::Accelerator,
                };
                Accelerator {
                    kind: backend_kind(&device.backend),
                    class,
                    name: device.name,
                    memory_free: u64::try_from(device.memory_free).unwrap_or(0),
                }
            })
            .collect()
    }

    fn load_model(
        &self,
        path: &Path,
        gpu_layers: u32,
    ) -> Result<LoadedModel<Self::Model>, InferenceError> {
        let info = validate_model_file(path)?;
        let params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
        let (model, observed) =
            capture_offload(|| LlamaModel::load_from_file(&self.backend, path, &params));
        let model = model.map_err(|e| InferenceError::ModelLoad(format!("load: {e}")))?;

        // Repeating layers plus the output layer.
        let total_layers = observed.map(|o| o.total).unwrap_or(model.n_layer() + 1);
        let offload_capable = self.accelerators().iter().any(Accelerator::can_offload);
        let offloaded_layers = match observed {
            Some(count) => Some(count.offloaded),
            None if !offload_capable || gpu_layers == 0 => Some(0),
            None => None,
        };
        debug!(
            name = %info.name,
            version = info.version,
            tensors = info.tensor_count,
            ?offloaded_layers,
            total_layers,
            "GGUF model loaded"
        );

        Ok(LoadedModel {
            model,
            telemetry: LoadTelemetry { offloaded_layers, total_layers, kv_cache_bytes: None },
        })
    }

    fn create_context<'m>(
        &'m self,
        model: &'m Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context<'m>, InferenceError> {
        let p = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(params.n_ctx))
            .with_n_batch(params.n_batch)
            .with_n_ubatch(params.n_ubatch)
            .with_n_threads(params.n_threads)
            .with_n_threads_batch(params.n_threads)
            .with_offload_kqv(params.offload_kqv);
        let ctx = model
            .new_context(&self.backend, p)
            .map_err(|e| InferenceError::ContextCreate(format!("ctx: {e}")))?;

        let n_ctx = ctx.n_ctx();
        let batch_capacity = usize::try_from(params.n_batch.max(1)).unwrap_or(1);
        Ok(GgufContext {
            ctx,
            model,
            native: LlamaBatch::new(batch_capacity, 1),
            batch_capacity,
            n_ubatch: params.n_ubatch,
            kv_cache_bytes: kv_cache_bytes(model, n_ctx),
            eot_text: detect_eot_marker(model),
            has_logits: false,
        })
    }
}

/// One llama.cpp context over a borrowed model.
pub struct GgufContext<'m> {
    ctx: LlamaContext<'m>,
    model: &'m LlamaModel,
    /// Native batch of `batch_capacity` slots, refilled on every decode.
    native: LlamaBatch,
    batch_capacity: usize,
    n_ubatch: u32,
    kv_cache_bytes: u64,
    eot_text: Option<String>,
    /// Sampling without computed logits aborts inside llama.cpp.
    has_logits: bool,
}

impl BackendContext for GgufContext<'_> {
    type Sampler = LlamaSampler;

    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<Token>, InferenceError> {
        let bos = if add_special { AddBos::Always } else { AddBos::Never };
        let tokens = self
            .model
            .str_to_token(text, bos)
            .map_err(|e| InferenceError::Tokenize(e.to_string()))?;
        Ok(tokens.into_iter().map(|t| Token(t.0)).collect())
    }

    fn decode(&mut self, batch: &Batch) -> Result<(), InferenceError> {
        if batch.len() > self.batch_capacity {
            return Err(InferenceError::BatchFull { capacity: self.batch_capacity });
        }
        fill_native_batch(&mut self.native, batch)?;
        self.ctx
            .decode(&mut self.native)
            .map_err(|e| InferenceError::Decode(e.to_string()))?;
        if batch.entries().iter().any(|e| e.logits) {
            self.has_logits = true;
        }
        Ok(())
    }

    fn new_sampler(&self, config: &SamplerConfig) -> LlamaSampler {
        if config.greedy {
            return LlamaSampler::greedy();
        }
        LlamaSampler::chain_simple([
            LlamaSampler::top_k(i32::try_from(config.top_k).unwrap_or(i32::MAX)),
            LlamaSampler::top_p(config.top_p, 1),
            LlamaSampler::temp(config.temperature),
            LlamaSampler::dist(config.seed),
        ])
    }

    fn sample(&mut self, sampler: &mut LlamaSampler) -> Token {
        if !self.has_logits {
            return Token(self.model.token_eos().0);
        }
        // -1 samples from the last position that computed logits.
        Token(sampler.sample(&self.ctx, -1).0)
    }

    fn piece_of(&self, token: Token) -> Result<Vec<u8>, InferenceError> {
        let token = LlamaToken(token.0);
        match self.model.token_to_piece_bytes(token, PIECE_BUFFER, true, None) {
            Ok(bytes) => Ok(bytes),
            Err(TokenToStringError::InsufficientBufferSpace(needed)) => {
                let size = usize::try_from(needed.unsigned_abs()).unwrap_or(PIECE_BUFFER * 8);
                self.model
                    .token_to_piece_bytes(token, size, true, None)
                    .map_err(|e| InferenceError::Decode(format!("piece: {e}")))
            }
            Err(e) => Err(InferenceError::Decode(format!("piece: {e}"))),
        }
    }

    fn clear_memory(&mut self) {
        self.ctx.clear_kv_cache();
        self.has_logits = false;
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        self.model.is_eog_token(LlamaToken(token.0))
    }

    fn end_of_text(&self) -> Option<Token> {
        Some(Token(self.model.token_eos().0))
    }

    fn eot_text(&self) -> Option<String> {
        self.eot_text.clone()
    }

    fn n_ctx(&self) -> u32 {
        self.ctx.n_ctx()
    }

    fn n_ubatch(&self) -> u32 {
        self.n_ubatch
    }

    fn kv_cache_bytes(&self) -> Option<u64> {
        Some(self.kv_cache_bytes)
    }
}

/// Clear `native` and copy `batch` into it.
fn fill_native_batch(native: &mut LlamaBatch, batch: &Batch) -> Result<(), InferenceError> {
    native.clear();
    for entry in batch.entries() {
        native
            .add(LlamaToken(entry.token.0), entry.pos, &[entry.seq_id], entry.logits)
            .map_err(|e| InferenceError::Decode(format!("batch: {e}")))?;
    }
    Ok(())
}

fn backend_kind(name: &str) -> BackendKind {
    let name = name.to_ascii_lowercase();
    if name.contains("cuda") {
        BackendKind::Cuda
    } else if name.contains("vulkan") {
        BackendKind::Vulkan
    } else if name.contains("metal") || name.contains("mtl") {
        BackendKind::Metal
    } else if name.contains("opencl") {
        BackendKind::OpenCl
    } else {
        BackendKind::Cpu
    }
}

/// F16 K and V caches: two tensors of `head_dim * n_head_kv` per layer per position.
fn kv_cache_bytes(model: &LlamaModel, n_ctx: u32) -> u64 {
    let n_head = u64::from(model.n_head().max(1));
    let head_dim = u64::try_from(model.n_embd()).unwrap_or(0) / n_head;
    let per_token = 2 * head_dim * u64::from(model.n_head_kv()) * u64::from(model.n_layer()) * 2;
    per_token * u64::from(n_ctx)
}

/// First chat end-of-turn marker the vocabulary knows as a single token.
fn detect_eot_marker(model: &LlamaModel) -> Option<String> {
    EOT_MARKERS
        .iter()
        .find(|marker| {
            model
                .str_to_token(marker, AddBos::Never)
                .map(|tokens| tokens.len() == 1)
                .unwrap_or(false)
        })
        .map(|marker| marker.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_from_device_backend_name() {
        assert_eq!(backend_kind("CUDA"), BackendKind::Cuda);
        assert_eq!(backend_kind("Vulkan"), BackendKind::Vulkan);
        assert_eq!(backend_kind("MTL"), BackendKind::Metal);
        assert_eq!(backend_kind("OpenCL"), BackendKind::OpenCl);
        assert_eq!(backend_kind("CPU"), BackendKind::Cpu);
    }

    #[test]
    fn test_native_batch_refilled_in_place() {
        let mut native = LlamaBatch::new(4, 1);
        let mut batch = Batch::with_capacity(4);
        for pos in 0..3 {
            batch.push(Token(pos + 10), pos, pos == 2).unwrap();
        }
        fill_native_batch(&mut native, &batch).unwrap();
        assert_eq!(native.n_tokens(), 3);

        batch.clear();
        batch.push(Token(7), 3, true).unwrap();
        fill_native_batch(&mut native, &batch).unwrap();
        assert_eq!(native.n_tokens(), 1);
    }
}
