//! Boundary between the generation engine and the tensor backend.
//!
//! The engine never touches weights, logits or tokenizer tables. Everything
//! it needs from the backend goes through [`InferenceBackend`] (process and
//! model scope) and [`BackendContext`] (one context per session). Freeing a
//! model or context is `Drop`; a context borrows its model, so it can never
//! outlive it.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use super::config::SamplerConfig;
use super::error::InferenceError;
use super::negotiator::BackendKind;

/// Vocabulary token id as the backend reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub i32);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One slot of a decode batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: Token,
    pub pos: i32,
    pub seq_id: i32,
    /// Whether the backend should compute logits for this position.
    pub logits: bool,
}

/// Fixed-capacity decode batch, reused across ingestion chunks and steps.
#[derive(Debug, Clone)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    capacity: usize,
}

impl Batch {
    /// Allocate a batch with room for `capacity` entries. Capacity never changes.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: Vec::with_capacity(capacity), capacity }
    }

    /// Append a token on sequence 0.
    pub fn push(&mut self, token: Token, pos: i32, logits: bool) -> Result<(), InferenceError> {
        if self.entries.len() >= self.capacity {
            return Err(InferenceError::BatchFull { capacity: self.capacity });
        }
        self.entries.push(BatchEntry { token, pos, seq_id: 0, logits });
        Ok(())
    }

    pub fn clear(&mut self) { self.entries.clear(); }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn capacity(&self) -> usize { self.capacity }
    pub fn entries(&self) -> &[BatchEntry] { &self.entries }
}

/// Sizing requested when a context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_ubatch: u32,
    pub n_threads: i32,
    /// Offload K/Q/V and attention ops to the accelerator.
    pub offload_kqv: bool,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self { n_ctx: 2048, n_batch: 256, n_ubatch: 64, n_threads: 4, offload_kqv: false }
    }
}

/// Broad class of a compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceClass {
    Cpu,
    Gpu,
    IntegratedGpu,
    Accelerator,
}

/// A compute device the backend can schedule layers on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accelerator {
    pub kind: BackendKind,
    pub class: DeviceClass,
    pub name: String,
    pub memory_free: u64,
}

impl Accelerator {
    /// True for anything that can take offloaded layers.
    pub fn can_offload(&self) -> bool {
        self.class != DeviceClass::Cpu && self.kind != BackendKind::Cpu
    }
}

/// Structured offload figures reported by a model load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadTelemetry {
    /// Layers that landed on an accelerator. `None` when the backend could
    /// not observe the count.
    pub offloaded_layers: Option<u32>,
    pub total_layers: u32,
    /// KV-cache size in bytes, when the backend knows it at load time.
    pub kv_cache_bytes: Option<u64>,
}

/// A loaded model plus what the backend observed while loading it.
#[derive(Debug)]
pub struct LoadedModel<M> {
    pub model: M,
    pub telemetry: LoadTelemetry,
}

/// Process- and model-scope operations of a tensor backend.
pub trait InferenceBackend {
    type Model;
    type Context<'m>: BackendContext
    where
        Self: 'm;

    /// Devices visible to the backend, CPU included.
    fn accelerators(&self) -> Vec<Accelerator>;

    /// Load model weights, offloading up to `gpu_layers` layers.
    fn load_model(
        &self,
        path: &Path,
        gpu_layers: u32,
    ) -> Result<LoadedModel<Self::Model>, InferenceError>;

    /// Create a compute context over a loaded model.
    fn create_context<'m>(
        &'m self,
        model: &'m Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context<'m>, InferenceError>;
}

/// Per-session compute state.
pub trait BackendContext {
    type Sampler;

    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<Token>, InferenceError>;

    /// Run the batch through the model, extending the context memory.
    fn decode(&mut self, batch: &Batch) -> Result<(), InferenceError>;

    fn new_sampler(&self, config: &SamplerConfig) -> Self::Sampler;

    /// Draw one token from the logits of the last decoded position.
    fn sample(&mut self, sampler: &mut Self::Sampler) -> Token;

    /// Raw bytes of a token's text. May be a partial UTF-8 sequence.
    fn piece_of(&self, token: Token) -> Result<Vec<u8>, InferenceError>;

    /// Drop every cached position.
    fn clear_memory(&mut self);

    fn is_end_of_generation(&self, token: Token) -> bool;

    /// The explicit end-of-text token, if the vocabulary has one.
    fn end_of_text(&self) -> Option<Token>;

    /// Textual end-of-turn marker for chat models (e.g. `<|im_end|>`).
    fn eot_text(&self) -> Option<String> {
        None
    }

    fn n_ctx(&self) -> u32;
    fn n_ubatch(&self) -> u32;

    /// KV-cache size in bytes for this context, if known.
    fn kv_cache_bytes(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_capacity_is_fixed() {
        let mut batch = Batch::with_capacity(2);
        batch.push(Token(1), 0, false).unwrap();
        batch.push(Token(2), 1, true).unwrap();
        let err = batch.push(Token(3), 2, true).unwrap_err();
        assert!(matches!(err, InferenceError::BatchFull { capacity: 2 }));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.capacity(), 2);
    }

    #[test]
    fn test_batch_clear_keeps_capacity() {
        let mut batch = Batch::with_capacity(4);
        batch.push(Token(7), 0, true).unwrap();
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.capacity(), 4);
    }

    #[test]
    fn test_batch_entries_use_sequence_zero() {
        let mut batch = Batch::with_capacity(1);
        batch.push(Token(9), 5, true).unwrap();
        let entry = batch.entries()[0];
        assert_eq!(entry.seq_id, 0);
        assert_eq!(entry.pos, 5);
        assert!(entry.logits);
    }

    #[test]
    fn test_cpu_device_cannot_offload() {
        let cpu = Accelerator {
            kind: BackendKind::Cpu,
            class: DeviceClass::Cpu,
            name: "CPU".into(),
            memory_free: 0,
        };
        assert!(!cpu.can_offload());
        let gpu = Accelerator { kind: BackendKind::Vulkan, class: DeviceClass::Gpu, ..cpu };
        assert!(gpu.can_offload());
    }
}
