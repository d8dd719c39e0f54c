//! Scripted in-memory backend for engine tests.
//!
//! Prompt text tokenizes one token per char. Sampling replays a script of
//! raw byte pieces, then returns [`EOG`] (or repeats a filler piece). Every
//! decode call is logged on the backend so tests can inspect batches after
//! the session that made them is gone.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use gg_stream::engine::{
    Accelerator, BackendContext, BackendKind, Batch, BatchEntry, ContextParams, DeviceClass,
    InferenceBackend, InferenceError, LoadTelemetry, LoadedModel, SamplerConfig, Token,
};

/// End-of-generation token.
pub const EOG: Token = Token(90_000);
/// Sampled token ids start here; `PIECE_BASE + i` is script piece `i`.
pub const PIECE_BASE: i32 = 100_000;

/// What a context does when driven.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub pieces: Vec<Vec<u8>>,
    /// Returned forever once `pieces` runs out. `None` ends with [`EOG`].
    pub filler: Option<Vec<u8>>,
    pub eot_text: Option<String>,
    /// Decode call indices (across the backend) that fail.
    pub fail_calls: HashSet<usize>,
    pub always_fail: bool,
    /// Batches longer than this fail.
    pub max_batch: Option<usize>,
    /// Decode call index that sleeps before succeeding.
    pub slow_call: Option<(usize, Duration)>,
    /// Sample index whose piece lookup fails.
    pub bad_piece: Option<usize>,
    pub fail_context: bool,
}

impl Script {
    pub fn text(pieces: &[&str]) -> Self {
        Self { pieces: pieces.iter().map(|p| p.as_bytes().to_vec()).collect(), ..Default::default() }
    }

    pub fn bytes(pieces: &[&[u8]]) -> Self {
        Self { pieces: pieces.iter().map(|p| p.to_vec()).collect(), ..Default::default() }
    }

    pub fn endless(filler: &str) -> Self {
        Self { filler: Some(filler.as_bytes().to_vec()), ..Default::default() }
    }
}

/// Everything the backend observed.
#[derive(Debug, Default)]
pub struct MockLog {
    pub decode_calls: usize,
    pub batches: Vec<Vec<BatchEntry>>,
    pub clear_calls: usize,
    pub context_params: Vec<ContextParams>,
    pub requested_layers: Vec<u32>,
    pub samplers: Vec<SamplerConfig>,
}

pub struct MockModel;

pub struct MockBackend {
    pub script: Script,
    pub accelerators: Vec<Accelerator>,
    pub telemetry: LoadTelemetry,
    log: Arc<Mutex<MockLog>>,
}

impl MockBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            accelerators: vec![cpu()],
            telemetry: LoadTelemetry {
                offloaded_layers: Some(0),
                total_layers: 33,
                kv_cache_bytes: None,
            },
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    pub fn with_accelerators(mut self, accelerators: Vec<Accelerator>) -> Self {
        self.accelerators = accelerators;
        self
    }

    pub fn with_telemetry(mut self, telemetry: LoadTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn log(&self) -> MutexGuard<'_, MockLog> {
        self.log.lock().unwrap()
    }

    /// A context outside any session, for driving executors directly.
    pub fn context(&self, params: &ContextParams) -> MockContext<'_> {
        self.create_context(&MockModel, params).unwrap()
    }
}

pub fn cpu() -> Accelerator {
    Accelerator { kind: BackendKind::Cpu, class: DeviceClass::Cpu, name: "CPU".into(), memory_free: 0 }
}

pub fn gpu(kind: BackendKind) -> Accelerator {
    Accelerator { kind, class: DeviceClass::Gpu, name: format!("{kind} GPU"), memory_free: 8 << 30 }
}

/// Context sizing used by most tests.
pub fn params(n_ctx: u32, n_batch: u32, n_ubatch: u32) -> ContextParams {
    ContextParams { n_ctx, n_batch, n_ubatch, n_threads: 4, offload_kqv: false }
}

impl InferenceBackend for MockBackend {
    type Model = MockModel;
    type Context<'m> = MockContext<'m> where Self: 'm;

    fn accelerators(&self) -> Vec<Accelerator> {
        self.accelerators.clone()
    }

    fn load_model(
        &self,
        path: &Path,
        gpu_layers: u32,
    ) -> Result<LoadedModel<MockModel>, InferenceError> {
        if path.as_os_str().is_empty() {
            return Err(InferenceError::ModelLoad("empty path".into()));
        }
        self.log().requested_layers.push(gpu_layers);
        Ok(LoadedModel { model: MockModel, telemetry: self.telemetry })
    }

    fn create_context<'m>(
        &'m self,
        _model: &'m MockModel,
        params: &ContextParams,
    ) -> Result<MockContext<'m>, InferenceError> {
        if self.script.fail_context {
            return Err(InferenceError::ContextCreate("scripted failure".into()));
        }
        self.log().context_params.push(*params);
        Ok(MockContext { backend: self, params: *params, memory: 0, sampled: 0 })
    }
}

pub struct MockContext<'m> {
    backend: &'m MockBackend,
    params: ContextParams,
    memory: usize,
    sampled: usize,
}

impl MockContext<'_> {
    pub fn memory(&self) -> usize {
        self.memory
    }
}

impl BackendContext for MockContext<'_> {
    type Sampler = SamplerConfig;

    fn tokenize(&self, text: &str, _add_special: bool) -> Result<Vec<Token>, InferenceError> {
        Ok(text.chars().map(|c| Token(c as i32)).collect())
    }

    fn decode(&mut self, batch: &Batch) -> Result<(), InferenceError> {
        let script = &self.backend.script;
        let call = {
            let mut log = self.backend.log();
            let call = log.decode_calls;
            log.decode_calls += 1;
            log.batches.push(batch.entries().to_vec());
            call
        };

        if let Some((slow, delay)) = script.slow_call {
            if slow == call {
                std::thread::sleep(delay);
            }
        }
        if script.always_fail || script.fail_calls.contains(&call) {
            return Err(InferenceError::Decode(format!("scripted failure at call {call}")));
        }
        if script.max_batch.is_some_and(|max| batch.len() > max) {
            return Err(InferenceError::Decode(format!("batch of {} too large", batch.len())));
        }

        let first = batch.entries().first().map(|e| e.pos).unwrap_or(0);
        if usize::try_from(first).ok() != Some(self.memory) {
            return Err(InferenceError::Decode(format!(
                "position {first} does not continue memory of {}",
                self.memory
            )));
        }
        if self.memory + batch.len() > self.params.n_ctx as usize {
            return Err(InferenceError::Decode("context overflow".into()));
        }
        self.memory += batch.len();
        Ok(())
    }

    fn new_sampler(&self, config: &SamplerConfig) -> SamplerConfig {
        self.backend.log().samplers.push(config.clone());
        config.clone()
    }

    fn sample(&mut self, _sampler: &mut SamplerConfig) -> Token {
        let index = self.sampled;
        self.sampled += 1;
        let script = &self.backend.script;
        if index < script.pieces.len() || script.filler.is_some() {
            Token(PIECE_BASE + index as i32)
        } else {
            EOG
        }
    }

    fn piece_of(&self, token: Token) -> Result<Vec<u8>, InferenceError> {
        let script = &self.backend.script;
        if token.0 < PIECE_BASE {
            let c = char::from_u32(token.0 as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
            return Ok(c.to_string().into_bytes());
        }
        let index = (token.0 - PIECE_BASE) as usize;
        if script.bad_piece == Some(index) {
            return Err(InferenceError::Tokenize(format!("no piece for {token}")));
        }
        Ok(script
            .pieces
            .get(index)
            .or(script.filler.as_ref())
            .cloned()
            .unwrap_or_default())
    }

    fn clear_memory(&mut self) {
        self.memory = 0;
        self.sampled = 0;
        self.backend.log().clear_calls += 1;
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        token == EOG
    }

    fn end_of_text(&self) -> Option<Token> {
        None
    }

    fn eot_text(&self) -> Option<String> {
        self.backend.script.eot_text.clone()
    }

    fn n_ctx(&self) -> u32 {
        self.params.n_ctx
    }

    fn n_ubatch(&self) -> u32 {
        self.params.n_ubatch
    }
}
