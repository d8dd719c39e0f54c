//! Generation sessions.
//!
//! A [`Session`] owns one backend context, one sampler, one reusable batch
//! and the text assembler. It is driven by one caller at a time: ingest a
//! prompt with [`Session::begin_generation`], then call
//! [`Session::next_fragment`] until it returns an end.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::assembler::TextAssembler;
use super::backend::{Batch, BackendContext, InferenceBackend};
use super::config::{GenerationConfig, SamplerConfig};
use super::decode::DecodeExecutor;
use super::output::{FinishReason, GenerationResult, GenerationStats, GenerationStep};
use super::prefill::PrefillExecutor;
use super::streaming::{FragmentSender, StreamEvent};
use super::InferenceError;
use crate::telemetry::{GenerationSpan, SpanExt};
use crate::RuntimeConfig;

/// Counter of live sessions, guarding backend teardown.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions {
    count: Arc<AtomicU32>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live session. The count drops when the guard does.
    pub fn acquire(&self) -> SessionGuard {
        let now = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        crate::telemetry::record_active_sessions(now);
        SessionGuard { counter: Arc::clone(&self.count) }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

/// RAII registration in [`ActiveSessions`].
#[derive(Debug)]
pub struct SessionGuard {
    counter: Arc<AtomicU32>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let now = self.counter.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        crate::telemetry::record_active_sessions(now);
    }
}

/// Per-session creation options.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Worker threads; `0` selects automatically.
    pub threads: u32,
    pub sampler: SamplerConfig,
}

struct LiveState<C: BackendContext> {
    sampler: C::Sampler,
    ctx: C,
}

/// One model context driven by one caller.
pub struct Session<C: BackendContext> {
    id: Uuid,
    runtime: Arc<RuntimeConfig>,
    live: Option<LiveState<C>>,
    batch: Batch,
    assembler: TextAssembler,
    cursor: usize,
    prompt_tokens: usize,
    tokens_generated: u32,
    finished: Option<FinishReason>,
    transcript: String,
    stop_buffer: String,
    eot_text: Option<String>,
    stop_sequences: Vec<String>,
    guard: Option<SessionGuard>,
}

/// Create a session with default options and the given thread request.
pub fn create_session<'m, B: InferenceBackend>(
    backend: &'m B,
    model: &'m B::Model,
    runtime: &Arc<RuntimeConfig>,
    requested_threads: u32,
) -> Result<Session<B::Context<'m>>, InferenceError> {
    let options = SessionOptions { threads: requested_threads, ..Default::default() };
    create_session_with(backend, model, runtime, &options)
}

/// Create a session. Context creation failures are returned as-is.
pub fn create_session_with<'m, B: InferenceBackend>(
    backend: &'m B,
    model: &'m B::Model,
    runtime: &Arc<RuntimeConfig>,
    options: &SessionOptions,
) -> Result<Session<B::Context<'m>>, InferenceError> {
    options.sampler.validate()?;
    let params = runtime.negotiator().context_params(&runtime.context_defaults(), options.threads);
    let ctx = backend.create_context(model, &params)?;
    if let Some(bytes) = ctx.kv_cache_bytes() {
        runtime.negotiator().record_kv_cache(bytes);
    }

    let sampler = ctx.new_sampler(&options.sampler.normalized());
    let eot_text = ctx.eot_text().filter(|s| !s.is_empty());
    let assembler = TextAssembler::new(&runtime.filter_config())?;
    let batch = Batch::with_capacity(usize::try_from(params.n_batch).unwrap_or(1));

    let id = Uuid::new_v4();
    info!(
        session_id = %id,
        n_ctx = params.n_ctx,
        n_batch = params.n_batch,
        n_threads = params.n_threads,
        offload_kqv = params.offload_kqv,
        "Session created"
    );

    Ok(Session {
        id,
        runtime: Arc::clone(runtime),
        live: Some(LiveState { sampler, ctx }),
        batch,
        assembler,
        cursor: 0,
        prompt_tokens: 0,
        tokens_generated: 0,
        finished: None,
        transcript: String::new(),
        stop_buffer: String::new(),
        eot_text,
        stop_sequences: Vec::new(),
        guard: Some(runtime.sessions().acquire()),
    })
}

impl<C: BackendContext> Session<C> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Absolute position of the next token.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_closed(&self) -> bool {
        self.live.is_none()
    }

    /// Text emitted since the last `begin_generation`.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn tokens_generated(&self) -> u32 {
        self.tokens_generated
    }

    /// Context window of this session, in tokens.
    pub fn n_ctx(&self) -> Result<usize, InferenceError> {
        let live = self.live()?;
        Ok(usize::try_from(live.ctx.n_ctx()).unwrap_or(usize::MAX))
    }

    /// Extra text-level stop strings for subsequent steps.
    pub fn set_stop_sequences(&mut self, stops: Vec<String>) {
        self.stop_sequences = stops.into_iter().filter(|s| !s.is_empty()).collect();
    }

    /// Replace the sampler chain.
    pub fn set_sampler(&mut self, config: &SamplerConfig) -> Result<(), InferenceError> {
        config.validate()?;
        let live = self.live_mut()?;
        live.sampler = live.ctx.new_sampler(&config.normalized());
        Ok(())
    }

    /// Ingest a prompt and return the cursor reached.
    ///
    /// `max_length` is the absolute cursor bound the caller will pass to
    /// [`next_fragment`](Self::next_fragment); it is only checked against
    /// the context window here. An aborted ingestion returns the partial
    /// cursor and the next step reports `DecodeFailed`.
    pub fn begin_generation(&mut self, prompt: &str, max_length: usize) -> Result<usize, InferenceError> {
        let n_ctx = self.n_ctx()?;
        if max_length > n_ctx {
            warn!(session_id = %self.id, max_length, n_ctx, "Requested length exceeds context window");
        }
        self.ingest(prompt)
    }

    /// Run one decode step.
    ///
    /// The step that hits a stop condition returns `End`, never text; any
    /// text held back for stop-string or tag matching rides along as its tail.
    pub fn next_fragment(&mut self, max_length: usize) -> Result<GenerationStep, InferenceError> {
        let runtime = Arc::clone(&self.runtime);
        let live = self
            .live
            .as_mut()
            .ok_or_else(|| InferenceError::SessionClosed(self.id.to_string()))?;

        if let Some(reason) = self.finished {
            return Ok(GenerationStep::end(reason));
        }
        let n_ctx = usize::try_from(live.ctx.n_ctx()).unwrap_or(usize::MAX);
        if self.cursor >= n_ctx {
            debug!(session_id = %self.id, cursor = self.cursor, "Context window full");
            return Ok(self.finish(FinishReason::ContextFull));
        }

        let step = DecodeExecutor::new(
            &mut live.ctx,
            &mut live.sampler,
            &mut self.batch,
            &mut self.assembler,
            runtime.chunk(),
            runtime.decode_config(),
        )
        .step(&mut self.cursor, max_length);

        Ok(match step {
            GenerationStep::Fragment(text) => {
                self.tokens_generated += 1;
                self.deliver(text)
            }
            GenerationStep::End { reason, .. } => self.finish(reason),
        })
    }

    /// Number of tokens `text` encodes to, without special tokens.
    pub fn count_tokens(&self, text: &str) -> Result<usize, InferenceError> {
        Ok(self.live()?.ctx.tokenize(text, false)?.len())
    }

    /// Drop all cached context and reset the cursor.
    pub fn clear_cache(&mut self) -> Result<(), InferenceError> {
        self.live_mut()?.ctx.clear_memory();
        self.reset_generation();
        debug!(session_id = %self.id, "Session cache cleared");
        Ok(())
    }

    /// Release the context and sampler.
    ///
    /// Returns whether anything was released; closing twice is a no-op.
    pub fn close(&mut self) -> bool {
        let released = self.live.take().is_some();
        self.guard.take();
        if released {
            info!(session_id = %self.id, "Session closed");
        }
        released
    }

    /// Generate a full response.
    pub fn generate(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<GenerationResult, InferenceError> {
        self.run(prompt, config, |_| true)
    }

    /// Generate, pushing every non-empty fragment into `sender`.
    ///
    /// Blocks the calling thread; run it on a blocking worker. A dropped
    /// receiver ends generation with `Cancelled`.
    pub fn stream(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        sender: FragmentSender,
    ) -> Result<GenerationResult, InferenceError> {
        let result = self.run(prompt, config, |fragment| {
            fragment.is_empty() || sender.blocking_send(StreamEvent::Fragment(fragment.to_string())).is_ok()
        });
        match &result {
            Ok(done) => {
                let _ = sender.blocking_send(StreamEvent::Finished(done.finish_reason));
            }
            Err(_) => {
                let _ = sender.blocking_send(StreamEvent::Finished(FinishReason::DecodeFailed));
            }
        }
        result
    }

    fn run<F>(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        mut on_fragment: F,
    ) -> Result<GenerationResult, InferenceError>
    where
        F: FnMut(&str) -> bool,
    {
        config.validate()?;
        let span = GenerationSpan::new(&self.id.to_string(), config.max_new_tokens);
        let _enter = span.enter();

        let result = self.run_inner(prompt, config, &mut on_fragment);
        if let Ok(done) = &result {
            span.record("finish_reason", done.finish_reason.to_string().as_str());
            span.record("tokens_generated", done.tokens_generated);
            span.record("latency_ms", done.stats.elapsed_ms);
        }
        span.record_result(&result);
        result
    }

    fn run_inner(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        on_fragment: &mut dyn FnMut(&str) -> bool,
    ) -> Result<GenerationResult, InferenceError> {
        self.set_sampler(&config.sampler)?;
        self.set_stop_sequences(config.stop_sequences.clone());

        let started = Instant::now();
        let cursor = self.ingest(prompt)?;
        let n_ctx = self.n_ctx()?;
        let wanted = cursor.saturating_add(config.max_new_tokens as usize);
        if wanted > n_ctx {
            warn!(session_id = %self.id, wanted, n_ctx, "Generation will stop at the context window");
        }
        let max_length = wanted.min(n_ctx);

        let mut fragments = 0;
        let finish_reason = loop {
            match self.next_fragment(max_length)? {
                GenerationStep::Fragment(text) => {
                    fragments += 1;
                    if !on_fragment(&text) {
                        self.finished = Some(FinishReason::Cancelled);
                        break FinishReason::Cancelled;
                    }
                }
                GenerationStep::End { reason, tail } => {
                    if let Some(tail) = tail {
                        on_fragment(&tail);
                    }
                    break reason;
                }
            }
        };

        let elapsed = started.elapsed();
        crate::telemetry::record_generation(self.tokens_generated, elapsed);
        Ok(GenerationResult {
            text: self.transcript.clone(),
            fragments,
            tokens_generated: self.tokens_generated,
            finish_reason,
            stats: GenerationStats::new(self.prompt_tokens, self.tokens_generated, elapsed),
        })
    }

    fn ingest(&mut self, prompt: &str) -> Result<usize, InferenceError> {
        let strip = self.runtime.structural_tag_filtering();
        self.assembler.set_strip_think(strip)?;
        self.reset_generation();

        let runtime = Arc::clone(&self.runtime);
        let live = self
            .live
            .as_mut()
            .ok_or_else(|| InferenceError::SessionClosed(self.id.to_string()))?;

        let tokens = live.ctx.tokenize(prompt, true)?;
        let n_ctx = usize::try_from(live.ctx.n_ctx()).unwrap_or(usize::MAX);
        if tokens.len() > n_ctx {
            return Err(InferenceError::InputValidation(format!(
                "prompt of {} tokens exceeds context window of {}",
                tokens.len(),
                n_ctx
            )));
        }

        live.ctx.clear_memory();
        let result = PrefillExecutor::new(runtime.chunk()).execute(&mut live.ctx, &mut self.batch, &tokens)?;
        self.cursor = result.cursor;
        self.prompt_tokens = tokens.len();

        if !result.complete {
            warn!(
                session_id = %self.id,
                cursor = result.cursor,
                prompt_tokens = tokens.len(),
                "Prompt ingestion aborted"
            );
            self.finished = Some(FinishReason::DecodeFailed);
        } else {
            debug!(
                session_id = %self.id,
                cursor = result.cursor,
                chunks = result.chunks_processed,
                retries = result.retries,
                "Prompt ingested"
            );
        }
        Ok(self.cursor)
    }

    /// Pass emitted text through stop-sequence matching.
    fn deliver(&mut self, text: String) -> GenerationStep {
        let mut candidate = std::mem::take(&mut self.stop_buffer);
        candidate.push_str(&text);

        if let Some(idx) = self.find_stop(&candidate) {
            candidate.truncate(idx);
            self.finished = Some(FinishReason::StopSequence);
            self.assembler.finish();
            return self.end_with(FinishReason::StopSequence, candidate);
        }

        let keep = self.partial_stop_len(&candidate);
        self.stop_buffer = candidate.split_off(candidate.len() - keep);
        self.transcript.push_str(&candidate);
        GenerationStep::Fragment(candidate)
    }

    /// Latch `reason` and release any text still held back as the end's tail.
    fn finish(&mut self, reason: FinishReason) -> GenerationStep {
        let mut tail = std::mem::take(&mut self.stop_buffer);
        tail.push_str(&self.assembler.finish());
        let reason = match self.find_stop(&tail) {
            Some(idx) => {
                tail.truncate(idx);
                FinishReason::StopSequence
            }
            None => reason,
        };
        self.finished = Some(reason);
        debug!(session_id = %self.id, %reason, cursor = self.cursor, "Generation finished");
        self.end_with(reason, tail)
    }

    fn end_with(&mut self, reason: FinishReason, tail: String) -> GenerationStep {
        self.transcript.push_str(&tail);
        let tail = (!tail.is_empty()).then_some(tail);
        GenerationStep::End { reason, tail }
    }

    fn stops(&self) -> impl Iterator<Item = &str> + '_ {
        self.eot_text.iter().chain(self.stop_sequences.iter()).map(String::as_str)
    }

    fn find_stop(&self, text: &str) -> Option<usize> {
        self.stops().filter_map(|stop| text.find(stop)).min()
    }

    /// Longest suffix of `text` that is a proper prefix of some stop string.
    fn partial_stop_len(&self, text: &str) -> usize {
        self.stops()
            .filter_map(|stop| {
                (1..stop.len())
                    .rev()
                    .filter(|&k| k <= text.len() && stop.is_char_boundary(k))
                    .find(|&k| text.ends_with(&stop[..k]))
            })
            .max()
            .unwrap_or(0)
    }

    fn reset_generation(&mut self) {
        self.assembler.reset();
        self.cursor = 0;
        self.prompt_tokens = 0;
        self.tokens_generated = 0;
        self.finished = None;
        self.transcript.clear();
        self.stop_buffer.clear();
    }

    fn live(&self) -> Result<&LiveState<C>, InferenceError> {
        self.live.as_ref().ok_or_else(|| InferenceError::SessionClosed(self.id.to_string()))
    }

    fn live_mut(&mut self) -> Result<&mut LiveState<C>, InferenceError> {
        let id = self.id;
        self.live.as_mut().ok_or_else(|| InferenceError::SessionClosed(id.to_string()))
    }
}

impl<C: BackendContext> Drop for Session<C> {
    fn drop(&mut self) {
        self.close();
    }
}
