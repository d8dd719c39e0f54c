//! Single-step decode loop with a latency watchdog.
//!
//! One call to [`DecodeExecutor::step`] samples a token, checks stop
//! conditions, assembles its text and feeds it back. The cursor advances
//! only after a successful feed-back decode.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::assembler::{Assembled, TextAssembler};
use super::backend::{Batch, BackendContext};
use super::chunk::AdaptiveChunkSize;
use super::config::DEFAULT_WATCHDOG;
use super::output::{FinishReason, GenerationStep};

/// Configuration for decode execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeConfig {
    /// A single feed-back decode slower than this trips the watchdog.
    pub watchdog: Duration,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self { watchdog: DEFAULT_WATCHDOG }
    }
}

/// Borrowed view over a session's state for one decode step.
pub struct DecodeExecutor<'a, C: BackendContext> {
    ctx: &'a mut C,
    sampler: &'a mut C::Sampler,
    batch: &'a mut Batch,
    assembler: &'a mut TextAssembler,
    chunk: &'a AdaptiveChunkSize,
    config: DecodeConfig,
}

impl<'a, C: BackendContext> DecodeExecutor<'a, C> {
    pub fn new(
        ctx: &'a mut C,
        sampler: &'a mut C::Sampler,
        batch: &'a mut Batch,
        assembler: &'a mut TextAssembler,
        chunk: &'a AdaptiveChunkSize,
        config: DecodeConfig,
    ) -> Self {
        Self { ctx, sampler, batch, assembler, chunk, config }
    }

    /// Run one generation step at `cursor`.
    ///
    /// Returns a fragment (possibly empty while a character is incomplete)
    /// or the reason generation ended. Nothing is emitted on the step that
    /// ends generation.
    pub fn step(&mut self, cursor: &mut usize, max_length: usize) -> GenerationStep {
        let token = self.ctx.sample(self.sampler);

        if self.ctx.is_end_of_generation(token) || self.ctx.end_of_text() == Some(token) {
            debug!(%token, cursor = *cursor, "End of generation token");
            return GenerationStep::end(FinishReason::Stop);
        }
        if *cursor >= max_length {
            debug!(cursor = *cursor, max_length, "Maximum length reached");
            return GenerationStep::end(FinishReason::MaxTokens);
        }

        let piece = match self.ctx.piece_of(token) {
            Ok(piece) => piece,
            Err(e) => {
                warn!(error = %e, %token, "Failed to convert token to text");
                crate::telemetry::record_decode_failure("piece");
                return GenerationStep::end(FinishReason::DecodeFailed);
            }
        };

        let fragment = match self.assembler.assemble(&piece) {
            Assembled::Emit(text) => text,
            Assembled::Hold => String::new(),
            Assembled::Discard => return GenerationStep::end(FinishReason::LoopDetected),
        };

        let Ok(pos) = i32::try_from(*cursor) else {
            return GenerationStep::end(FinishReason::ContextFull);
        };
        self.batch.clear();
        if let Err(e) = self.batch.push(token, pos, true) {
            warn!(error = %e, "Failed to build feed-back batch");
            return GenerationStep::end(FinishReason::DecodeFailed);
        }

        let started = Instant::now();
        let decoded = self.ctx.decode(self.batch);
        let elapsed = started.elapsed();
        crate::telemetry::record_decode_latency(elapsed);

        if elapsed > self.config.watchdog {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                watchdog_ms = self.config.watchdog.as_millis() as u64,
                cursor = *cursor,
                "Decode watchdog tripped, clearing context memory"
            );
            self.ctx.clear_memory();
            *cursor = 0;
            self.chunk.degrade();
            crate::telemetry::record_watchdog_trip();
            return GenerationStep::end(FinishReason::Timeout);
        }

        if let Err(e) = decoded {
            warn!(error = %e, cursor = *cursor, "Decode step failed");
            crate::telemetry::record_decode_failure("step");
            return GenerationStep::end(FinishReason::DecodeFailed);
        }

        *cursor += 1;
        crate::telemetry::record_fragment();
        GenerationStep::Fragment(fragment)
    }
}
