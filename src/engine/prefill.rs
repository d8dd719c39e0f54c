//! Prompt ingestion in adaptively sized chunks.
//!
//! Feeds a tokenized prompt to the context in order, one chunk per decode
//! call. A failed chunk halves the shared chunk size and is retried; at the
//! floor, ingestion stops and reports how far it got.

use tracing::{debug, warn};

use super::backend::{Batch, BackendContext, Token};
use super::chunk::AdaptiveChunkSize;
use super::InferenceError;

/// Result from the ingestion phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefillResult {
    /// Absolute number of prompt tokens decoded into the context.
    pub cursor: usize,
    /// Number of chunks decoded successfully.
    pub chunks_processed: usize,
    /// Number of chunk retries after decode failures.
    pub retries: usize,
    /// False when ingestion aborted at the chunk-size floor.
    pub complete: bool,
}

/// Chunked prompt ingestion executor.
#[derive(Debug)]
pub struct PrefillExecutor<'a> {
    chunk: &'a AdaptiveChunkSize,
}

impl<'a> PrefillExecutor<'a> {
    pub fn new(chunk: &'a AdaptiveChunkSize) -> Self {
        Self { chunk }
    }

    /// Decode `tokens` starting at position 0.
    ///
    /// Context memory must already be cleared. Only the last prompt token
    /// requests logits. Errors are only returned for batch misuse; decode
    /// failures are absorbed into the result.
    pub fn execute<C: BackendContext>(
        &self,
        ctx: &mut C,
        batch: &mut Batch,
        tokens: &[Token],
    ) -> Result<PrefillResult, InferenceError> {
        let mut result = PrefillResult { cursor: 0, chunks_processed: 0, retries: 0, complete: true };
        if tokens.is_empty() {
            return Ok(result);
        }

        let n_ubatch = usize::try_from(ctx.n_ubatch()).unwrap_or(usize::MAX);
        let last = tokens.len() - 1;

        while result.cursor < tokens.len() {
            let size = self
                .chunk
                .get()
                .min(n_ubatch)
                .min(batch.capacity())
                .max(1)
                .min(tokens.len() - result.cursor);
            let start = result.cursor;

            batch.clear();
            for (offset, &token) in tokens[start..start + size].iter().enumerate() {
                let pos = start + offset;
                let pos = i32::try_from(pos).map_err(|_| {
                    InferenceError::InputValidation(format!("prompt position {} out of range", pos))
                })?;
                batch.push(token, pos, start + offset == last)?;
            }

            match ctx.decode(batch) {
                Ok(()) => {
                    result.cursor += size;
                    result.chunks_processed += 1;
                    debug!(cursor = result.cursor, chunk = size, "Ingested prompt chunk");
                }
                Err(e) => {
                    crate::telemetry::record_decode_failure("ingest");
                    match self.chunk.degrade() {
                        Some(next) => {
                            warn!(error = %e, cursor = start, chunk = size, next_chunk = next, "Ingestion decode failed, retrying with smaller chunk");
                            crate::telemetry::record_ingest_retry();
                            result.retries += 1;
                        }
                        None => {
                            warn!(error = %e, cursor = start, "Ingestion decode failed at minimum chunk size, aborting");
                            result.complete = false;
                            break;
                        }
                    }
                }
            }
        }

        batch.clear();
        Ok(result)
    }
}
