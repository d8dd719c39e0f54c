//! Incremental text reconstruction from raw token pieces.
//!
//! A token piece can end in the middle of a multi-byte character. Pieces are
//! appended to a byte accumulator and only complete UTF-8 is released; an
//! incomplete trailing sequence waits for the next piece. Released text goes
//! through loop detection and, when enabled, think-tag stripping.

use tracing::{debug, warn};

use super::filter::{
    FilterConfig, HintReasoningClassifier, LoopDetector, MarkerLoopDetector,
    ReasoningClassifier, ThinkTagStripper,
};
use super::InferenceError;

/// Outcome of feeding one piece to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// Text ready for the consumer. May be empty when stripping removed it all.
    Emit(String),
    /// Only an incomplete character is buffered; nothing to show yet.
    Hold,
    /// The model is stuck; generation must end.
    Discard,
}

pub struct TextAssembler {
    pending: Vec<u8>,
    recent: String,
    window_chars: usize,
    loop_detector: Box<dyn LoopDetector>,
    classifier: Option<Box<dyn ReasoningClassifier>>,
    stripper: Option<ThinkTagStripper>,
    discarded: bool,
}

impl TextAssembler {
    pub fn new(config: &FilterConfig) -> Result<Self, InferenceError> {
        let loop_detector = MarkerLoopDetector::new(&config.loop_markers)?;
        let stripper = if config.strip_think { Some(ThinkTagStripper::new()?) } else { None };
        Ok(Self {
            pending: Vec::new(),
            recent: String::new(),
            window_chars: config.loop_window_chars.max(1),
            loop_detector: Box::new(loop_detector),
            classifier: Some(Box::new(HintReasoningClassifier::new()?)),
            stripper,
            discarded: false,
        })
    }

    /// Replace the stuck-generation heuristic.
    pub fn with_loop_detector(mut self, detector: impl LoopDetector + 'static) -> Self {
        self.loop_detector = Box::new(detector);
        self
    }

    /// Replace (or with `None`, disable) the reasoning heuristic used for debug logs.
    pub fn with_reasoning_classifier(
        mut self,
        classifier: Option<Box<dyn ReasoningClassifier>>,
    ) -> Self {
        self.classifier = classifier;
        self
    }

    /// Toggle think-tag stripping. Takes effect from the next piece.
    pub fn set_strip_think(&mut self, enabled: bool) -> Result<(), InferenceError> {
        match (enabled, self.stripper.is_some()) {
            (true, false) => self.stripper = Some(ThinkTagStripper::new()?),
            (false, true) => self.stripper = None,
            _ => {}
        }
        Ok(())
    }

    pub fn strip_think(&self) -> bool {
        self.stripper.is_some()
    }

    /// Feed one raw piece.
    pub fn assemble(&mut self, raw: &[u8]) -> Assembled {
        if self.discarded {
            return Assembled::Discard;
        }
        self.pending.extend_from_slice(raw);

        let Some(text) = drain_valid_utf8(&mut self.pending) else {
            debug!(held = self.pending.len(), "Holding incomplete UTF-8 sequence");
            return Assembled::Hold;
        };

        self.push_recent(&text);
        if self.loop_detector.is_stuck(&self.recent) {
            warn!(recent = %self.recent, "Repetition loop detected, discarding generation");
            crate::telemetry::record_loop_discard();
            self.discarded = true;
            self.pending.clear();
            return Assembled::Discard;
        }

        if let Some(classifier) = &self.classifier {
            if classifier.looks_like_reasoning(&text) {
                debug!(piece = %text, "Reasoning-like text detected");
            }
        }

        match self.stripper.as_mut() {
            Some(stripper) => Assembled::Emit(stripper.push(&text)),
            None => Assembled::Emit(text),
        }
    }

    /// End of stream: release what the stripper still holds.
    ///
    /// Bytes of an incomplete character left in the accumulator are dropped.
    pub fn finish(&mut self) -> String {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "Dropping incomplete trailing bytes");
            self.pending.clear();
        }
        if self.discarded {
            return String::new();
        }
        self.stripper.as_mut().map(|s| s.finish()).unwrap_or_default()
    }

    /// Forget all text state for a new generation.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.recent.clear();
        self.discarded = false;
        if let Some(stripper) = self.stripper.as_mut() {
            stripper.finish();
        }
    }

    pub fn held_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    fn push_recent(&mut self, text: &str) {
        self.recent.push_str(text);
        let count = self.recent.chars().count();
        if count > self.window_chars {
            let cut = self
                .recent
                .char_indices()
                .nth(count - self.window_chars)
                .map(|(i, _)| i)
                .unwrap_or(0);
            self.recent.drain(..cut);
        }
    }
}

/// Take the longest decodable prefix out of `pending`.
///
/// An incomplete trailing sequence stays in the buffer. Bytes that can never
/// start a valid sequence become U+FFFD so the buffer cannot stall. Returns
/// `None` when nothing was consumed.
fn drain_valid_utf8(pending: &mut Vec<u8>) -> Option<String> {
    let mut out = String::new();
    let mut consumed = 0;
    while consumed < pending.len() {
        match std::str::from_utf8(&pending[consumed..]) {
            Ok(s) => {
                out.push_str(s);
                consumed = pending.len();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(
                    std::str::from_utf8(&pending[consumed..consumed + valid]).unwrap_or_default(),
                );
                consumed += valid;
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        consumed += bad;
                    }
                    None => break,
                }
            }
        }
    }
    if consumed == 0 {
        return None;
    }
    pending.drain(..consumed);
    Some(out)
}

#[cfg(test)]
#[path = "assembler_tests.rs"]
mod tests;
