//! Text-level heuristics applied to reconstructed output.
//!
//! Everything here works on text alone and never inspects token ids. The
//! loop and reasoning detectors are heuristics: substring matches that catch
//! common failure modes, not guarantees. They sit behind small traits so a
//! host can swap them out.

use aho_corasick::{AhoCorasick, MatchKind};
use regex::Regex;
use serde::Deserialize;

use crate::engine::InferenceError;

pub const OPEN_TAG: &str = "<think>";
pub const CLOSE_TAG: &str = "</think>";

/// Phrases that show up when a small model gets stuck repeating itself.
pub const DEFAULT_LOOP_MARKERS: &[&str] = &[
    "Wait, can I help you out? No, that's the opposite",
    "I apologize, but I cannot",
    "I'm sorry, but I",
];

/// Substrings that suggest a piece is reasoning rather than answer text.
pub const DEFAULT_REASONING_HINTS: &[&str] = &[
    "<|im_start|>",
    "<|user|>",
    "<|assistant|>",
    OPEN_TAG,
    CLOSE_TAG,
    "Let me think",
    "Let me analyze",
    "I need to",
    "First,",
    "Step",
    "thinking",
    "reasoning",
];

/// Configuration for output filtering.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Remove `<think>...</think>` spans and stray tags before emission.
    #[serde(default)]
    pub strip_think: bool,
    /// Stuck-generation markers searched in the trailing window.
    #[serde(default = "default_loop_markers")]
    pub loop_markers: Vec<String>,
    /// Size of the trailing window, in characters.
    #[serde(default = "default_loop_window")]
    pub loop_window_chars: usize,
}

fn default_loop_markers() -> Vec<String> {
    DEFAULT_LOOP_MARKERS.iter().map(|s| s.to_string()).collect()
}

fn default_loop_window() -> usize {
    100
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            strip_think: false,
            loop_markers: default_loop_markers(),
            loop_window_chars: default_loop_window(),
        }
    }
}

/// Decides whether recent output means the model is stuck.
pub trait LoopDetector: Send + Sync {
    fn is_stuck(&self, recent: &str) -> bool;
}

impl<F> LoopDetector for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_stuck(&self, recent: &str) -> bool {
        self(recent)
    }
}

/// Flags output containing any of a fixed set of marker phrases.
pub struct MarkerLoopDetector {
    matcher: AhoCorasick,
}

impl MarkerLoopDetector {
    pub fn new<I, S>(markers: I) -> Result<Self, InferenceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let matcher = AhoCorasick::new(markers)
            .map_err(|e| InferenceError::InputValidation(format!("loop markers: {e}")))?;
        Ok(Self { matcher })
    }

    pub fn with_default_markers() -> Result<Self, InferenceError> {
        Self::new(DEFAULT_LOOP_MARKERS)
    }
}

impl LoopDetector for MarkerLoopDetector {
    fn is_stuck(&self, recent: &str) -> bool {
        self.matcher.is_match(recent)
    }
}

/// Decides whether a piece of text looks like model reasoning.
pub trait ReasoningClassifier: Send + Sync {
    fn looks_like_reasoning(&self, text: &str) -> bool;
}

/// Substring heuristic over [`DEFAULT_REASONING_HINTS`].
pub struct HintReasoningClassifier {
    matcher: AhoCorasick,
}

impl HintReasoningClassifier {
    pub fn new() -> Result<Self, InferenceError> {
        let matcher = AhoCorasick::new(DEFAULT_REASONING_HINTS)
            .map_err(|e| InferenceError::InputValidation(format!("reasoning hints: {e}")))?;
        Ok(Self { matcher })
    }
}

impl ReasoningClassifier for HintReasoningClassifier {
    fn looks_like_reasoning(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

/// Streaming remover for `<think>...</think>` spans.
///
/// Tags may arrive split across pieces, so a possible tag prefix at the end
/// of the input is carried to the next call. Matching ignores ASCII case.
/// Text inside an unclosed span is never released. A closing tag with no
/// open span is dropped.
pub struct ThinkTagStripper {
    tags: AhoCorasick,
    in_think: bool,
    carry: String,
}

impl ThinkTagStripper {
    pub fn new() -> Result<Self, InferenceError> {
        let tags = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build([OPEN_TAG, CLOSE_TAG])
            .map_err(|e| InferenceError::InputValidation(format!("tag matcher: {e}")))?;
        Ok(Self { tags, in_think: false, carry: String::new() })
    }

    /// Feed text, returning the part that is safe to show.
    pub fn push(&mut self, text: &str) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.push_str(text);

        let mut out = String::new();
        let mut rest = buf.as_str();
        while let Some(m) = self.tags.find(rest) {
            if !self.in_think {
                out.push_str(&rest[..m.start()]);
            }
            // Pattern 0 opens a span, pattern 1 closes one.
            self.in_think = m.pattern().as_usize() == 0;
            rest = &rest[m.end()..];
        }

        let held = partial_tag_len(rest);
        let (settled, pending) = rest.split_at(rest.len() - held);
        if !self.in_think {
            out.push_str(settled);
        }
        self.carry = pending.to_string();
        out
    }

    /// Release any held tag prefix at end of stream.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.carry);
        let in_think = std::mem::replace(&mut self.in_think, false);
        if in_think {
            String::new()
        } else {
            pending
        }
    }

    pub fn in_think(&self) -> bool {
        self.in_think
    }
}

/// Length of the longest suffix of `text` that could begin a tag.
fn partial_tag_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let max = bytes.len().min(CLOSE_TAG.len() - 1);
    (1..=max)
        .rev()
        .find(|&k| {
            let tail = &bytes[bytes.len() - k..];
            [OPEN_TAG, CLOSE_TAG]
                .iter()
                .any(|tag| tag.len() > k && tag.as_bytes()[..k].eq_ignore_ascii_case(tail))
        })
        .unwrap_or(0)
}

/// A full response split into reasoning and answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasoningSplit {
    pub reasoning: String,
    pub answer: String,
}

/// Splits complete responses for hosts that display reasoning separately.
pub struct ReasoningSplitter {
    span: Regex,
    splitter: Regex,
}

impl ReasoningSplitter {
    pub fn new() -> Result<Self, InferenceError> {
        let span = Regex::new(r"(?is)<think>(.*?)</think>")
            .map_err(|e| InferenceError::InputValidation(format!("invalid regex: {e}")))?;
        let splitter = Regex::new(r"(?i)(?:The answer is:|Therefore,|Answer:|Result:)")
            .map_err(|e| InferenceError::InputValidation(format!("invalid regex: {e}")))?;
        Ok(Self { span, splitter })
    }

    /// Split on the first complete span, a lone closing tag, an answer
    /// splitter phrase, or "Let me think", in that order.
    pub fn split(&self, message: &str) -> ReasoningSplit {
        if let Some(caps) = self.span.captures(message) {
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            return ReasoningSplit {
                reasoning: caps.get(1).map(|m| m.as_str().trim()).unwrap_or("").to_string(),
                answer: message[whole..].trim().to_string(),
            };
        }

        if message.contains(CLOSE_TAG) && !message.contains(OPEN_TAG) {
            let mut parts = message.splitn(3, CLOSE_TAG);
            let reasoning = parts.next().unwrap_or("").trim().to_string();
            let answer = parts.next().unwrap_or("").trim().to_string();
            return ReasoningSplit { reasoning, answer };
        }

        if let Some(m) = self.splitter.find(message) {
            let answer = self.splitter.replace_all(&message[m.start()..], "");
            return ReasoningSplit {
                reasoning: message[..m.start()].trim().to_string(),
                answer: answer.trim().to_string(),
            };
        }

        if message.to_lowercase().contains("let me think") {
            return ReasoningSplit { reasoning: message.trim().to_string(), answer: String::new() };
        }

        ReasoningSplit { reasoning: String::new(), answer: message.trim().to_string() }
    }
}
