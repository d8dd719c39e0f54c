//! GGUF models through llama.cpp.
//!
//! Enabled by the `gguf` feature. Accelerator support comes from the
//! `cuda`, `metal` and `vulkan` features of `llama-cpp-2`.

mod backend;

pub use backend::{GgufBackend, GgufContext};

/// Chat end-of-turn markers checked against the vocabulary, in order.
pub const EOT_MARKERS: &[&str] = &["<|im_end|>", "<|eot_id|>", "<|end|>", "<end_of_turn>"];
