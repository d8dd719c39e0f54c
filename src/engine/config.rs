//! Generation configuration types.
//!
//! All fields have safe defaults. Configuration is validated before use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::InferenceError;

/// Sampler defaults applied when a field is left at zero.
pub const DEFAULT_TOP_K: u32 = 40;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_TEMPERATURE: f32 = 0.4;
pub const DEFAULT_SEED: u32 = 1234;

/// Default decode latency threshold.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_millis(5000);

/// Sampler chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Sampling temperature. 0 selects the default.
    #[serde(default)]
    pub temperature: f32,
    /// Top-k limit. 0 selects the default.
    #[serde(default)]
    pub top_k: u32,
    /// Nucleus threshold. 0 selects the default.
    #[serde(default)]
    pub top_p: f32,
    #[serde(default = "default_seed")]
    pub seed: u32,
    /// Always pick the most likely token.
    #[serde(default)]
    pub greedy: bool,
}

fn default_seed() -> u32 {
    DEFAULT_SEED
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { temperature: 0.0, top_k: 0, top_p: 0.0, seed: DEFAULT_SEED, greedy: false }
    }
}

impl SamplerConfig {
    /// Validate configuration values. Returns error on invalid values.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if !self.temperature.is_finite() || self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(InferenceError::InputValidation(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if !self.top_p.is_finite() || self.top_p < 0.0 || self.top_p > 1.0 {
            return Err(InferenceError::InputValidation(
                "top_p must be in range [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }

    /// Fill zero fields with defaults and round to one decimal place.
    pub fn normalized(&self) -> Self {
        let top_k = if self.top_k == 0 { DEFAULT_TOP_K } else { self.top_k };
        let top_p = if self.top_p == 0.0 { DEFAULT_TOP_P } else { round_tenth(self.top_p) };
        let temperature = if self.temperature == 0.0 {
            DEFAULT_TEMPERATURE
        } else {
            round_tenth(self.temperature)
        };
        // A tiny non-zero value can round to 0.0.
        let top_p = if top_p == 0.0 { DEFAULT_TOP_P } else { top_p };
        let temperature = if temperature == 0.0 { DEFAULT_TEMPERATURE } else { temperature };
        Self { temperature, top_k, top_p, seed: self.seed, greedy: self.greedy }
    }
}

fn round_tenth(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

/// Per-request generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Tokens to generate after the prompt.
    pub max_new_tokens: u32,
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Extra text-level stop strings, checked on the reconstructed output.
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { max_new_tokens: 256, sampler: SamplerConfig::default(), stop_sequences: Vec::new() }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.max_new_tokens == 0 {
            return Err(InferenceError::InputValidation("max_new_tokens must be > 0".into()));
        }
        if self.stop_sequences.iter().any(|s| s.is_empty()) {
            return Err(InferenceError::InputValidation("stop sequences must be non-empty".into()));
        }
        self.sampler.validate()
    }
}
