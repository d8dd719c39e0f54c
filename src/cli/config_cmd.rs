// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables.

use crate::config::{self, EffectiveConfig, EnvConfig};

/// Print effective config as key-value pairs to stdout.
pub fn run_show() {
    let cfg = config::load().effective_config();
    print_config(&cfg);
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    print_config(&EnvConfig::default().effective_config());
}

/// Check the configuration for combinations that will not do what was asked.
///
/// Returns 0 if valid, 1 if any warnings are found, 2 if a value is rejected.
pub fn run_validate() -> i32 {
    let env = config::load();
    if let Err(e) = env.validate() {
        eprintln!("ERROR: {e}");
        return super::EXIT_CONFIG;
    }
    let warnings = validation_warnings(&env.effective_config());
    for warning in &warnings {
        eprintln!("WARNING: {warning}");
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn validation_warnings(cfg: &EffectiveConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if cfg.chunk_size > cfg.n_ubatch as usize {
        warnings.push(format!(
            "GG_STREAM_CHUNK_SIZE ({}) exceeds GG_STREAM_N_UBATCH ({}); chunks will be capped",
            cfg.chunk_size, cfg.n_ubatch
        ));
    }
    if cfg.max_length > cfg.n_ctx {
        warnings.push(format!(
            "GG_STREAM_MAX_LENGTH ({}) exceeds GG_STREAM_N_CTX ({}); generation stops at the context window",
            cfg.max_length, cfg.n_ctx
        ));
    }
    if cfg.backend.eq_ignore_ascii_case("cpu") && cfg.gpu_layers != "0" && cfg.gpu_layers != "auto" {
        warnings.push(format!(
            "GG_STREAM_GPU_LAYERS ({}) is ignored with GG_STREAM_BACKEND=cpu",
            cfg.gpu_layers
        ));
    }
    warnings
}

fn print_config(cfg: &EffectiveConfig) {
    println!("GG_STREAM_N_CTX={}", cfg.n_ctx);
    println!("GG_STREAM_N_BATCH={}", cfg.n_batch);
    println!("GG_STREAM_N_UBATCH={}", cfg.n_ubatch);
    println!("GG_STREAM_N_THREADS={}", cfg.n_threads);
    println!("GG_STREAM_GPU_LAYERS={}", cfg.gpu_layers);
    println!("GG_STREAM_BACKEND={}", cfg.backend.to_ascii_lowercase());
    println!("GG_STREAM_CHUNK_SIZE={}", cfg.chunk_size);
    println!("GG_STREAM_WATCHDOG_MS={}", cfg.watchdog_ms);
    println!("GG_STREAM_STRIP_THINK={}", cfg.strip_think);
    println!("GG_STREAM_MAX_LENGTH={}", cfg.max_length);
    println!("GG_STREAM_LOG_FORMAT={}", cfg.log_format);
    println!("GG_STREAM_LOG_LEVEL={}", cfg.log_level);
}
