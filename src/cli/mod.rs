// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommand helpers for `gg-stream-cli`.
//!
//! ## Usage
//!
//! ```bash
//! gg-stream-cli probe                    # Negotiation outcome as JSON
//! gg-stream-cli config show              # Effective GG_STREAM_* values
//! gg-stream-cli quant q4_k_m             # Resolve a quantization type
//! gg-stream-cli generate model.gguf "Hi" # Stream a completion
//! ```

pub mod config_cmd;
#[cfg(feature = "gguf")]
pub mod generate_cmd;

use crate::engine::QuantType;

/// Exit code for bad arguments or configuration.
pub const EXIT_CONFIG: i32 = 2;

/// Resolve a quantization type name or id and print it as JSON.
pub fn run_quant(name: &str) -> i32 {
    match name.parse::<QuantType>() {
        Ok(quant) => match serde_json::to_string_pretty(&quant) {
            Ok(json) => {
                println!("{json}");
                0
            }
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        },
        Err(e) => {
            eprintln!("Error: {e}");
            EXIT_CONFIG
        }
    }
}

/// Probe accelerators and print the negotiated offload target.
#[cfg(feature = "gguf")]
pub fn run_probe() -> i32 {
    use crate::engine::GgufBackend;
    use crate::RuntimeConfig;

    let env = crate::config::load();
    if let Err(e) = env.validate() {
        eprintln!("Error: {e}");
        return EXIT_CONFIG;
    }
    let runtime = RuntimeConfig::from_env(&env);
    let backend = match GgufBackend::init() {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };
    let preference = runtime.probe_and_configure(&backend);
    let report = serde_json::json!({
        "preference": preference,
        "diagnostics": runtime.diagnostics(),
    });
    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

#[cfg(not(feature = "gguf"))]
pub fn run_probe() -> i32 {
    eprintln!("probe needs a backend; rebuild with --features gguf");
    EXIT_CONFIG
}
