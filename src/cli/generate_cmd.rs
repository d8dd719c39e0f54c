// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! `generate` subcommand: stream a completion from a local GGUF model.
//!
//! The model, context and decode loop live on a blocking worker; fragments
//! reach stdout through a [`FragmentStream`].

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config;
use crate::engine::{
    create_session, FragmentStream, GenerationConfig, GgufBackend, InferenceError, StreamEvent,
};
use crate::RuntimeConfig;

/// Parsed `generate` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateArgs {
    pub model: PathBuf,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub threads: u32,
    pub strip_think: bool,
}

/// Parse `generate <MODEL> <PROMPT> [--max-tokens N] [--threads N] [--strip-think]`.
pub fn parse_args(args: &[String]) -> Result<GenerateArgs, String> {
    let mut positional = Vec::new();
    let mut max_tokens = None;
    let mut threads = 0;
    let mut strip_think = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--max-tokens" => {
                let value = iter.next().ok_or("Missing value for --max-tokens")?;
                max_tokens = Some(value.parse().map_err(|_| format!("Invalid --max-tokens: {value}"))?);
            }
            "--threads" => {
                let value = iter.next().ok_or("Missing value for --threads")?;
                threads = value.parse().map_err(|_| format!("Invalid --threads: {value}"))?;
            }
            "--strip-think" => strip_think = true,
            other if other.starts_with("--") => return Err(format!("Unknown argument: {other}")),
            other => positional.push(other.to_string()),
        }
    }

    match positional.as_slice() {
        [model, prompt] => Ok(GenerateArgs {
            model: PathBuf::from(model),
            prompt: prompt.clone(),
            max_tokens,
            threads,
            strip_think,
        }),
        _ => Err("Usage: gg-stream-cli generate <MODEL> <PROMPT> [--max-tokens N] [--threads N] [--strip-think]".into()),
    }
}

/// Run the command. Returns the process exit code.
pub async fn run_generate(args: &[String]) -> i32 {
    let args = match parse_args(args) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return super::EXIT_CONFIG;
        }
    };

    let env = config::load();
    if let Err(e) = env.validate() {
        eprintln!("Error: {e}");
        return super::EXIT_CONFIG;
    }
    let runtime = Arc::new(RuntimeConfig::from_env(&env));
    if args.strip_think {
        runtime.set_structural_tag_filtering(true);
    }
    let generation = GenerationConfig {
        max_new_tokens: args.max_tokens.unwrap_or(env.max_length),
        ..Default::default()
    };

    let (sender, mut stream) = FragmentStream::new(32);
    let worker_runtime = Arc::clone(&runtime);
    let worker = tokio::task::spawn_blocking(move || {
        let backend = GgufBackend::init()?;
        let loaded = worker_runtime.load_model(&backend, &args.model)?;
        let mut session = create_session(&backend, &loaded.model, &worker_runtime, args.threads)?;
        let result = session.stream(&args.prompt, &generation, sender);
        session.close();
        result
    });

    let mut stdout = std::io::stdout();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Fragment(text) => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
            StreamEvent::Finished(_) => break,
        }
    }
    println!();

    let outcome: Result<_, InferenceError> = match worker.await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Worker failed: {e}");
            return 1;
        }
    };
    match outcome {
        Ok(result) => {
            eprintln!(
                "[{}] {} tokens in {} ms ({:.1} tok/s) | {}",
                result.finish_reason,
                result.tokens_generated,
                result.stats.elapsed_ms,
                result.stats.tokens_per_second,
                runtime.diagnostics()
            );
            0
        }
        Err(e) if e.is_configuration() => {
            eprintln!("Error: {e}");
            super::EXIT_CONFIG
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}
