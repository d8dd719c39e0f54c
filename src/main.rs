//! GG-STREAM command line entry point.
//!
//! ## CLI Subcommands
//!
//! - `gg-stream-cli probe` - Negotiate the offload target (exit 0/1)
//! - `gg-stream-cli config show|defaults|validate` - Inspect GG_STREAM_* settings
//! - `gg-stream-cli quant <NAME>` - Resolve a quantization type
//! - `gg-stream-cli generate <MODEL> <PROMPT>` - Stream a completion (gguf builds)

use std::process::ExitCode;

use gg_stream::cli::{self, config_cmd};
use gg_stream::config;
use gg_stream::telemetry::{describe_metrics, init_logging};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    let env = config::load();
    if let Err(e) = init_logging(&env.log) {
        eprintln!("Logging disabled: {}", e);
    }
    describe_metrics();

    match command {
        "probe" => ExitCode::from(cli::run_probe() as u8),
        "quant" => match args.get(2) {
            Some(name) => ExitCode::from(cli::run_quant(name) as u8),
            None => {
                print_command_help("quant");
                ExitCode::from(cli::EXIT_CONFIG as u8)
            }
        },
        "generate" => run_generate(&args[2..]).await,
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show();
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(config_cmd::run_validate() as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("gg-stream {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "gguf")]
async fn run_generate(args: &[String]) -> ExitCode {
    ExitCode::from(cli::generate_cmd::run_generate(args).await as u8)
}

#[cfg(not(feature = "gguf"))]
async fn run_generate(_args: &[String]) -> ExitCode {
    eprintln!("generate needs a backend; rebuild with --features gguf");
    ExitCode::from(cli::EXIT_CONFIG as u8)
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "GG-STREAM - Streaming generation engine v{}

USAGE:
    gg-stream-cli <COMMAND> [OPTIONS]

COMMANDS:
    probe        Probe accelerators and print the offload decision
    generate     Stream a completion from a GGUF model
    quant        Resolve a quantization type by name or id
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

EXAMPLES:
    gg-stream-cli probe
    gg-stream-cli generate model.gguf \"Hello\" --max-tokens 64
    gg-stream-cli quant q4_k_m
    gg-stream-cli config validate

ENVIRONMENT:
    GG_STREAM_BACKEND     Offload target: auto, cpu, cuda, metal, vulkan (default: auto)
    GG_STREAM_GPU_LAYERS  Layers to offload, or auto
    GG_STREAM_LOG_FORMAT  json or pretty (default: json)
    GG_STREAM_LOG_LEVEL   Log filter (default: info)

EXIT CODES:
    0  Success
    1  Failure
    2  Configuration error",
        version
    );
}

fn print_command_help(command: &str) {
    match command {
        "probe" => {
            eprintln!(
                "gg-stream-cli probe

Enumerate compute devices, pick a backend and print the negotiated
offload preference with runtime diagnostics as JSON.

EXIT CODES:
    0  Probe completed
    1  Backend initialization failed
    2  Built without a backend"
            );
        }
        "generate" => {
            eprintln!(
                "gg-stream-cli generate <MODEL> <PROMPT> [OPTIONS]

Stream a completion to stdout. Statistics go to stderr.

OPTIONS:
    --max-tokens N   Tokens to generate (default: GG_STREAM_MAX_LENGTH)
    --threads N      Worker threads, 0 for automatic (default: 0)
    --strip-think    Remove reasoning spans from the output"
            );
        }
        "quant" => {
            eprintln!(
                "gg-stream-cli quant <NAME|ID>

Resolve a quantization type (e.g. Q4_K_M, q8_0, 15) and print it as JSON.

EXIT CODES:
    0  Known type
    2  Unknown type"
            );
        }
        "config" => {
            eprintln!(
                "gg-stream-cli config <SUBCOMMAND>

SUBCOMMANDS:
    show       Print effective configuration
    defaults   Print default configuration
    validate   Check settings (exit 1 on warnings, 2 on rejected values)"
            );
        }
        _ => {
            eprintln!("No help available for '{}'", command);
            print_usage();
        }
    }
}
