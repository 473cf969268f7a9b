//! Build the file context for a question about a codebase.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! ```sh
//! context-builder --workdir ~/src/server --prompt "How is auth enforced?" --batch-size 16
//! ```
//!
//! Exit codes: `0` finished, `2` loop budget exhausted, `1` setup or
//! model-service failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use context_builder::{BuilderConfig, build_context};
use toolloop::DEFAULT_MODEL;
use toolloop::agent::LoggingHandler;
use toolloop::api::{ModelService, OpenRouterClient};
use toolloop::logging::init_logging;

/// Select the files relevant to a question about a codebase.
#[derive(Parser)]
#[command(name = "context-builder")]
struct Cli {
    /// The question the context is for.
    #[arg(long)]
    prompt: String,

    /// Model for the driver.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Model for relevance sub-queries (defaults to --model).
    #[arg(long)]
    classifier_model: Option<String>,

    /// Codebase root. All file tools are confined to it.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Maximum model calls in the conversation.
    #[arg(long, default_value_t = 20)]
    max_rounds: u32,

    /// Reasoning token budget per model call (0 disables reasoning).
    #[arg(long, default_value_t = 0)]
    thinking_budget: u32,

    /// Maximum tokens per model response.
    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Concurrent relevance classifications.
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// Attempts per model call before giving up.
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Log at debug level.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    });

    let workdir = match std::fs::canonicalize(&cli.workdir) {
        Ok(path) if path.is_dir() => path,
        Ok(path) => {
            eprintln!("Error: {} is not a directory", path.display());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: cannot open workdir {}: {e}", cli.workdir.display());
            return ExitCode::FAILURE;
        }
    };

    let api_key = match std::env::var("OPENROUTER_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENROUTER_KEY environment variable is not set");
            return ExitCode::FAILURE;
        }
    };

    let client = match OpenRouterClient::with_headers(
        api_key,
        "https://github.com/toolloop-rs/toolloop",
        "context-builder",
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: failed to create API client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let service: Arc<dyn ModelService> = Arc::new(client);

    let config = BuilderConfig {
        model: cli.model,
        classifier_model: cli.classifier_model,
        workdir,
        max_rounds: cli.max_rounds,
        max_tokens: cli.max_tokens,
        thinking_budget: cli.thinking_budget,
        temperature: 0.0,
        batch_size: cli.batch_size,
        retries: cli.retries,
    };

    match build_context(&config, service, &cli.prompt, &LoggingHandler).await {
        Ok(outcome) => {
            if outcome.run.completed() {
                println!("{}", outcome.render());
            } else {
                eprintln!("{}", outcome.render());
            }
            ExitCode::from(&outcome)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
