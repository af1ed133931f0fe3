//! code-sandbox
//!
//! Runs python, javascript and bash snippets under a denylist and a timeout,
//! either as an MCP server on stdio or once from the command line.
//! Executor settings come from `--config` or the `CODE_SANDBOX_CONFIG` env var.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use code_sandbox::{config::Config, mcp, ExecuteRequest, ExecutionManager};

#[derive(Parser, Debug)]
#[command(name = "code-sandbox")]
#[command(about = "Denylist-guarded, time-bounded execution of code snippets")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long)]
    stdio: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// JSON configuration file (overrides CODE_SANDBOX_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Language of the code; detected when omitted
    #[arg(long, short)]
    language: Option<String>,

    /// Timeout in seconds
    #[arg(long, short)]
    timeout: Option<u64>,

    /// Print the available languages and exit
    #[arg(long)]
    list: bool,

    /// Print the detected language instead of running the code
    #[arg(long)]
    detect: bool,

    /// File to execute; stdin is read when omitted
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol and results)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?;

    info!(
        configured = ?config.executors.keys().collect::<Vec<_>>(),
        "Loaded configuration"
    );

    let manager = ExecutionManager::from_config(&config).await;

    if args.stdio {
        mcp::serve_stdio(Arc::new(manager)).await?;
        return Ok(ExitCode::SUCCESS);
    }

    if args.list {
        for language in manager.list_supported_languages() {
            println!("{language}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let code = read_code(args.file.as_ref())?;

    if args.detect {
        return Ok(match manager.detect_language(&code) {
            Some(language) => {
                println!("{language}");
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("Could not detect the language of the code");
                ExitCode::FAILURE
            }
        });
    }

    let request = ExecuteRequest {
        code,
        language: args.language,
        timeout: args.timeout,
        ..ExecuteRequest::default()
    };
    let result = manager.execute(&request).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize result")?
    );

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_code(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("Failed to read code from stdin")?;
            Ok(code)
        }
    }
}
