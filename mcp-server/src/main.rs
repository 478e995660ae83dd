mod config;
mod stdio;
mod tasks;
mod telemetry;
mod tools;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{error, info};

use crate::config::Config;
use crate::stdio::StdioServer;
use crate::telemetry::{init_telemetry, log_config_validation, log_startup_info};
use crate::tools::ToolServer;

/// Exit codes: 0 success, 1 operational failure, 2 argument error (clap),
/// 130 user cancellation.
const EXIT_FAILURE: i32 = 1;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "cde-mcp")]
#[command(about = "CDE Orchestrator - workflow and agent routing over stdio")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Serve tool calls over stdin/stdout
    #[arg(long)]
    serve: bool,

    /// Run a single tool call and print its JSON result
    #[arg(long)]
    tool: Option<String>,

    /// JSON argument record for --tool
    #[arg(long, default_value = "{}")]
    args: String,

    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<String>,

    /// Log level override
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(config_file) => {
            info!("Loading configuration from file: {}", config_file);
            Config::from_file(config_file)?
        }
        None => Config::from_env()?,
    };
    if let Some(ref log_level) = cli.log_level {
        config.logging.level = log_level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(&cli).context("Failed to load configuration")?;
    init_telemetry(&config.logging).context("Failed to initialize telemetry")?;
    log_config_validation(&config);
    if let Err(e) = config.validate() {
        error!(error = %e, "Configuration validation failed");
        std::process::exit(EXIT_FAILURE);
    }
    log_startup_info(&config);

    let tools = ToolServer::new(config).context("Failed to wire components")?;

    if let Some(tool) = cli.tool {
        let arguments: Value = match serde_json::from_str(&cli.args) {
            Ok(arguments) => arguments,
            Err(e) => {
                eprintln!("Invalid --args JSON: {e}");
                std::process::exit(2);
            }
        };

        let result = tokio::select! {
            result = tools.handle(&tool, &arguments) => result,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelled");
                std::process::exit(EXIT_CANCELLED);
            }
        };

        println!("{}", serde_json::to_string_pretty(&result)?);
        let failed = result.get("error").and_then(|e| e.as_bool()).unwrap_or(false);
        if failed {
            let cancelled = result.get("code").and_then(|c| c.as_str()) == Some("E400");
            std::process::exit(if cancelled { EXIT_CANCELLED } else { EXIT_FAILURE });
        }
        return Ok(());
    }

    if !cli.serve {
        println!("CDE Orchestrator");
        println!();
        println!("Usage:");
        println!("  cde-mcp --serve                       # stdio tool server");
        println!("  cde-mcp --tool health_check           # one-shot tool call");
        println!("  cde-mcp --tool select_workflow --args '{{\"prompt\": \"Fix typo\"}}'");
        println!();
        println!("For more options, use: cde-mcp --help");
        return Ok(());
    }

    let server = StdioServer::new(tools);
    tokio::select! {
        result = server.serve() => {
            match result {
                Ok(()) => {
                    info!("Server shut down cleanly");
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Server error");
                    std::process::exit(EXIT_FAILURE);
                }
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server");
            std::process::exit(EXIT_CANCELLED);
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to register SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl+c");
        info!("Received Ctrl+C");
    }
}
