//! MCP Host Daemon - supervises MCP server subprocesses and reverse-proxies
//! requests to them.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

#[derive(Parser)]
#[command(name = "mcp-host-daemon")]
#[command(about = "Local control-plane host for MCP server subprocesses")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mcp_host_daemon={}", log_level).into()),
        )
        .init();

    info!("Starting MCP Host Daemon v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Configure) => {
            if let Err(e) = cmd::configure::run(&cli.config).await {
                error!("Configure failed: {}", e);
                std::process::exit(2);
            }
        }
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run(&cli.config).await?;
        }
        None => {
            if let Err(e) = cmd::root::run(&cli.config).await {
                error!("Daemon error: {}", e);
                std::process::exit(e.exit_code());
            }
        }
    }

    Ok(())
}
