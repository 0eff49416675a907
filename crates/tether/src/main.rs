//! Tether - operator CLI for MCP server connections
//!
//! Main entry point for the `tether` binary.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;

use commands::{call, check, servers, tools, watch};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Tether - connect to and inspect MCP servers
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers
    Servers(servers::ServersArgs),

    /// Connect to a server and report its status
    Check(check::CheckArgs),

    /// List the tools a server offers
    Tools(tools::ToolsArgs),

    /// Invoke a tool
    Call(call::CallArgs),

    /// Connect to servers and stream connection events
    Watch(watch::WatchArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "tether=debug,tether_mcp=debug,info"
    } else {
        "tether=warn,tether_mcp=warn,error"
    };

    let log_dir = config::xdg_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tether.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "tether=trace,tether_mcp=trace,info",
                )),
        )
        .init();

    let loaded = config::load_config(cli.config.as_deref())?;

    let ctx = commands::Context {
        config: loaded.config,
        config_path: loaded.path,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Servers(args) => servers::run(args, &ctx).await,
        Commands::Check(args) => check::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
        Commands::Watch(args) => watch::run(args, &ctx).await,
    }
}
