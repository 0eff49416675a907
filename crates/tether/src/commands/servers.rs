//! `tether servers` - list configured servers.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde_json::json;
use tether_mcp::{ServerConfig, TransportConfig};

use super::{Context, truncate};

/// Arguments for `tether servers`.
#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Only show servers carrying this tag
    #[arg(long)]
    pub tag: Option<String>,
}

/// Run the servers command.
pub async fn run(args: ServersArgs, ctx: &Context) -> Result<()> {
    let servers: Vec<&ServerConfig> = ctx
        .config
        .servers
        .iter()
        .filter(|s| args.tag.as_ref().is_none_or(|tag| s.tags.contains(tag)))
        .collect();

    if ctx.json_output {
        let output: Vec<_> = servers
            .iter()
            .map(|s| {
                json!({
                    "id": s.id,
                    "name": s.display_name(),
                    "transport": s.transport.kind(),
                    "target": s.transport.target(),
                    "enabled": s.enabled,
                    "tags": s.tags,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if servers.is_empty() {
        match &ctx.config_path {
            Some(path) => println!("No MCP servers configured in {}.", path.display()),
            None => println!("No MCP servers configured."),
        }
        println!();
        println!("Add a [[servers]] entry to your config file, for example:");
        println!();
        println!("  [[servers]]");
        println!("  id = \"sqlite\"");
        println!("  transport = {{ type = \"stdio\", command = \"mcp-server-sqlite\" }}");
        return Ok(());
    }

    let dim = Style::new().dim();
    println!(
        "{}",
        style(format!(
            "{:<20} {:<10} {:<9} {:<40}",
            "ID", "TRANSPORT", "ENABLED", "TARGET"
        ))
        .bold()
    );
    println!("{}", dim.apply_to("-".repeat(80)));

    for server in servers {
        let enabled = if server.enabled {
            style(format!("{:<9}", "yes")).green()
        } else {
            style(format!("{:<9}", "no")).dim()
        };
        println!(
            "{:<20} {:<10} {} {:<40}",
            truncate(&server.id, 20),
            server.transport.kind().to_string(),
            enabled,
            truncate(&server.transport.target(), 40)
        );

        if ctx.verbose {
            print_details(server, &dim);
        }
    }

    Ok(())
}

fn print_details(server: &ServerConfig, dim: &Style) {
    if !server.name.is_empty() {
        println!("  {} {}", dim.apply_to("Name:"), server.name);
    }
    if !server.tags.is_empty() {
        println!("  {} {}", dim.apply_to("Tags:"), server.tags.join(", "));
    }
    println!("  {} {}ms", dim.apply_to("Timeout:"), server.timeout_ms);
    if let Some(auto) = server.auto_reconnect {
        println!("  {} {}", dim.apply_to("Auto-reconnect:"), auto);
    }
    match &server.transport {
        TransportConfig::Stdio(stdio) => {
            if let Some(cwd) = &stdio.cwd {
                println!("  {} {}", dim.apply_to("Working dir:"), cwd.display());
            }
            if !stdio.env.is_empty() {
                println!("  {}", dim.apply_to("Environment:"));
                for key in stdio.env.keys() {
                    println!("    {}=***", key);
                }
            }
        }
        TransportConfig::Http(http) => {
            println!("  {} {}", dim.apply_to("Retries:"), http.retries);
            print_header_names(http.headers.keys(), dim);
        }
        TransportConfig::WebSocket(ws) => print_header_names(ws.headers.keys(), dim),
    }
}

fn print_header_names<'a>(names: impl Iterator<Item = &'a String>, dim: &Style) {
    let names: Vec<&str> = names.map(String::as_str).collect();
    if !names.is_empty() {
        println!("  {} {}", dim.apply_to("Headers:"), names.join(", "));
    }
}
