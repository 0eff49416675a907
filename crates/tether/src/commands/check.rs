//! `tether check` - connect to a server and report on it.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use tether_mcp::{ConnectionStatus, TransportKind};

use super::Context;

/// Arguments for `tether check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Id of the server to check
    pub id: String,
}

/// Check result for JSON output.
#[derive(Debug, Serialize)]
struct CheckOutput {
    id: String,
    transport: TransportKind,
    status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run the check command.
pub async fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let server = ctx.config.server(&args.id)?;
    let transport = server.transport.kind();

    let (manager, _) = match ctx.connect_one(&args.id).await {
        Ok(connected) => connected,
        Err(e) => {
            if ctx.json_output {
                let output = CheckOutput {
                    id: args.id.clone(),
                    transport,
                    status: ConnectionStatus::Error,
                    server_name: None,
                    server_version: None,
                    protocol_version: None,
                    tool_count: None,
                    error: Some(e.to_string()),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let red = Style::new().red();
                println!("  {} {}", red.apply_to("●"), e);
            }
            return Err(e);
        }
    };

    let tools = manager.list_tools(&args.id).await;
    let snapshot = manager.connection(&args.id);
    manager.dispose().await;

    let snapshot = snapshot.ok_or_else(|| anyhow::anyhow!("server '{}' vanished", args.id))?;
    let info = snapshot.server_info.clone();

    if ctx.json_output {
        let (tool_count, error) = match &tools {
            Ok(tools) => (Some(tools.len()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let output = CheckOutput {
            id: args.id.clone(),
            transport,
            status: snapshot.status,
            server_name: info.as_ref().map(|i| i.name.clone()),
            server_version: info.as_ref().map(|i| i.version.clone()),
            protocol_version: snapshot.protocol_version.clone(),
            tool_count,
            error,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let green = Style::new().green();
    let dim = Style::new().dim();

    println!();
    println!("{}", style(format!("MCP Server: {}", snapshot.name)).bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!(
        "  {} {}",
        dim.apply_to("Status:   "),
        green.apply_to(format!("● {}", snapshot.status))
    );
    println!("  {} {}", dim.apply_to("Transport:"), transport);
    if let Some(info) = &info {
        println!("  {} {} {}", dim.apply_to("Server:   "), info.name, info.version);
    }
    if let Some(version) = &snapshot.protocol_version {
        println!("  {} {}", dim.apply_to("Protocol: "), version);
    }
    match &tools {
        Ok(tools) => println!("  {} {}", dim.apply_to("Tools:    "), tools.len()),
        Err(e) => println!("  {} {}", dim.apply_to("Tools:    "), Style::new().red().apply_to(e)),
    }
    println!();

    Ok(())
}
