//! `tether watch` - connect servers and stream their events until Ctrl-C.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use tether_mcp::{ConnectionEvent, ConnectionStatus};
use tokio::sync::broadcast::error::RecvError;

use super::Context;

/// Arguments for `tether watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Only connect these servers (default: every enabled server)
    pub ids: Vec<String>,
}

/// Run the watch command.
pub async fn run(args: WatchArgs, ctx: &Context) -> Result<()> {
    for id in &args.ids {
        ctx.config.server(id)?;
    }

    let manager = ctx.manager()?;
    let mut events = manager.subscribe();

    if args.ids.is_empty() {
        for (id, result) in manager.connect_all().await {
            if let Err(e) = result {
                tracing::warn!(server = %id, error = %e, "initial connect failed");
            }
        }
    } else {
        for id in &args.ids {
            if let Err(e) = manager.connect(id).await {
                tracing::warn!(server = %id, error = %e, "initial connect failed");
            }
        }
    }

    if !ctx.json_output {
        println!(
            "{}",
            style("Watching MCP connections (Ctrl-C to stop)").dim()
        );
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, ctx.json_output)?,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.dispose().await;
    Ok(())
}

fn print_event(event: &ConnectionEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let id = style(event.server_id()).bold();
    match event {
        ConnectionEvent::Added { .. } => println!("{} added", id),
        ConnectionEvent::Removed { .. } => println!("{} removed", id),
        ConnectionEvent::StatusChanged { old, new, .. } => {
            let color = match new {
                ConnectionStatus::Connected => Style::new().green(),
                ConnectionStatus::Connecting => Style::new().yellow(),
                ConnectionStatus::Error => Style::new().red(),
                ConnectionStatus::Disconnected => Style::new().dim(),
            };
            println!("{} {} -> {}", id, old, color.apply_to(new));
        }
        ConnectionEvent::Error { error, .. } => {
            println!("{} {} {}", id, Style::new().red().apply_to("error:"), error)
        }
        ConnectionEvent::Closed { .. } => println!("{} closed by server", id),
        ConnectionEvent::ReconnectScheduled { attempt, delay, .. } => {
            println!("{} reconnect #{} in {:?}", id, attempt, delay)
        }
        ConnectionEvent::Notification { method, params, .. } => match params {
            Some(params) => println!("{} {} {}", id, style(method).cyan(), params),
            None => println!("{} {}", id, style(method).cyan()),
        },
    }
    Ok(())
}
