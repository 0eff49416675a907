//! `tether tools` - list the tools a server offers.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use super::{Context, truncate};

/// Arguments for `tether tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Id of the server
    pub id: String,

    /// Show full input schemas
    #[arg(long)]
    pub full: bool,
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let (manager, server) = ctx.connect_one(&args.id).await?;
    let tools = manager.list_tools(&args.id).await;
    manager.dispose().await;
    let tools = tools?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!(
        "{}",
        style(format!("Tools on {} ({})", server.display_name(), tools.len())).bold()
    );
    println!("{}", dim.apply_to("─".repeat(40)));

    if tools.is_empty() {
        println!("  {}", dim.apply_to("(none)"));
    }

    for tool in &tools {
        let description = tool.description.as_deref().unwrap_or("");
        if args.full {
            println!();
            println!("  {}", style(&tool.name).cyan());
            if !description.is_empty() {
                println!("    {}", description);
            }
            if let Some(schema) = &tool.input_schema {
                let pretty = serde_json::to_string_pretty(schema)?;
                for line in pretty.lines() {
                    println!("    {}", dim.apply_to(line));
                }
            }
        } else {
            println!(
                "  {:<24} {}",
                style(truncate(&tool.name, 24)).cyan(),
                dim.apply_to(truncate(description, 54))
            );
        }
    }
    println!();

    Ok(())
}
