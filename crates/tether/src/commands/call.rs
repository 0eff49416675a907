//! `tether call` - invoke a tool on a server.

use anyhow::{Context as _, Result};
use clap::Args;
use console::Style;
use serde_json::Value;
use tether_mcp::ToolContent;

use super::Context;

/// Arguments for `tether call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Id of the server
    pub id: String,

    /// Tool name
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long, short)]
    pub args: Option<String>,
}

/// Run the call command.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(args.args.as_deref())?;

    let (manager, _) = ctx.connect_one(&args.id).await?;
    let result = manager.call_tool(&args.id, &args.tool, arguments).await;
    manager.dispose().await;
    let result = result?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for item in &result.content {
            match item {
                ToolContent::Text { text } => println!("{}", text),
                ToolContent::Image { mime_type, data } => {
                    println!("[image {} ({} bytes base64)]", mime_type, data.len())
                }
                ToolContent::Resource { resource } => match &resource.text {
                    Some(text) => println!("{}", text),
                    None => println!("[resource {}]", resource.uri),
                },
                ToolContent::Other => println!("[unsupported content]"),
            }
        }
    }

    if result.is_error() {
        if !ctx.json_output {
            eprintln!("{}", Style::new().red().apply_to("tool reported an error"));
        }
        anyhow::bail!("tool '{}' on '{}' reported an error", args.tool, args.id);
    }

    Ok(())
}

/// Parse `--args`, which must be a JSON object when present.
fn parse_arguments(raw: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("--args must be a JSON object");
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(None).unwrap(), None);
        assert_eq!(
            parse_arguments(Some(r#"{"message": "hi"}"#)).unwrap(),
            Some(json!({"message": "hi"}))
        );
        assert!(parse_arguments(Some("[1, 2]")).is_err());
        assert!(parse_arguments(Some("{not json")).is_err());
    }
}
