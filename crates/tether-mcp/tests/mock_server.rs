//! Mock MCP server for integration testing.
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout. Each `tools/call` is
//! served on its own thread, so replies can come back out of order.
//!
//! Usage:
//!   mock-mcp-server [--delay-ms N] [--crash-on TOOL] [--slow-tool TOOL:MS]
//!                   [--omit-protocol-version] [--notify-on-init]
//!
//! Options:
//!   --delay-ms N               Add N ms delay to all responses
//!   --crash-on TOOL            Exit with code 1 when TOOL is called
//!   --slow-tool T:MS           Add MS delay when tool T is called
//!   --omit-protocol-version    Leave protocolVersion out of the handshake
//!   --notify-on-init           Send tools/list_changed after initialization

use std::env;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Server behaviour parsed from the command line.
#[derive(Default)]
struct MockOptions {
    delay_ms: u64,
    crash_on: Option<String>,
    slow_tools: Vec<(String, u64)>,
    omit_protocol_version: bool,
    notify_on_init: bool,
}

impl MockOptions {
    fn from_args() -> Self {
        let mut options = Self::default();
        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--delay-ms" => {
                    options.delay_ms = args.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                }
                "--crash-on" => options.crash_on = args.next(),
                "--slow-tool" => {
                    if let Some((tool, ms)) = args.next().as_deref().and_then(|v| v.split_once(':')) {
                        if let Ok(ms) = ms.parse() {
                            options.slow_tools.push((tool.to_string(), ms));
                        }
                    }
                }
                "--omit-protocol-version" => options.omit_protocol_version = true,
                "--notify-on-init" => options.notify_on_init = true,
                _ => {}
            }
        }
        options
    }

    fn tool_delay(&self, tool_name: &str) -> u64 {
        self.slow_tools
            .iter()
            .find(|(tool, _)| tool == tool_name)
            .map(|(_, ms)| *ms)
            .unwrap_or(0)
    }
}

type Output = Arc<Mutex<std::io::Stdout>>;

fn write_line(out: &Output, message: &Value) {
    let mut out = out.lock().unwrap();
    writeln!(out, "{}", message).unwrap();
    out.flush().unwrap();
}

fn reply(out: &Output, id: &Value, outcome: Result<Value, (i64, String)>) {
    let message = match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        }),
    };
    write_line(out, &message);
}

fn main() {
    let options = Arc::new(MockOptions::from_args());
    let out: Output = Arc::new(Mutex::new(std::io::stdout()));
    let stdin = std::io::stdin();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { return };
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock-mcp-server: ignoring unparsable line");
            continue;
        };
        let method = message.get("method").and_then(Value::as_str).unwrap_or("").to_string();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = message.get("id").cloned() else {
            if method == "notifications/initialized" && options.notify_on_init {
                write_line(
                    &out,
                    &json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}),
                );
            }
            continue;
        };

        if options.delay_ms > 0 {
            thread::sleep(Duration::from_millis(options.delay_ms));
        }

        if method == "tools/call" {
            let tool = params.get("name").and_then(Value::as_str).unwrap_or("").to_string();
            if options.crash_on.as_deref() == Some(tool.as_str()) || tool == "crash" {
                std::process::exit(1);
            }
            let out = Arc::clone(&out);
            let options = Arc::clone(&options);
            thread::spawn(move || {
                let delay = options.tool_delay(&tool);
                if delay > 0 {
                    thread::sleep(Duration::from_millis(delay));
                }
                reply(&out, &id, call_tool(&tool, &params));
            });
            continue;
        }

        let outcome = handle_request(&method, &params, &options);
        reply(&out, &id, outcome);
    }
}

fn handle_request(method: &str, params: &Value, options: &MockOptions) -> Result<Value, (i64, String)> {
    match method {
        "initialize" => {
            let mut result = json!({
                "capabilities": {
                    "tools": {"listChanged": true},
                    "resources": {},
                    "prompts": {}
                },
                "serverInfo": {
                    "name": "mock-mcp-server",
                    "version": "1.0.0"
                }
            });
            if !options.omit_protocol_version {
                result["protocolVersion"] = json!("2024-11-05");
            }
            Ok(result)
        }
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Echo back the input",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"message": {"type": "string"}},
                        "required": ["message"]
                    }
                },
                {
                    "name": "add",
                    "description": "Add two numbers",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                        "required": ["a", "b"]
                    }
                },
                {
                    "name": "slow",
                    "description": "A slow tool for testing timeouts",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"delay_ms": {"type": "number"}}
                    }
                },
                {
                    "name": "crash",
                    "description": "Crashes the server (for testing)",
                    "inputSchema": {"type": "object", "properties": {}}
                }
            ]
        })),
        "resources/list" => Ok(json!({
            "resources": [
                {"uri": "mock://greeting", "name": "greeting", "mimeType": "text/plain"}
            ]
        })),
        "resources/read" => {
            let uri = params.get("uri").and_then(Value::as_str).unwrap_or("");
            if uri == "mock://greeting" {
                Ok(json!({
                    "contents": [{"uri": uri, "mimeType": "text/plain", "text": "hello from mock"}]
                }))
            } else {
                Err((-32002, format!("Resource not found: {}", uri)))
            }
        }
        "prompts/list" => Ok(json!({
            "prompts": [
                {
                    "name": "summarize",
                    "description": "Summarize a topic",
                    "arguments": [{"name": "topic", "required": true}]
                }
            ]
        })),
        "prompts/get" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            if name == "summarize" {
                let topic = params
                    .pointer("/arguments/topic")
                    .and_then(Value::as_str)
                    .unwrap_or("nothing");
                Ok(json!({
                    "description": "Summarize a topic",
                    "messages": [
                        {"role": "user", "content": {"type": "text", "text": format!("Summarize {}", topic)}}
                    ]
                }))
            } else {
                Err((-32003, format!("Prompt not found: {}", name)))
            }
        }
        _ => Err((-32601, format!("Method not found: {}", method))),
    }
}

fn call_tool(name: &str, params: &Value) -> Result<Value, (i64, String)> {
    let args = params.get("arguments").cloned().unwrap_or(json!({}));
    let text = match name {
        "echo" => args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        "add" => {
            let a = args.get("a").and_then(Value::as_f64).unwrap_or(0.0);
            let b = args.get("b").and_then(Value::as_f64).unwrap_or(0.0);
            format!("{}", a + b)
        }
        "slow" => {
            let delay = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(1000);
            thread::sleep(Duration::from_millis(delay));
            format!("Slept for {} ms", delay)
        }
        _ => return Err((-32001, format!("Unknown tool: {}", name))),
    };
    Ok(json!({"content": [{"type": "text", "text": text}]}))
}
