//! Integration tests for the connection manager.
//!
//! Stdio tests drive the `mock-mcp-server` binary. HTTP tests run against a
//! wiremock endpoint and WebSocket tests against a local tokio-tungstenite
//! server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tether_mcp::{
    ConnectionEvent, ConnectionManager, ConnectionStatus, ManagerConfig, McpError,
    RequestOptions, ServerConfig,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const MOCK_SERVER: &str = env!("CARGO_BIN_EXE_mock-mcp-server");

fn mock_stdio(id: &str) -> ServerConfig {
    ServerConfig::stdio(id, MOCK_SERVER).with_timeout(Duration::from_secs(10))
}

fn no_reconnect() -> ManagerConfig {
    ManagerConfig::default().with_auto_reconnect(false)
}

async fn connected(config: ServerConfig, manager_config: ManagerConfig) -> anyhow::Result<ConnectionManager> {
    let manager = ConnectionManager::new(manager_config);
    let id = config.id.clone();
    manager.add_connection(config)?;
    manager.connect(&id).await?;
    Ok(manager)
}

/// Wait until an event matching `pred` arrives; returns everything seen.
async fn wait_for(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> Vec<ConnectionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed");
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdio
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stdio_connect_and_initialize() -> anyhow::Result<()> {
    let manager = connected(mock_stdio("mock"), no_reconnect()).await?;

    let snapshot = manager.connection("mock").expect("registered");
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    let info = snapshot.server_info.expect("server info");
    assert_eq!(info.name, "mock-mcp-server");
    assert_eq!(info.version, "1.0.0");
    assert_eq!(snapshot.protocol_version.as_deref(), Some("2024-11-05"));

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_stdio_tools() -> anyhow::Result<()> {
    let manager = connected(mock_stdio("mock"), no_reconnect()).await?;

    let tools = manager.list_tools("mock").await?;
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "add", "slow", "crash"]);
    assert_eq!(tools[0].description.as_deref(), Some("Echo back the input"));

    let echoed = manager
        .call_tool("mock", "echo", Some(json!({"message": "Hello, MCP!"})))
        .await?;
    assert_eq!(echoed.text().as_deref(), Some("Hello, MCP!"));
    assert!(!echoed.is_error());

    let sum = manager
        .call_tool("mock", "add", Some(json!({"a": 2, "b": 3})))
        .await?;
    assert_eq!(sum.text().as_deref(), Some("5"));

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_stdio_unknown_tool_is_tool_not_found() -> anyhow::Result<()> {
    let manager = connected(mock_stdio("mock"), no_reconnect()).await?;

    match manager.call_tool("mock", "nonexistent", None).await {
        Err(McpError::ToolNotFound { name, server_id }) => {
            assert_eq!(name, "nonexistent");
            assert_eq!(server_id, "mock");
        }
        other => panic!("expected ToolNotFound, got {other:?}"),
    }
    assert_eq!(manager.status("mock"), Some(ConnectionStatus::Connected));

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_stdio_resources_and_prompts() -> anyhow::Result<()> {
    let manager = connected(mock_stdio("mock"), no_reconnect()).await?;

    let resources = manager.list_resources("mock").await?;
    assert_eq!(resources.len(), 1);
    let read = manager.read_resource("mock", &resources[0].uri).await?;
    assert_eq!(read.contents[0].text.as_deref(), Some("hello from mock"));
    assert!(matches!(
        manager.read_resource("mock", "mock://missing").await,
        Err(McpError::ResourceNotFound { ref uri, .. }) if uri == "mock://missing"
    ));

    let prompts = manager.list_prompts("mock").await?;
    assert_eq!(prompts[0].name, "summarize");
    assert!(prompts[0].arguments[0].required);
    let rendered = manager
        .get_prompt("mock", "summarize", Some(json!({"topic": "rust"})))
        .await?;
    assert_eq!(rendered.messages.len(), 1);
    assert_eq!(rendered.messages[0].role, "user");
    assert!(matches!(
        manager.get_prompt("mock", "nope", None).await,
        Err(McpError::PromptNotFound { ref name, .. }) if name == "nope"
    ));

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_stdio_missing_protocol_version_schedules_one_reconnect() -> anyhow::Result<()> {
    let manager = ConnectionManager::new(
        ManagerConfig::default().with_reconnect_base_delay(Duration::from_secs(60)),
    );
    let mut events = manager.subscribe();
    manager.add_connection(mock_stdio("bad").with_arg("--omit-protocol-version"))?;

    let err = manager.connect("bad").await.unwrap_err();
    assert!(matches!(err, McpError::Connection(_)), "got {err:?}");

    let snapshot = manager.connection("bad").expect("registered");
    assert_eq!(snapshot.status, ConnectionStatus::Error);
    assert_eq!(snapshot.reconnect_attempts, 1);

    let seen = wait_for(&mut events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })).await;
    match seen.last() {
        Some(ConnectionEvent::ReconnectScheduled { attempt, delay, .. }) => {
            assert_eq!(*attempt, 1);
            assert_eq!(*delay, Duration::from_secs(60));
        }
        other => panic!("expected ReconnectScheduled, got {other:?}"),
    }
    assert!(events.try_recv().is_err());

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_stdio_timeout_fails_alone() -> anyhow::Result<()> {
    let manager = connected(mock_stdio("mock"), no_reconnect()).await?;

    let slow = manager
        .request(
            "mock",
            "tools/call",
            Some(json!({"name": "slow", "arguments": {"delay_ms": 2000}})),
            RequestOptions::with_timeout(Duration::from_millis(200)),
        )
        .await;
    assert!(matches!(slow, Err(McpError::Timeout { .. })), "got {slow:?}");

    let echoed = manager
        .call_tool("mock", "echo", Some(json!({"message": "still here"})))
        .await?;
    assert_eq!(echoed.text().as_deref(), Some("still here"));
    assert_eq!(manager.status("mock"), Some(ConnectionStatus::Connected));

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_stdio_out_of_order_replies() -> anyhow::Result<()> {
    let manager = connected(mock_stdio("mock"), no_reconnect()).await?;

    let (slow, fast) = tokio::join!(
        manager.call_tool("mock", "slow", Some(json!({"delay_ms": 300}))),
        manager.call_tool("mock", "echo", Some(json!({"message": "fast"}))),
    );
    assert_eq!(slow?.text().as_deref(), Some("Slept for 300 ms"));
    assert_eq!(fast?.text().as_deref(), Some("fast"));

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_stdio_server_crash_closes_connection() -> anyhow::Result<()> {
    let manager = connected(mock_stdio("mock"), no_reconnect()).await?;
    let mut events = manager.subscribe();

    let result = manager.call_tool("mock", "crash", None).await;
    assert!(matches!(result, Err(McpError::Connection(_))), "got {result:?}");

    let seen = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Closed { .. })).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        ConnectionEvent::StatusChanged { new: ConnectionStatus::Disconnected, .. }
    )));
    assert_eq!(manager.status("mock"), Some(ConnectionStatus::Disconnected));
    assert!(matches!(
        manager.list_tools("mock").await,
        Err(McpError::Connection(_))
    ));

    // A fresh process comes up on demand.
    manager.connect("mock").await?;
    assert_eq!(manager.list_tools("mock").await?.len(), 4);

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_stdio_notification_is_forwarded() -> anyhow::Result<()> {
    let manager = ConnectionManager::new(no_reconnect());
    let mut events = manager.subscribe();
    manager.add_connection(mock_stdio("mock").with_arg("--notify-on-init"))?;
    manager.connect("mock").await?;

    let seen = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Notification { .. })).await;
    match seen.last() {
        Some(ConnectionEvent::Notification { server_id, method, .. }) => {
            assert_eq!(server_id, "mock");
            assert_eq!(method, "notifications/tools/list_changed");
        }
        other => panic!("expected notification, got {other:?}"),
    }

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_stdio_missing_binary_is_error_state() -> anyhow::Result<()> {
    let manager = ConnectionManager::new(no_reconnect());
    manager.add_connection(ServerConfig::stdio("ghost", "/nonexistent/mcp-server"))?;
    assert!(matches!(
        manager.connect("ghost").await,
        Err(McpError::Connection(_))
    ));
    assert_eq!(manager.status("ghost"), Some(ConnectionStatus::Error));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// Answers MCP requests by echoing their ids back.
struct McpResponder;

impl Respond for McpResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(400);
        };
        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };
        let reply = match body["method"].as_str() {
            Some("initialize") => json!({"jsonrpc": "2.0", "id": id, "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "http-mock", "version": "0.1.0"}
            }}),
            Some("tools/list") => json!({"jsonrpc": "2.0", "id": id, "result": {
                "tools": [{"name": "lookup", "inputSchema": {"type": "object"}}]
            }}),
            Some("tools/call") => json!({"jsonrpc": "2.0", "id": id, "error": {
                "code": -32001, "message": "unknown tool"
            }}),
            _ => json!({"jsonrpc": "2.0", "id": id, "error": {
                "code": -32601, "message": "method not found"
            }}),
        };
        ResponseTemplate::new(200).set_body_json(reply)
    }
}

async fn http_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(McpResponder)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_http_connect_and_list_tools() -> anyhow::Result<()> {
    let server = http_server().await;
    let manager = connected(
        ServerConfig::http("remote", format!("{}/mcp", server.uri())).with_header("x-api-key", "k"),
        no_reconnect(),
    )
    .await?;

    let snapshot = manager.connection("remote").expect("registered");
    assert_eq!(snapshot.server_info.map(|i| i.name).as_deref(), Some("http-mock"));

    let tools = manager.list_tools("remote").await?;
    assert_eq!(tools[0].name, "lookup");

    assert!(matches!(
        manager.call_tool("remote", "missing", None).await,
        Err(McpError::ToolNotFound { ref name, ref server_id }) if name == "missing" && server_id == "remote"
    ));

    // initialize, notifications/initialized, tools/list, tools/call
    let received = server.received_requests().await.unwrap_or_default();
    assert_eq!(received.len(), 4);
    assert!(received.iter().all(|r| r.headers.get("x-api-key").is_some()));

    manager.dispose().await;
    Ok(())
}

#[tokio::test]
async fn test_http_server_error_fails_connect() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let manager = ConnectionManager::new(no_reconnect());
    manager.add_connection(ServerConfig::http("remote", server.uri()))?;
    assert!(matches!(
        manager.connect("remote").await,
        Err(McpError::Connection(_))
    ));
    assert_eq!(manager.status("remote"), Some(ConnectionStatus::Error));
    Ok(())
}

#[tokio::test]
async fn test_bad_url_is_configuration_error_without_reconnect() -> anyhow::Result<()> {
    let manager = ConnectionManager::new(ManagerConfig::default());
    let mut events = manager.subscribe();
    manager.add_connection(ServerConfig::http("bad", "ftp://example.com"))?;

    assert!(manager.connect("bad").await.unwrap_err().is_fatal());
    let snapshot = manager.connection("bad").expect("registered");
    assert_eq!(snapshot.reconnect_attempts, 0);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ConnectionEvent::ReconnectScheduled { .. }));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

/// Minimal MCP server over WebSocket. The first connection is dropped right
/// after the handshake; later ones stay up.
async fn ws_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(tcp).await else {
                    return;
                };
                while let Some(Ok(frame)) = ws.next().await {
                    let Message::Text(text) = frame else { continue };
                    let Ok(body) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let method = body["method"].as_str().unwrap_or_default();
                    let Some(id) = body.get("id").cloned() else {
                        if method == "notifications/initialized" && index == 0 {
                            let _ = ws.close(None).await;
                            return;
                        }
                        continue;
                    };
                    let result = match method {
                        "initialize" => json!({
                            "protocolVersion": "2024-11-05",
                            "capabilities": {},
                            "serverInfo": {"name": "ws-mock", "version": "0.1.0"}
                        }),
                        "tools/list" => json!({"tools": []}),
                        _ => json!({}),
                    };
                    let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
                    if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), accepted)
}

#[tokio::test]
async fn test_websocket_unexpected_close_schedules_reconnect() -> anyhow::Result<()> {
    let (url, accepted) = ws_server().await;
    let manager = ConnectionManager::new(
        ManagerConfig::default().with_reconnect_base_delay(Duration::from_millis(200)),
    );
    let mut events = manager.subscribe();
    manager.add_connection(ServerConfig::websocket("ws", url))?;
    manager.connect("ws").await?;

    let seen = wait_for(&mut events, |e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })).await;
    let drops = seen
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::Closed { .. } | ConnectionEvent::Error { .. }))
        .count();
    assert_eq!(drops, 1);
    match seen.last() {
        Some(ConnectionEvent::ReconnectScheduled { attempt, delay, .. }) => {
            assert_eq!(*attempt, 1);
            assert_eq!(*delay, Duration::from_millis(200));
        }
        other => panic!("expected ReconnectScheduled, got {other:?}"),
    }

    wait_for(&mut events, |e| {
        matches!(e, ConnectionEvent::StatusChanged { new: ConnectionStatus::Connected, .. })
    })
    .await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert_eq!(manager.connection("ws").map(|c| c.reconnect_attempts), Some(0));
    assert!(manager.list_tools("ws").await?.is_empty());

    manager.dispose().await;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Many servers
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_multiple_servers_are_independent() -> anyhow::Result<()> {
    let http = http_server().await;
    let manager = ConnectionManager::new(no_reconnect());
    manager.add_connection(mock_stdio("local"))?;
    manager.add_connection(ServerConfig::http("remote", http.uri()))?;
    manager.add_connection(mock_stdio("off").with_enabled(false))?;

    let results = manager.connect_all().await;
    assert_eq!(results.len(), 2);
    for (id, result) in &results {
        assert!(result.is_ok(), "{id}: {result:?}");
    }

    manager.disconnect("local").await?;
    assert_eq!(manager.status("local"), Some(ConnectionStatus::Disconnected));
    assert_eq!(manager.status("remote"), Some(ConnectionStatus::Connected));
    assert_eq!(manager.status("off"), Some(ConnectionStatus::Disconnected));
    assert_eq!(manager.list_tools("remote").await?.len(), 1);

    manager.remove_connection("remote").await;
    assert_eq!(manager.server_ids(), vec!["local", "off"]);

    manager.dispose().await;
    Ok(())
}
