//! MCP (Model Context Protocol) JSON-RPC handler.
//!
//! Implements the [MCP specification](https://spec.modelcontextprotocol.io/)
//! over stdio. It reads JSON-RPC 2.0 requests from stdin (one per line) and
//! writes responses to stdout.
//!
//! ## Supported methods
//!
//! | Method              | Description                      |
//! |---------------------|----------------------------------|
//! | `initialize`        | Handshake, returns capabilities  |
//! | `tools/list`        | List available tool definitions  |
//! | `tools/call`        | Execute a tool and return result |
//! | `ping`              | Liveness check                   |
//!
//! Notifications (`notifications/initialized`, `notifications/cancelled`) are
//! acknowledged silently.
//!
//! Every request is handled on its own task so a slow device never blocks
//! other calls. Responses go through a channel to a single writer task and
//! may therefore arrive out of order; clients match them by `id`.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::relay::Relay;
use crate::tools;

const SERVER_NAME: &str = "mcp-netcli";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Run the MCP server on stdio, processing JSON-RPC requests until EOF.
///
/// Returns once stdin is closed and every in-flight call has answered.
pub async fn run_stdio(relay: Arc<Relay>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            write_response(&mut stdout, &response).await;
        }
    });

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                error!("stdin read error: {e}");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.send(parse_error(&e));
                continue;
            }
        };

        let relay = Arc::clone(&relay);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = handle_request(&request, &relay).await {
                let _ = tx.send(response);
            }
        });
    }

    debug!("stdin closed, waiting for in-flight calls");
    drop(tx);
    if let Err(e) = writer.await {
        error!("stdout writer task failed: {e}");
    }
}

fn parse_error(e: &serde_json::Error) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": {
            "code": -32700,
            "message": format!("Parse error: {}", e)
        }
    })
}

/// Handle one JSON-RPC message. Returns `None` for notifications.
pub async fn handle_request(request: &Value, relay: &Relay) -> Option<Value> {
    let id = request.get("id").cloned();
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");

    // Notifications (no id) get no response
    let Some(id) = id else {
        match method {
            "notifications/initialized" | "notifications/cancelled" => {}
            _ => warn!("unknown notification: {method}"),
        }
        return None;
    };

    let response = match method {
        "initialize" => handle_initialize(),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "result": { "tools": tools::tool_definitions() }
        }),
        "tools/call" => handle_tools_call(request, relay).await,
        "ping" => json!({ "jsonrpc": "2.0", "result": {} }),
        _ => json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32601,
                "message": format!("Method not found: {}", method)
            }
        }),
    };

    Some(inject_id(response, id))
}

/// Handle `initialize`: return protocol version, capabilities, and server info.
fn handle_initialize() -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            }
        }
    })
}

/// Handle `tools/call`: dispatch to the appropriate tool handler.
async fn handle_tools_call(request: &Value, relay: &Relay) -> Value {
    let params = request.get("params").cloned().unwrap_or(json!({}));
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    let result = tools::handle_tool_call(name, &args, relay).await;

    let mut response_result = json!({
        "content": result.content
    });
    if result.is_error {
        response_result["isError"] = json!(true);
    }

    json!({
        "jsonrpc": "2.0",
        "result": response_result
    })
}

/// Inject the request `id` into a response object.
fn inject_id(mut response: Value, id: Value) -> Value {
    response["id"] = id;
    response
}

/// Write a JSON-RPC response to stdout (one line, flushed immediately).
async fn write_response(stdout: &mut tokio::io::Stdout, response: &Value) {
    let mut output = serde_json::to_string(response).unwrap_or_default();
    output.push('\n');
    if let Err(e) = stdout.write_all(output.as_bytes()).await {
        error!("stdout write error: {e}");
    }
    if let Err(e) = stdout.flush().await {
        error!("stdout flush error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SavePolicy;
    use crate::devices::{DeviceRecord, Inventory};
    use crate::session::mock::MockProvider;

    fn relay() -> Relay {
        let inventory: Inventory = ["r1", "r2"]
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    DeviceRecord {
                        device_type: "cisco_ios".into(),
                        host: format!("{name}.lab"),
                        username: "admin".into(),
                        password: "s3cret".into(),
                        port: 22,
                    },
                )
            })
            .collect();
        Relay::new(
            Arc::new(inventory),
            Arc::new(MockProvider::new()),
            SavePolicy::default(),
        )
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let req = json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} });
        let resp = handle_request(&req, &relay()).await.unwrap();
        assert_eq!(resp["id"], json!(1));
        assert_eq!(resp["result"]["protocolVersion"], json!(PROTOCOL_VERSION));
        assert_eq!(resp["result"]["serverInfo"]["name"], json!("mcp-netcli"));
        assert!(resp["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list() {
        let req = json!({ "jsonrpc": "2.0", "id": "a", "method": "tools/list" });
        let resp = handle_request(&req, &relay()).await.unwrap();
        assert_eq!(resp["id"], json!("a"));
        assert_eq!(resp["result"]["tools"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn tools_call_success() {
        let req = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": { "name": "list_devices", "arguments": {} }
        });
        let resp = handle_request(&req, &relay()).await.unwrap();
        assert_eq!(resp["id"], json!(7));
        assert!(resp["result"].get("isError").is_none());
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["devices"], json!(["r1", "r2"]));
    }

    #[tokio::test]
    async fn tools_call_failure_sets_is_error() {
        let req = json!({
            "jsonrpc": "2.0",
            "id": 8,
            "method": "tools/call",
            "params": {
                "name": "run_command",
                "arguments": { "command": "show version", "device": "r9" }
            }
        });
        let resp = handle_request(&req, &relay()).await.unwrap();
        assert_eq!(resp["result"]["isError"], json!(true));
        assert!(resp.get("error").is_none());
    }

    #[tokio::test]
    async fn ping() {
        let req = json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" });
        let resp = handle_request(&req, &relay()).await.unwrap();
        assert_eq!(resp["result"], json!({}));
    }

    #[tokio::test]
    async fn unknown_method() {
        let req = json!({ "jsonrpc": "2.0", "id": 3, "method": "resources/list" });
        let resp = handle_request(&req, &relay()).await.unwrap();
        assert_eq!(resp["error"]["code"], json!(-32601));
        assert_eq!(resp["id"], json!(3));
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let req = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        assert!(handle_request(&req, &relay()).await.is_none());

        let req = json!({ "jsonrpc": "2.0", "method": "notifications/whatever" });
        assert!(handle_request(&req, &relay()).await.is_none());
    }

    #[test]
    fn parse_error_shape() {
        let err = serde_json::from_str::<Value>("{not json").unwrap_err();
        let resp = parse_error(&err);
        assert_eq!(resp["error"]["code"], json!(-32700));
        assert!(resp["id"].is_null());
    }
}
