//! MCP tool definitions and handlers.
//!
//! Each tool is defined as a JSON schema (returned by [`tool_definitions`])
//! and handled by an async function dispatched from [`handle_tool_call`].
//!
//! - `list_devices`: names of the devices in the inventory
//! - `run_command`: one exec-mode command (show, ping, traceroute, ...)
//! - `run_config`: an ordered list of config-mode lines, optionally saved
//!
//! Anything more specific (interfaces, routing tables, setting an IP) is left
//! to the agent, composed from these primitives.

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::RelayError;
use crate::relay::Relay;

/// Returns all tool definitions.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "list_devices",
            "description": "Return the names of the network devices available to this server.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        }),
        json!({
            "name": "run_command",
            "description": "Run any show/exec command on a device and return its raw CLI output. The command is sent verbatim in exec mode over a fresh SSH session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Exec-mode command, e.g. 'show ip interface brief'."
                    },
                    "device": {
                        "type": "string",
                        "description": "Device name as returned by list_devices."
                    }
                },
                "required": ["command", "device"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "run_config",
            "description": "Apply configuration commands on a device. The lines are entered in config mode in the exact order given. Set save=true to also persist the running configuration (e.g. 'write memory').",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "commands": {
                        "type": "array",
                        "description": "Config-mode lines, applied in order. Do not include 'configure terminal' or 'end'.",
                        "items": { "type": "string" }
                    },
                    "device": {
                        "type": "string",
                        "description": "Device name as returned by list_devices."
                    },
                    "save": {
                        "type": "boolean",
                        "description": "Persist the running configuration afterwards. Default false."
                    }
                },
                "required": ["commands", "device"],
                "additionalProperties": false
            }
        }),
    ]
}

/// Handle a tool call and return MCP content.
pub async fn handle_tool_call(name: &str, args: &Value, relay: &Relay) -> ToolResult {
    match name {
        "list_devices" => ToolResult::success(&relay.list_devices()),
        "run_command" => handle_run_command(args, relay).await,
        "run_config" => handle_run_config(args, relay).await,
        _ => ToolResult::error(format!("Unknown tool: {}", name)),
    }
}

/// Result of an MCP tool call, ready to be serialized into a JSON-RPC response.
#[derive(Debug)]
pub struct ToolResult {
    /// MCP content blocks (a single `{"type":"text","text":"..."}` entry).
    pub content: Vec<Value>,
    /// Whether the tool call failed (maps to `isError` in the MCP response).
    pub is_error: bool,
}

impl ToolResult {
    fn success(value: &impl Serialize) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_default();
        Self {
            content: vec![json!({ "type": "text", "text": text })],
            is_error: false,
        }
    }

    fn error(message: String) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": message })],
            is_error: true,
        }
    }

    fn relay_error(err: &RelayError) -> Self {
        match err.partial_output() {
            Some(partial) => Self::error(format!("{err}\n\nPartial output:\n{partial}")),
            None => Self::error(err.to_string()),
        }
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolResult> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolResult::error(format!("Missing required parameter: {key}")))
}

async fn handle_run_command(args: &Value, relay: &Relay) -> ToolResult {
    let command = match required_str(args, "command") {
        Ok(c) => c,
        Err(e) => return e,
    };
    let device = match required_str(args, "device") {
        Ok(d) => d,
        Err(e) => return e,
    };

    match relay.run_command(command, device).await {
        Ok(result) => ToolResult::success(&result),
        Err(e) => ToolResult::relay_error(&e),
    }
}

async fn handle_run_config(args: &Value, relay: &Relay) -> ToolResult {
    let commands: Vec<String> = match args.get("commands").and_then(Value::as_array) {
        Some(items) => match items
            .iter()
            .map(|v| v.as_str().map(String::from))
            .collect::<Option<Vec<_>>>()
        {
            Some(c) => c,
            None => {
                return ToolResult::error("Parameter 'commands' must be an array of strings".into())
            }
        },
        None => return ToolResult::error("Missing required parameter: commands (array)".into()),
    };
    let device = match required_str(args, "device") {
        Ok(d) => d,
        Err(e) => return e,
    };
    let save = match args.get("save") {
        None | Some(Value::Null) => false,
        Some(value) => match value.as_bool() {
            Some(b) => b,
            None => return ToolResult::error("Parameter 'save' must be a boolean".into()),
        },
    };

    match relay.run_config(&commands, device, save).await {
        Ok(result) => ToolResult::success(&result),
        Err(e) => ToolResult::relay_error(&e),
    }
}
