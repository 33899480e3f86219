//! JSON-RPC 2.0 framing for the MCP surface
//!
//! Request/response envelopes, the tool descriptor shape, and builders for
//! the two server-initiated notifications clients subscribe to.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::session::Push;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "mailroom";
pub const LOGGER_NAME: &str = "mailroom";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;

/// One incoming client message. A missing `id` marks a notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// One entry in the `tools/list` reply.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// The `initialize` result. `listChanged: true` is what tells clients to
/// listen for our push notifications.
pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": true }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Wrap a tool's string output as a `tools/call` result.
pub fn text_result(text: String) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false
    })
}

/// Serialize a queued push as the JSON-RPC notification it rides out on.
pub fn push_to_notification(push: &Push) -> Value {
    match push {
        Push::ToolListChanged => json!({
            "jsonrpc": "2.0",
            "method": "notifications/tools/list_changed"
        }),
        Push::Alert(text) => json!({
            "jsonrpc": "2.0",
            "method": "notifications/message",
            "params": {
                "level": "alert",
                "logger": LOGGER_NAME,
                "data": text,
            }
        }),
    }
}
