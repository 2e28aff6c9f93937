//! JSON-RPC 2.0 message shapes used on the command channel.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{BridgeError, BridgeResult};

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Outgoing message. Without an `id` it is a fire-and-forget notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcMessage {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcMessage {
    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// `error` member of a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response frame, as delivered over the event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id: json!(id),
            result: Some(result),
            error: None,
        }
    }

    /// Numeric request id, if this frame answers one of ours.
    ///
    /// Servers occasionally echo ids back as strings, so both forms match.
    pub fn request_id(&self) -> Option<u64> {
        match &self.id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Turn a protocol-level error into a `Protocol` bridge error.
    pub fn into_result(self) -> BridgeResult<RpcResponse> {
        match &self.error {
            Some(err) => Err(BridgeError::protocol(err.code, &err.message)),
            None => Ok(self),
        }
    }
}

/// Parse a stream payload as a response frame.
///
/// Returns `None` for anything that is not a JSON object with a usable id.
pub fn parse_response(data: &str) -> Option<RpcResponse> {
    let response: RpcResponse = serde_json::from_str(data).ok()?;
    response.request_id()?;
    Some(response)
}

/// Params for the versioned initialize request.
pub fn initialize_params(protocol_version: &str, client_name: &str) -> Value {
    json!({
        "protocolVersion": protocol_version,
        "capabilities": {},
        "clientInfo": {
            "name": client_name,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Params for a named tool invocation.
pub fn tool_call_params(name: &str, arguments: Value) -> Value {
    json!({
        "name": name,
        "arguments": arguments,
    })
}

/// Pull the useful payload out of a successful response.
///
/// With a `content` list, the first `text` entry is parsed as JSON, falling
/// back to `{"data": <text>}`. Without one, the raw `result` (or the whole
/// response) is returned.
pub fn extract_payload(response: &RpcResponse) -> Value {
    let Some(result) = &response.result else {
        return serde_json::to_value(response).unwrap_or(Value::Null);
    };

    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find_map(|item| {
                if item.get("type").and_then(Value::as_str) == Some("text") {
                    item.get("text").and_then(Value::as_str)
                } else {
                    None
                }
            })
        });

    match text {
        Some(text) => serde_json::from_str(text).unwrap_or_else(|_| json!({ "data": text })),
        None => result.clone(),
    }
}
