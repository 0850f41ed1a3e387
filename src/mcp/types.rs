//! # MCP Protocol Types
//!
//! This module defines the JSON-RPC envelope that every transport carries and the
//! fixed method vocabulary the client speaks.
//!
//! ## Envelope Classification
//!
//! A received envelope is exactly one of:
//!
//! - `JsonRpcRequest`: a method with an id, expecting a response
//! - `JsonRpcNotification`: a method without an id, fire-and-forget
//! - `JsonRpcResponse`: an id with either a `result` or an `error`
//!
//! `JsonRpcMessage` wraps the three and performs the classification when decoding,
//! so transports only ever hand fully classified envelopes to the connection loop.
//!
//! ## Example
//!
//! ```rust
//! use mcp_hub::mcp::types::{JsonRpcMessage, RequestId};
//!
//! let raw = br#"{"jsonrpc":"2.0","id":"7","result":{"tools":[]}}"#;
//! let message = JsonRpcMessage::from_slice(raw).unwrap();
//! match message {
//!     JsonRpcMessage::Response(response) => assert_eq!(response.id, RequestId::from("7")),
//!     _ => unreachable!(),
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::utils::error::{McpError, McpResult};

/// JSON-RPC version used by the MCP protocol
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version sent in the `initialize` request
pub const LATEST_PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names used by the client core
pub mod methods {
    /// Handshake request
    pub const INITIALIZE: &str = "initialize";
    /// Handshake completion notification
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Liveness probe, may be sent by either side
    pub const PING: &str = "ping";
    /// Tool catalog listing
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation
    pub const TOOLS_CALL: &str = "tools/call";
    /// Resource catalog listing
    pub const RESOURCES_LIST: &str = "resources/list";
    /// Resource retrieval
    pub const RESOURCES_READ: &str = "resources/read";
    /// Prompt catalog listing
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Prompt retrieval
    pub const PROMPTS_GET: &str = "prompts/get";
    /// Sampling request
    pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
    /// Server request for the client's roots
    pub const ROOTS_LIST: &str = "roots/list";
    /// Server log record
    pub const NOTIFICATION_MESSAGE: &str = "notifications/message";
    /// Tool catalog invalidation
    pub const TOOLS_UPDATED: &str = "notifications/tools/updated";
    /// Resource catalog invalidation
    pub const RESOURCES_UPDATED: &str = "notifications/resources/updated";
    /// Prompt catalog invalidation
    pub const PROMPTS_UPDATED: &str = "notifications/prompts/updated";
}

/// A JSON-RPC correlation id.
///
/// Servers may echo ids back as strings or numbers; [`RequestId::key`] normalizes
/// both to the same lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id
    Number(i64),
    /// String id
    String(String),
}

impl RequestId {
    /// Normalized key used by the pending-request table
    pub fn key(&self) -> String {
        match self {
            RequestId::Number(n) => n.to_string(),
            RequestId::String(s) => s.clone(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::String(value)
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

/// JSON-RPC 2.0 request object for MCP protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version, always "2.0"
    pub jsonrpc: String,
    /// Method name to invoke
    pub method: String,
    /// Parameters for the method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Unique identifier for the request
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request
    pub fn new(method: &str, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 response object for MCP protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version, always "2.0"
    pub jsonrpc: String,
    /// Result of the method call, present if no error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error information, present if no result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Request identifier that this response corresponds to
    pub id: RequestId,
}

impl JsonRpcResponse {
    /// Create a new successful JSON-RPC response
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create a new error JSON-RPC response
    pub fn error(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Converts the response into the caller-facing outcome.
    ///
    /// An `error` member becomes [`McpError::RemoteOperationFailed`]; otherwise the
    /// `result` payload is returned verbatim.
    pub fn into_result(self) -> McpResult<Value> {
        match self.error {
            Some(error) => Err(McpError::RemoteOperationFailed {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC 2.0 notification object for MCP protocol (has no ID)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version, always "2.0"
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Parameters for the method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object for MCP protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i32, message: &str, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    /// Invalid request error (-32600)
    pub fn invalid_request(message: &str) -> Self {
        Self::new(-32600, message, None)
    }

    /// Method not found error (-32601)
    pub fn method_not_found(message: &str) -> Self {
        Self::new(-32601, message, None)
    }

    /// Invalid params error (-32602)
    pub fn invalid_params(message: &str) -> Self {
        Self::new(-32602, message, None)
    }

    /// Internal error (-32603)
    pub fn internal_error(message: &str) -> Self {
        Self::new(-32603, message, None)
    }
}

/// A classified JSON-RPC envelope
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    /// Method with an id
    Request(JsonRpcRequest),
    /// Id with a result or error
    Response(JsonRpcResponse),
    /// Method without an id
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Classifies a decoded JSON value.
    ///
    /// Envelopes carrying both `result` and `error`, or a method together with a
    /// result, or nothing classifiable at all are rejected.
    pub fn from_value(value: Value) -> McpResult<Self> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(McpError::InvalidMessage(format!(
                    "Expected a JSON object, got {}",
                    other
                )))
            }
        };

        let jsonrpc = match object.remove("jsonrpc") {
            Some(Value::String(version)) => version,
            Some(other) => {
                return Err(McpError::InvalidMessage(format!(
                    "Invalid jsonrpc member: {}",
                    other
                )))
            }
            None => JSONRPC_VERSION.to_string(),
        };

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(RequestId::from_value(&raw).ok_or_else(|| {
                McpError::InvalidMessage(format!("Invalid id member: {}", raw))
            })?),
        };
        let method = match object.remove("method") {
            None => None,
            Some(Value::String(method)) => Some(method),
            Some(other) => {
                return Err(McpError::InvalidMessage(format!(
                    "Invalid method member: {}",
                    other
                )))
            }
        };
        let params = object.remove("params");
        let has_result = object.contains_key("result");
        let has_error = object.contains_key("error");

        match (method, id) {
            (Some(_), _) if has_result || has_error => Err(McpError::InvalidMessage(
                "Envelope carries both a method and a result/error".to_string(),
            )),
            (Some(method), Some(id)) => Ok(JsonRpcMessage::Request(JsonRpcRequest {
                jsonrpc,
                method,
                params,
                id,
            })),
            (Some(method), None) => Ok(JsonRpcMessage::Notification(JsonRpcNotification {
                jsonrpc,
                method,
                params,
            })),
            (None, Some(id)) => {
                if has_result == has_error {
                    return Err(McpError::InvalidMessage(format!(
                        "Response {} must carry exactly one of result or error",
                        id
                    )));
                }
                let error = match object.remove("error") {
                    Some(raw) => Some(serde_json::from_value::<JsonRpcError>(raw).map_err(
                        |e| McpError::InvalidMessage(format!("Invalid error member: {}", e)),
                    )?),
                    None => None,
                };
                Ok(JsonRpcMessage::Response(JsonRpcResponse {
                    jsonrpc,
                    result: object.remove("result"),
                    error,
                    id,
                }))
            }
            (None, None) => Err(McpError::InvalidMessage(
                "Envelope has neither a method nor an id".to_string(),
            )),
        }
    }

    /// Decodes and classifies raw JSON bytes
    pub fn from_slice(bytes: &[u8]) -> McpResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| McpError::Deserialization(format!("Failed to parse envelope: {}", e)))?;
        Self::from_value(value)
    }

    /// Decodes and classifies a JSON string
    pub fn parse_str(text: &str) -> McpResult<Self> {
        Self::from_slice(text.as_bytes())
    }

    /// Serializes the envelope to a JSON string
    pub fn to_json(&self) -> McpResult<String> {
        serde_json::to_string(self)
            .map_err(|e| McpError::Serialization(format!("Failed to serialize envelope: {}", e)))
    }

    /// The correlation id, if the envelope has one
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(request) => Some(&request.id),
            JsonRpcMessage::Response(response) => Some(&response.id),
            JsonRpcMessage::Notification(_) => None,
        }
    }

    /// The method, if the envelope has one
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(request) => Some(&request.method),
            JsonRpcMessage::Notification(notification) => Some(&notification.method),
            JsonRpcMessage::Response(_) => None,
        }
    }
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcMessage::Request(request) => request.serialize(serializer),
            JsonRpcMessage::Response(response) => response.serialize(serializer),
            JsonRpcMessage::Notification(notification) => notification.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        JsonRpcMessage::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(request)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(response)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(notification)
    }
}

/// Builds a params object from key/value pairs, skipping `None` values
pub(crate) fn params_object(entries: Vec<(&str, Option<Value>)>) -> Value {
    let mut map = Map::new();
    for (key, value) in entries {
        if let Some(value) = value {
            map.insert(key.to_string(), value);
        }
    }
    Value::Object(map)
}
