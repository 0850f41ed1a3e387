//! Connection lifecycle for MCP servers
//!
//! This module holds the per-server lifecycle state machine and the handshake that
//! moves a server out of `Connecting`:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (Error | Disconnected)
//!                     |
//!                     +-------> Error
//! ```
//!
//! The handshake sends `initialize` with the client identity and declared client
//! capabilities, waits for the correlated response, then sends the
//! `notifications/initialized` notification. Nothing else is sent to a server before
//! that notification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, info, instrument};

use crate::mcp::jsonrpc::Correlator;
use crate::mcp::transport::Transport;
use crate::mcp::types::{methods, LATEST_PROTOCOL_VERSION};
use crate::utils::error::{McpError, McpResult};

/// Lifecycle state of a server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No usable channel
    Disconnected,
    /// Handshake, probing or initial catalog load in progress
    Connecting,
    /// Ready for operations
    Connected,
    /// Connect failed or the transport faulted
    Error,
}

impl ConnectionState {
    /// Whether operations may be sent to a server in this state
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Client identity sent during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Root-listing capability declared by the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    /// Whether the client emits root change notifications
    pub list_changed: bool,
}

/// Capabilities the client declares in `initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Root listing, answered through `roots/list`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    /// Sampling willingness
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            roots: Some(RootsCapability::default()),
            sampling: Some(Value::Object(Map::new())),
        }
    }
}

/// A filesystem root the client exposes through `roots/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Root URI, usually `file://`
    pub uri: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Parameters of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Requested protocol version
    pub protocol_version: String,
    /// Declared client capabilities
    pub capabilities: ClientCapabilities,
    /// Client identity
    pub client_info: ClientInfo,
}

impl InitializeParams {
    /// Params for the current protocol version
    pub fn new(client_info: ClientInfo, capabilities: ClientCapabilities) -> Self {
        Self {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities,
            client_info,
        }
    }
}

/// Server identity reported in the `initialize` result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    #[serde(default)]
    pub name: String,
    /// Server version
    #[serde(default)]
    pub version: String,
}

/// Result of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server agreed to
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Raw server capability declaration
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    /// Server identity
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
    /// Free-form usage instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

fn default_protocol_version() -> String {
    LATEST_PROTOCOL_VERSION.to_string()
}

impl InitializeResult {
    /// Whether the server declared the named capability key
    pub fn declares(&self, capability: &str) -> bool {
        self.capabilities.contains_key(capability)
    }
}

/// Runs the initialize/initialized exchange for one server.
///
/// An error response, or a result that cannot be decoded, fails with
/// `HandshakeFailed`. A timeout surfaces as `RequestTimeout`.
#[instrument(skip(correlator, transport, params), fields(server = %server_id))]
pub async fn handshake(
    correlator: &Correlator,
    server_id: &str,
    transport: &dyn Transport,
    params: &InitializeParams,
) -> McpResult<InitializeResult> {
    let params = serde_json::to_value(params)?;
    debug!("Sending initialize");

    let raw = match correlator
        .call(server_id, transport, methods::INITIALIZE, Some(params))
        .await
    {
        Ok(raw) => raw,
        Err(McpError::RemoteOperationFailed { code, message, .. }) => {
            return Err(McpError::HandshakeFailed(format!(
                "Server '{}' rejected initialize ({}): {}",
                server_id, code, message
            )))
        }
        Err(McpError::RequestTimeout { .. }) => {
            return Err(McpError::HandshakeFailed(format!(
                "Server '{}' did not answer initialize within {:?}",
                server_id,
                correlator.timeout()
            )))
        }
        Err(e) => return Err(e),
    };

    let result: InitializeResult = serde_json::from_value(raw).map_err(|e| {
        McpError::HandshakeFailed(format!(
            "Server '{}' sent an invalid initialize result: {}",
            server_id, e
        ))
    })?;

    correlator
        .notify(transport, methods::INITIALIZED, None)
        .await?;

    info!(
        "Handshake with '{}' complete (protocol {})",
        server_id, result.protocol_version
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::memory::MemoryTransport;
    use crate::mcp::types::{JsonRpcError, JsonRpcMessage, JsonRpcResponse};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_initialize_params_wire_shape() {
        let params = InitializeParams::new(
            ClientInfo {
                name: "hub".to_string(),
                version: "1.0".to_string(),
            },
            ClientCapabilities::default(),
        );
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"roots": {"listChanged": false}, "sampling": {}},
                "clientInfo": {"name": "hub", "version": "1.0"}
            })
        );
    }

    #[test]
    fn test_initialize_result_defaults() {
        let result: InitializeResult =
            serde_json::from_value(json!({"capabilities": {"logging": {}}})).unwrap();
        assert_eq!(result.protocol_version, LATEST_PROTOCOL_VERSION);
        assert!(result.declares("logging"));
        assert!(!result.declares("sampling"));
        assert!(result.server_info.is_none());
    }

    #[tokio::test]
    async fn test_handshake_sends_initialized_after_response() {
        let correlator = Arc::new(Correlator::default());
        let (channel, peer) = MemoryTransport::pair();
        let transport: Arc<dyn Transport> = Arc::from(channel.transport);

        let c = correlator.clone();
        let t = transport.clone();
        let task = tokio::spawn(async move {
            let params = InitializeParams::new(ClientInfo::default(), ClientCapabilities::default());
            handshake(&c, "demo", t.as_ref(), &params).await
        });

        let Some(JsonRpcMessage::Request(request)) = peer.recv().await else {
            panic!("expected initialize request");
        };
        assert_eq!(request.method, methods::INITIALIZE);
        assert!(peer.try_recv().await.is_none());

        correlator
            .resolve("demo", JsonRpcResponse::success(
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "demo", "version": "0.1"}
                }),
                request.id,
            ))
            .await;

        let result = task.await.unwrap().unwrap();
        assert_eq!(result.server_info.unwrap().name, "demo");
        match peer.recv().await {
            Some(JsonRpcMessage::Notification(n)) => assert_eq!(n.method, methods::INITIALIZED),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_error_is_handshake_failed() {
        let correlator = Arc::new(Correlator::default());
        let (channel, peer) = MemoryTransport::pair();
        let transport: Arc<dyn Transport> = Arc::from(channel.transport);

        let c = correlator.clone();
        let t = transport.clone();
        let task = tokio::spawn(async move {
            let params = InitializeParams::new(ClientInfo::default(), ClientCapabilities::default());
            handshake(&c, "demo", t.as_ref(), &params).await
        });

        let Some(JsonRpcMessage::Request(request)) = peer.recv().await else {
            panic!("expected initialize request");
        };
        correlator
            .resolve("demo", JsonRpcResponse::error(
                JsonRpcError::invalid_request("unsupported version"),
                request.id,
            ))
            .await;

        assert!(matches!(
            task.await.unwrap(),
            Err(McpError::HandshakeFailed(_))
        ));
        assert!(peer.try_recv().await.is_none());
    }

    #[tokio::test]
    async fn test_handshake_timeout_is_handshake_failed() {
        tokio::time::pause();
        let correlator = Arc::new(Correlator::new(std::time::Duration::from_secs(30)));
        let (channel, peer) = MemoryTransport::pair();
        let transport: Arc<dyn Transport> = Arc::from(channel.transport);

        let c = correlator.clone();
        let t = transport.clone();
        let task = tokio::spawn(async move {
            let params = InitializeParams::new(ClientInfo::default(), ClientCapabilities::default());
            handshake(&c, "demo", t.as_ref(), &params).await
        });

        assert!(matches!(peer.recv().await, Some(JsonRpcMessage::Request(_))));
        tokio::time::advance(std::time::Duration::from_secs(31)).await;

        assert!(matches!(
            task.await.unwrap(),
            Err(McpError::HandshakeFailed(_))
        ));
        assert_eq!(correlator.pending_count().await, 0);
        assert!(peer.try_recv().await.is_none());
    }
}
