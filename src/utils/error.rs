use thiserror::Error;

/// A specialized Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Represents errors that can occur during MCP protocol operations.
///
/// The first group of variants is what callers of the operation façade see:
/// transport write failures, handshake failures, timeouts, state and capability
/// preconditions, unknown identities and remote errors. The rest cover
/// configuration, I/O and encoding problems around them.
#[derive(Debug, Error)]
pub enum McpError {
    /// The transport channel is closed or the underlying write failed
    #[error("Transport write failed: {0}")]
    TransportWrite(String),

    /// The `initialize` request was rejected or failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// No correlated response arrived before the deadline
    #[error("Request {id} ({method}) timed out")]
    RequestTimeout {
        /// Correlation id of the request
        id: String,
        /// Method of the request
        method: String,
    },

    /// Operation attempted against a server outside the `connected` state
    #[error("Server '{0}' is not connected")]
    ServerNotConnected(String),

    /// Operation requires a capability the server does not have
    #[error("Server '{server}' does not support {capability}")]
    CapabilityUnsupported {
        /// Server id
        server: String,
        /// Capability name
        capability: String,
    },

    /// Unknown tool, resource, prompt or server identity
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server answered an otherwise valid call with a JSON-RPC error
    #[error("Remote operation failed ({code}): {message}")]
    RemoteOperationFailed {
        /// JSON-RPC error code
        code: i32,
        /// JSON-RPC error message
        message: String,
        /// Optional error payload
        data: Option<serde_json::Value>,
    },

    /// The connection closed while the request was in flight
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Connection establishment failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A server with this id is already connecting or connected
    #[error("Server '{0}' is already connected")]
    AlreadyConnected(String),

    /// Invalid message format or content
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failure
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error during read/write operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Stable, machine-readable code for the error kind.
    ///
    /// The editor layer can render every failure uniformly from this code and
    /// the `Display` text without matching on variants.
    pub fn code(&self) -> &'static str {
        match self {
            McpError::TransportWrite(_) => "transport_write_error",
            McpError::HandshakeFailed(_) => "handshake_failed",
            McpError::RequestTimeout { .. } => "request_timeout",
            McpError::ServerNotConnected(_) => "server_not_connected",
            McpError::CapabilityUnsupported { .. } => "capability_unsupported",
            McpError::NotFound(_) => "not_found",
            McpError::RemoteOperationFailed { .. } => "remote_operation_failed",
            McpError::ConnectionClosed(_) => "connection_closed",
            McpError::ConnectionFailed(_) => "connection_failed",
            McpError::AlreadyConnected(_) => "already_connected",
            McpError::InvalidMessage(_) => "invalid_message",
            McpError::Serialization(_) => "serialization_error",
            McpError::Deserialization(_) => "deserialization_error",
            McpError::Config(_) => "config_error",
            McpError::Io(_) => "io_error",
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Deserialization(err.to_string())
    }
}
