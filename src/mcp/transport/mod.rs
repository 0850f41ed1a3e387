//! Transport layer for the MCP protocol.
//!
//! A transport is a bidirectional channel for one server connection. Sending is a
//! method on the [`Transport`] trait; everything received travels the other way as
//! [`TransportEvent`]s on a channel that the connection loop for that server consumes,
//! which keeps per-server delivery order without shared callbacks.
//!
//! Three variants are configurable through the sealed [`TransportConfig`] enum:
//! a spawned process speaking over its standard streams, a server-sent-events stream,
//! and a WebSocket. [`memory`] provides an in-process channel pair for embedding and tests.

pub mod memory;
#[cfg(feature = "transport-sse")]
pub mod sse;
pub mod stdio;
#[cfg(feature = "transport-ws")]
pub mod websocket;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::mcp::types::JsonRpcMessage;
use crate::utils::error::McpResult;
#[cfg(any(not(feature = "transport-sse"), not(feature = "transport-ws")))]
use crate::utils::error::McpError;

/// Something a transport observed on its channel
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A fully decoded envelope
    Message(JsonRpcMessage),
    /// An unrecoverable channel fault
    Error(String),
    /// The channel terminated; delivered exactly once and always last
    Closed,
}

/// Transport abstraction for MCP protocol
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug + 'static {
    /// Write one envelope to the channel.
    ///
    /// Fails with `McpError::TransportWrite` if the channel is closed or the write fails.
    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()>;

    /// Close the channel. Idempotent.
    async fn close(&self) -> McpResult<()>;

    /// The variant of this transport
    fn kind(&self) -> TransportKind;
}

/// An opened transport together with its event stream
#[derive(Debug)]
pub struct TransportChannel {
    /// Sending half
    pub transport: Box<dyn Transport>,
    /// Receiving half
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Transport variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawned process over stdin/stdout
    Stdio,
    /// Server-sent events with HTTP POST for client messages
    Sse,
    /// WebSocket duplex channel
    #[serde(rename = "websocket")]
    WebSocket,
    /// In-process channel pair
    Memory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::WebSocket => "websocket",
            TransportKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Parameters for a process transport
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StdioConfig {
    /// Executable to spawn
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

/// Parameters for the network transports
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Endpoint URL
    pub url: String,
    /// Extra request headers, passed through opaquely
    pub headers: HashMap<String, String>,
    /// Connect and write timeout
    pub timeout: Duration,
    /// Additional connection attempts after the first failure
    pub max_retries: u32,
}

impl StreamConfig {
    /// Creates a config with default timeout and retry count
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    /// Delay before reconnection attempt `attempt` (1-based)
    pub(crate) fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(200 * u64::from(attempt))
    }
}

/// Connection configuration, selecting exactly one transport variant
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// Spawn a process and talk over its standard streams
    Stdio(StdioConfig),
    /// Long-lived event stream
    Sse(StreamConfig),
    /// WebSocket
    WebSocket(StreamConfig),
}

impl TransportConfig {
    /// The transport variant this config selects
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio(_) => TransportKind::Stdio,
            TransportConfig::Sse(_) => TransportKind::Sse,
            TransportConfig::WebSocket(_) => TransportKind::WebSocket,
        }
    }

    /// Establishes the underlying channel
    pub async fn open(&self) -> McpResult<TransportChannel> {
        match self {
            TransportConfig::Stdio(config) => stdio::StdioTransport::spawn(config),
            #[cfg(feature = "transport-sse")]
            TransportConfig::Sse(config) => sse::SseTransport::connect(config.clone()).await,
            #[cfg(not(feature = "transport-sse"))]
            TransportConfig::Sse(_) => Err(McpError::Config(
                "SSE transport support is not enabled (feature `transport-sse`)".to_string(),
            )),
            #[cfg(feature = "transport-ws")]
            TransportConfig::WebSocket(config) => {
                websocket::WebSocketTransport::connect(config.clone()).await
            }
            #[cfg(not(feature = "transport-ws"))]
            TransportConfig::WebSocket(_) => Err(McpError::Config(
                "WebSocket transport support is not enabled (feature `transport-ws`)".to_string(),
            )),
        }
    }
}

/// Producer side of a transport's event channel.
///
/// Guarantees the transport contract: `Closed` is delivered once, and nothing is
/// delivered after it. Clones share the same state.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
}

impl EventSink {
    /// Creates a sink and the receiver the connection loop will consume
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Delivers a decoded envelope; returns false once the sink is closed
    pub fn message(&self, message: JsonRpcMessage) -> bool {
        self.emit(TransportEvent::Message(message))
    }

    /// Reports a channel fault
    pub fn error(&self, error: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(error.into()))
    }

    /// Delivers `Closed` if it has not been delivered yet
    pub fn close(&self) {
        let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.take() {
            let _ = tx.send(TransportEvent::Closed);
        }
    }

    /// Whether `Closed` has been delivered
    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    fn emit(&self, event: TransportEvent) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::JsonRpcNotification;

    #[tokio::test]
    async fn test_sink_closes_once_and_drops_later_messages() {
        let (sink, mut rx) = EventSink::channel();
        let note: JsonRpcMessage = JsonRpcNotification::new("ping", None).into();

        assert!(sink.message(note.clone()));
        sink.close();
        sink.close();
        assert!(!sink.message(note.clone()));
        assert!(!sink.error("late"));
        assert!(sink.is_closed());

        assert_eq!(rx.recv().await, Some(TransportEvent::Message(note)));
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_config_kind() {
        let stdio = TransportConfig::Stdio(StdioConfig {
            command: "server".to_string(),
            ..Default::default()
        });
        assert_eq!(stdio.kind(), TransportKind::Stdio);
        let ws = TransportConfig::WebSocket(StreamConfig::new("ws://localhost:9000"));
        assert_eq!(ws.kind().to_string(), "websocket");
    }
}
