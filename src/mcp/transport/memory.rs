//! In-process transport.
//!
//! [`MemoryTransport::pair`] returns a transport for the client side and a
//! [`MemoryPeer`] that plays the server: it observes every envelope the client sends
//! and can inject messages, faults and closure.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{EventSink, Transport, TransportChannel, TransportKind};
use crate::mcp::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, RequestId};
use crate::utils::error::{McpError, McpResult};

/// Client half of an in-process channel pair
pub struct MemoryTransport {
    outgoing: mpsc::UnboundedSender<JsonRpcMessage>,
    sink: EventSink,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("closed", &self.sink.is_closed())
            .finish()
    }
}

impl MemoryTransport {
    /// Creates a connected transport/peer pair
    pub fn pair() -> (TransportChannel, MemoryPeer) {
        let (sink, events) = EventSink::channel();
        let (outgoing, sent) = mpsc::unbounded_channel();
        let transport = MemoryTransport {
            outgoing,
            sink: sink.clone(),
        };
        (
            TransportChannel {
                transport: Box::new(transport),
                events,
            },
            MemoryPeer {
                sent: Mutex::new(sent),
                sink,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()> {
        if self.sink.is_closed() {
            return Err(McpError::TransportWrite("memory channel is closed".to_string()));
        }
        self.outgoing
            .send(message.clone())
            .map_err(|_| McpError::TransportWrite("memory peer dropped".to_string()))
    }

    async fn close(&self) -> McpResult<()> {
        self.sink.close();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }
}

/// Server side of an in-process channel pair
#[derive(Debug)]
pub struct MemoryPeer {
    sent: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    sink: EventSink,
}

impl MemoryPeer {
    /// Waits for the next envelope the client sent; `None` once the client side is gone
    pub async fn recv(&self) -> Option<JsonRpcMessage> {
        self.sent.lock().await.recv().await
    }

    /// Returns the next sent envelope if one is already queued
    pub async fn try_recv(&self) -> Option<JsonRpcMessage> {
        self.sent.lock().await.try_recv().ok()
    }

    /// Delivers an envelope to the client
    pub fn push(&self, message: impl Into<JsonRpcMessage>) -> bool {
        self.sink.message(message.into())
    }

    /// Answers a request with a result
    pub fn respond(&self, id: RequestId, result: serde_json::Value) -> bool {
        self.push(JsonRpcResponse::success(result, id))
    }

    /// Sends a notification to the client
    pub fn notify(&self, method: &str, params: Option<serde_json::Value>) -> bool {
        self.push(JsonRpcNotification::new(method, params))
    }

    /// Reports a channel fault to the client
    pub fn fail(&self, error: impl Into<String>) {
        self.sink.error(error);
        self.sink.close();
    }

    /// Closes the channel from the server side
    pub fn close(&self) {
        self.sink.close();
    }

    /// Whether the channel has closed
    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}
