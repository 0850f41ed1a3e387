//! WebSocket transport implementation for MCP
//!
//! Each text frame carries one JSON-RPC envelope in either direction.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::{stream::StreamExt, SinkExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::{EventSink, StreamConfig, Transport, TransportChannel, TransportKind};
use crate::mcp::types::JsonRpcMessage;
use crate::utils::error::{McpError, McpResult};

/// WebSocket-based transport for the MCP protocol
pub struct WebSocketTransport {
    /// Channel feeding the writer task
    tx: mpsc::UnboundedSender<WsMessage>,
    /// Configuration for this transport
    config: StreamConfig,
    sink: EventSink,
    reader: JoinHandle<()>,
}

// Implement Debug manually since the task handles carry no useful state
impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.config.url)
            .field("closed", &self.sink.is_closed())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Performs the socket handshake, retrying up to `max_retries` times
    pub async fn connect(config: StreamConfig) -> McpResult<TransportChannel> {
        let mut attempt = 0;
        let ws_stream = loop {
            let request = build_request(&config)?;
            info!("Connecting to WebSocket at {}", config.url);

            let failure = match time::timeout(config.timeout, connect_async(request)).await {
                Ok(Ok((stream, _))) => break stream,
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("handshake timed out after {:?}", config.timeout),
            };

            attempt += 1;
            if attempt > config.max_retries {
                error!("Failed to connect to WebSocket {}: {}", config.url, failure);
                return Err(McpError::ConnectionFailed(failure));
            }
            let delay = config.retry_delay(attempt);
            warn!(
                "Reconnecting in {:?} (attempt {}/{}): {}",
                delay, attempt, config.max_retries, failure
            );
            time::sleep(delay).await;
        };
        info!("WebSocket connected to {}", config.url);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let (sink, events) = EventSink::channel();

        let writer_sink = sink.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = ws_sender.send(frame).await {
                    writer_sink.error(format!("WebSocket write failed: {}", e));
                    writer_sink.close();
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_sink = sink.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                    Ok(WsMessage::Close(frame)) => {
                        debug!("WebSocket closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        reader_sink.error(format!("WebSocket read failed: {}", e));
                        break;
                    }
                };
                match JsonRpcMessage::parse_str(&text) {
                    Ok(message) => {
                        if !reader_sink.message(message) {
                            return;
                        }
                    }
                    Err(e) => warn!("Discarding malformed WebSocket frame: {}", e),
                }
            }
            reader_sink.close();
        });

        Ok(TransportChannel {
            transport: Box::new(WebSocketTransport {
                tx,
                config,
                sink,
                reader,
            }),
            events,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()> {
        if self.sink.is_closed() {
            return Err(McpError::TransportWrite("WebSocket is closed".to_string()));
        }
        let text = message.to_json()?;
        self.tx
            .send(WsMessage::Text(text))
            .map_err(|_| McpError::TransportWrite("WebSocket writer has stopped".to_string()))
    }

    async fn close(&self) -> McpResult<()> {
        let _ = self.tx.send(WsMessage::Close(None));
        self.reader.abort();
        self.sink.close();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}

fn build_request(config: &StreamConfig) -> McpResult<Request> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| McpError::Config(format!("Invalid WebSocket URL '{}': {}", config.url, e)))?;
    for (name, value) in &config.headers {
        let header = HeaderName::from_str(name)
            .map_err(|e| McpError::Config(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| McpError::Config(format!("Invalid header value for '{}': {}", name, e)))?;
        request.headers_mut().insert(header, value);
    }
    Ok(request)
}
