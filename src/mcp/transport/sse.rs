//! Server-sent events transport.
//!
//! The client opens a long-lived `GET` event stream. The server first announces the
//! endpoint for client messages in an `endpoint` event; every later `message` event
//! carries one JSON-RPC envelope. Client envelopes are `POST`ed to the announced endpoint.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{EventSink, StreamConfig, Transport, TransportChannel, TransportKind};
use crate::mcp::types::JsonRpcMessage;
use crate::utils::error::{McpError, McpResult};

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type, `message` when the stream did not name one
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
}

/// Incremental `text/event-stream` parser
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Creates an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of the stream and returns every event it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Transport over a server-sent-events stream
pub struct SseTransport {
    client: Client,
    headers: HeaderMap,
    config: StreamConfig,
    endpoint: watch::Receiver<Option<Url>>,
    sink: EventSink,
    reader: JoinHandle<()>,
}

impl fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseTransport")
            .field("url", &self.config.url)
            .field("endpoint", &*self.endpoint.borrow())
            .field("closed", &self.sink.is_closed())
            .finish()
    }
}

impl SseTransport {
    /// Opens the event stream, retrying up to `max_retries` times
    pub async fn connect(config: StreamConfig) -> McpResult<TransportChannel> {
        let base = Url::parse(&config.url)
            .map_err(|e| McpError::Config(format!("Invalid SSE URL '{}': {}", config.url, e)))?;
        let headers = header_map(&config)?;
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| McpError::ConnectionFailed(format!("Failed to create HTTP client: {}", e)))?;

        let response = Self::open_stream(&client, &base, &headers, &config).await?;
        info!("SSE stream connected to {}", base);

        let (sink, events) = EventSink::channel();
        let (endpoint_tx, endpoint_rx) = watch::channel(None);
        let reader = tokio::spawn(Self::read_loop(response, base, endpoint_tx, sink.clone()));

        Ok(TransportChannel {
            transport: Box::new(SseTransport {
                client,
                headers,
                config,
                endpoint: endpoint_rx,
                sink,
                reader,
            }),
            events,
        })
    }

    async fn open_stream(
        client: &Client,
        url: &Url,
        headers: &HeaderMap,
        config: &StreamConfig,
    ) -> McpResult<Response> {
        let mut attempt = 0;
        loop {
            let result = client
                .get(url.clone())
                .headers(headers.clone())
                .header(ACCEPT, "text/event-stream")
                .send()
                .await;

            let failure = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => format!("HTTP error: {}", response.status()),
                Err(e) => e.to_string(),
            };

            attempt += 1;
            if attempt > config.max_retries {
                error!("Failed to open SSE stream at {}: {}", url, failure);
                return Err(McpError::ConnectionFailed(failure));
            }
            let delay = config.retry_delay(attempt);
            warn!(
                "SSE connect failed ({}), retrying in {:?} (attempt {}/{})",
                failure, delay, attempt, config.max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn read_loop(
        response: Response,
        base: Url,
        endpoint: watch::Sender<Option<Url>>,
        sink: EventSink,
    ) {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    sink.error(format!("SSE stream failed: {}", e));
                    break;
                }
            };
            for event in parser.feed(&chunk) {
                match event.event.as_str() {
                    "endpoint" => match base.join(event.data.trim()) {
                        Ok(url) => {
                            debug!("SSE message endpoint: {}", url);
                            let _ = endpoint.send(Some(url));
                        }
                        Err(e) => warn!("Ignoring invalid SSE endpoint '{}': {}", event.data, e),
                    },
                    "message" => match JsonRpcMessage::parse_str(&event.data) {
                        Ok(message) => {
                            if !sink.message(message) {
                                return;
                            }
                        }
                        Err(e) => warn!("Discarding malformed SSE message: {}", e),
                    },
                    other => debug!("Ignoring SSE event type '{}'", other),
                }
            }
        }
        sink.close();
    }

    async fn endpoint(&self) -> McpResult<Url> {
        let mut endpoint = self.endpoint.clone();
        let waited = tokio::time::timeout(self.config.timeout, endpoint.wait_for(Option::is_some))
            .await
            .map_err(|_| McpError::TransportWrite("SSE endpoint was never announced".to_string()))?
            .map_err(|_| McpError::TransportWrite("SSE stream closed".to_string()))?;
        waited
            .clone()
            .ok_or_else(|| McpError::TransportWrite("SSE endpoint missing".to_string()))
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()> {
        if self.sink.is_closed() {
            return Err(McpError::TransportWrite("SSE channel is closed".to_string()));
        }
        let url = self.endpoint().await?;
        let body = message.to_json()?;

        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.config.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| McpError::TransportWrite(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(McpError::TransportWrite(format!(
                "HTTP error: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.reader.abort();
        self.sink.close();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}

fn header_map(config: &StreamConfig) -> McpResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_str(name)
            .map_err(|e| McpError::Config(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| McpError::Config(format!("Invalid header value for '{}': {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
