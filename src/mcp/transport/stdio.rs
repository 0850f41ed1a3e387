//! Process transport: newline-delimited JSON over a child's stdin/stdout.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{EventSink, StdioConfig, Transport, TransportChannel, TransportKind};
use crate::mcp::types::JsonRpcMessage;
use crate::utils::error::{McpError, McpResult};

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// A transport over a pair of async byte streams, usually a child process's pipes
pub struct StdioTransport {
    writer: Mutex<Option<BoxedWriter>>,
    child: Mutex<Option<Child>>,
    sink: EventSink,
    reader: JoinHandle<()>,
}

impl fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioTransport")
            .field("closed", &self.sink.is_closed())
            .finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Spawns the configured process and wires its standard streams
    pub fn spawn(config: &StdioConfig) -> McpResult<TransportChannel> {
        debug!(command = %config.command, args = ?config.args, "Starting stdio server");

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            McpError::ConnectionFailed(format!("Failed to start '{}': {}", config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::ConnectionFailed("Failed to open stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::ConnectionFailed("Failed to open stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let command = config.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %command, "stderr: {}", line);
                }
            });
        }

        let channel = Self::with_streams(stdout, stdin);
        Ok(channel.attach_child(child))
    }

    /// Creates a transport from an arbitrary read/write stream pair
    pub fn with_streams<R, W>(read: R, write: W) -> StdioChannel
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, events) = EventSink::channel();
        let reader = tokio::spawn(Self::read_loop(read, sink.clone()));

        StdioChannel {
            transport: StdioTransport {
                writer: Mutex::new(Some(Box::new(write))),
                child: Mutex::new(None),
                sink,
                reader,
            },
            events,
        }
    }

    async fn read_loop<R>(read: R, sink: EventSink)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut lines = BufReader::new(read).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match JsonRpcMessage::parse_str(trimmed) {
                        Ok(message) => {
                            if !sink.message(message) {
                                break;
                            }
                        }
                        Err(e) => warn!("Discarding malformed line from server: {}", e),
                    }
                }
                Ok(None) => {
                    debug!("Server stdout reached EOF");
                    break;
                }
                Err(e) => {
                    sink.error(format!("Failed to read from server: {}", e));
                    break;
                }
            }
        }
        sink.close();
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()> {
        if self.sink.is_closed() {
            return Err(McpError::TransportWrite("stdio channel is closed".to_string()));
        }
        let mut line = message.to_json()?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| McpError::TransportWrite("stdio channel is closed".to_string()))?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportWrite(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::TransportWrite(e.to_string()))
    }

    async fn close(&self) -> McpResult<()> {
        self.writer.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                debug!("Server process already gone: {}", e);
            }
            let _ = child.wait().await;
        }
        self.reader.abort();
        self.sink.close();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }
}

/// A stdio transport before it is boxed, so a child process can still be attached
#[derive(Debug)]
pub struct StdioChannel {
    transport: StdioTransport,
    events: tokio::sync::mpsc::UnboundedReceiver<super::TransportEvent>,
}

impl StdioChannel {
    fn attach_child(self, child: Child) -> TransportChannel {
        let StdioChannel {
            transport,
            events,
        } = self;
        let transport = StdioTransport {
            child: Mutex::new(Some(child)),
            ..transport
        };
        TransportChannel {
            transport: Box::new(transport),
            events,
        }
    }
}

impl From<StdioChannel> for TransportChannel {
    fn from(channel: StdioChannel) -> Self {
        TransportChannel {
            transport: Box::new(channel.transport),
            events: channel.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::TransportEvent;
    use crate::mcp::types::{JsonRpcNotification, JsonRpcResponse, RequestId};
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_reads_lines_and_skips_garbage() {
        let (client_read, mut server_write) = duplex(4096);
        let (_server_read, client_write) = duplex(4096);
        let TransportChannel { transport, mut events } =
            StdioTransport::with_streams(client_read, client_write).into();

        server_write
            .write_all(b"not json\n\n{\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":{}}\n")
            .await
            .unwrap();
        drop(server_write);

        let expected = JsonRpcResponse::success(json!({}), RequestId::from("1"));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message(expected.into()))
        );
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
        assert!(transport.send(&JsonRpcNotification::new("x", None).into()).await.is_err());
    }

    #[tokio::test]
    async fn test_send_writes_one_line_per_message() {
        let (client_read, _server_write) = duplex(4096);
        let (mut server_read, client_write) = duplex(4096);
        let TransportChannel { transport, .. } =
            StdioTransport::with_streams(client_read, client_write).into();

        transport
            .send(&JsonRpcNotification::new("notifications/initialized", None).into())
            .await
            .unwrap();
        transport.close().await.unwrap();

        let mut written = String::new();
        server_read.read_to_string(&mut written).await.unwrap();
        assert_eq!(
            written,
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n"
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_command_fails() {
        let config = StdioConfig {
            command: "definitely-not-a-real-binary-mcp".to_string(),
            ..Default::default()
        };
        let err = StdioTransport::spawn(&config).unwrap_err();
        assert!(matches!(err, McpError::ConnectionFailed(_)));
    }
}
