//! Minimal MCP server speaking newline-delimited JSON-RPC over stdio.
//!
//! Used by the integration tests. It serves one resource, one prompt and the tools
//! `echo`, `fail` and `add_tool`; the latter registers a new tool and announces it
//! with `notifications/tools/updated`.

use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

struct MockServer {
    tools: Vec<Value>,
}

impl MockServer {
    fn new() -> Self {
        Self {
            tools: vec![
                json!({
                    "name": "echo",
                    "description": "Echo the given text",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"text": {"type": "string"}},
                        "required": ["text"]
                    }
                }),
                json!({"name": "fail", "description": "Always fails"}),
                json!({"name": "add_tool", "description": "Registers another tool"}),
            ],
        }
    }

    /// Returns the reply plus any notifications to send after it
    fn handle(&mut self, method: &str, params: &Value) -> (Result<Value, (i64, String)>, Vec<Value>) {
        let mut notifications = Vec::new();
        let result = match method {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {"listChanged": true},
                    "resources": {},
                    "prompts": {},
                    "logging": {},
                    "sampling": {}
                },
                "serverInfo": {"name": "mock-server", "version": env!("CARGO_PKG_VERSION")}
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools })),
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or_default();
                match name {
                    "echo" => {
                        let text = params["arguments"]["text"].as_str().unwrap_or_default();
                        Ok(json!({"content": [{"type": "text", "text": text}]}))
                    }
                    "fail" => Err((-32000, "tool failed on purpose".to_string())),
                    "add_tool" => {
                        let new_name = params["arguments"]["name"].as_str().unwrap_or("extra");
                        self.tools.push(json!({"name": new_name}));
                        notifications.push(json!({
                            "jsonrpc": "2.0",
                            "method": "notifications/tools/updated"
                        }));
                        notifications.push(json!({
                            "jsonrpc": "2.0",
                            "method": "notifications/message",
                            "params": {"level": "info", "logger": "mock", "data": format!("added {}", new_name)}
                        }));
                        Ok(json!({"content": []}))
                    }
                    other => Err((-32602, format!("Unknown tool: {}", other))),
                }
            }
            "resources/list" => Ok(json!({"resources": [
                {"uri": "mock://readme", "name": "README", "mimeType": "text/plain"}
            ]})),
            "resources/read" => match params["uri"].as_str() {
                Some("mock://readme") => Ok(json!({"contents": [
                    {"uri": "mock://readme", "mimeType": "text/plain", "text": "hello from mock"}
                ]})),
                _ => Err((-32002, "Resource not found".to_string())),
            },
            "prompts/list" => Ok(json!({"prompts": [
                {"name": "greeting", "arguments": [{"name": "who", "required": true}]}
            ]})),
            "prompts/get" => {
                let who = params["arguments"]["who"].as_str().unwrap_or("world");
                Ok(json!({"messages": [
                    {"role": "user", "content": {"type": "text", "text": format!("Hello, {}!", who)}}
                ]}))
            }
            "sampling/createMessage" => Ok(json!({
                "role": "assistant",
                "content": {"type": "text", "text": "sampled"},
                "model": "mock"
            })),
            other => Err((-32601, format!("Method not found: {}", other))),
        };
        (result, notifications)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    info!("Mock MCP server started");

    let mut server = MockServer::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed line: {}", e);
                continue;
            }
        };
        let Some(method) = message["method"].as_str() else {
            debug!("Ignoring response from client: {}", message);
            continue;
        };
        let Some(id) = message.get("id").cloned() else {
            debug!("Notification: {}", method);
            continue;
        };

        let (result, notifications) = server.handle(method, &message["params"]);
        let reply = match result {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, text)) => {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": text}})
            }
        };

        for outgoing in std::iter::once(reply).chain(notifications) {
            let mut text = serde_json::to_string(&outgoing)?;
            text.push('\n');
            stdout.write_all(text.as_bytes()).await?;
        }
        stdout.flush().await?;
    }

    info!("Mock MCP server exiting");
    Ok(())
}
