//! YAML configuration for the client and its servers.
//!
//! ```yaml
//! client:
//!   name: my-editor
//!   request_timeout_seconds: 30
//!   roots:
//!     - uri: file:///workspace
//!       name: workspace
//! logger:
//!   level: debug
//! mcp:
//!   servers:
//!     filesystem:
//!       transport: stdio
//!       command: mcp-filesystem
//!       args: ["/workspace"]
//!     search:
//!       transport: sse
//!       url: http://localhost:8080/sse
//!       headers:
//!         Authorization: Bearer token
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::mcp::connection::ClientConfig;
use crate::mcp::lifecycle::{ClientCapabilities, ClientInfo, Root};
use crate::mcp::server::ServerConfig;
use crate::mcp::transport::{StdioConfig, StreamConfig, TransportConfig, TransportKind};
use crate::utils::error::{McpError, McpResult};

/// Config file names tried, in order, when no path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "mcp_hub.config.yaml",
    "config/mcp_hub.config.yaml",
    "../mcp_hub.config.yaml",
];

/// Settings for the MCP client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// MCP-specific settings
    #[serde(default)]
    pub mcp: McpSettings,

    /// Logger settings
    #[serde(default)]
    pub logger: LoggerSettings,

    /// Client-wide settings
    #[serde(default)]
    pub client: ClientSettings,
}

/// Settings for MCP
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpSettings {
    /// MCP server configurations
    #[serde(default)]
    pub servers: HashMap<String, McpServerSettings>,
}

/// Settings for a specific MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerSettings {
    /// Transport type
    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Human description
    #[serde(default)]
    pub description: Option<String>,

    /// Command to start the server (for stdio transport)
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments for the command (for stdio transport)
    #[serde(default)]
    pub args: Option<Vec<String>>,

    /// Environment variables to pass to the server
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// URL for the server (for sse and websocket transports)
    #[serde(default)]
    pub url: Option<String>,

    /// Extra request headers (for sse and websocket transports)
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    /// Connect/read timeout in seconds
    #[serde(default)]
    pub read_timeout_seconds: Option<u64>,

    /// Connection retries after the first failed attempt
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl McpServerSettings {
    /// Settings for a process server
    pub fn stdio(command: &str, args: &[&str]) -> Self {
        Self {
            transport: TransportKind::Stdio,
            name: None,
            description: None,
            command: Some(command.to_string()),
            args: Some(args.iter().map(|a| a.to_string()).collect()),
            env: None,
            url: None,
            headers: None,
            read_timeout_seconds: None,
            max_retries: None,
        }
    }

    fn stream_config(&self, server: &str) -> McpResult<StreamConfig> {
        let url = self.url.as_deref().ok_or_else(|| {
            McpError::Config(format!(
                "Server '{}': URL required for {} transport",
                server, self.transport
            ))
        })?;
        Url::parse(url).map_err(|e| {
            McpError::Config(format!("Server '{}': invalid URL '{}': {}", server, url, e))
        })?;

        let mut config = StreamConfig::new(url);
        if let Some(headers) = &self.headers {
            config.headers = headers.clone();
        }
        if let Some(seconds) = self.read_timeout_seconds {
            config.timeout = Duration::from_secs(seconds);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        Ok(config)
    }

    /// Validates the entry and builds the connection config for server `id`
    pub fn to_server_config(&self, id: &str) -> McpResult<ServerConfig> {
        let transport = match self.transport {
            TransportKind::Stdio => {
                let command = self
                    .command
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        McpError::Config(format!(
                            "Server '{}': command required for stdio transport",
                            id
                        ))
                    })?;
                TransportConfig::Stdio(StdioConfig {
                    command,
                    args: self.args.clone().unwrap_or_default(),
                    env: self.env.clone().unwrap_or_default(),
                })
            }
            TransportKind::Sse => TransportConfig::Sse(self.stream_config(id)?),
            TransportKind::WebSocket => TransportConfig::WebSocket(self.stream_config(id)?),
            TransportKind::Memory => {
                return Err(McpError::Config(format!(
                    "Server '{}': the memory transport cannot be configured from a file",
                    id
                )))
            }
        };
        Ok(ServerConfig {
            name: self.name.clone(),
            description: self.description.clone(),
            transport,
        })
    }
}

/// Client-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Client name sent in `initialize`
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Client version sent in `initialize`
    #[serde(default = "default_client_version")]
    pub version: String,

    /// Deadline for every request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Reject in-flight requests of a server as soon as it goes away
    #[serde(default)]
    pub fail_pending_on_disconnect: bool,

    /// Roots answered to `roots/list`
    #[serde(default)]
    pub roots: Vec<Root>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            request_timeout_seconds: default_request_timeout(),
            fail_pending_on_disconnect: false,
            roots: Vec::new(),
        }
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        ClientConfig {
            client_info: ClientInfo {
                name: settings.name.clone(),
                version: settings.version.clone(),
            },
            capabilities: ClientCapabilities::default(),
            request_timeout: Duration::from_secs(settings.request_timeout_seconds),
            fail_pending_on_disconnect: settings.fail_pending_on_disconnect,
            roots: settings.roots.clone(),
        }
    }
}

/// Logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Colored console output
    #[serde(default = "default_true")]
    pub ansi: bool,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            ansi: true,
        }
    }
}

fn default_transport() -> TransportKind {
    TransportKind::Stdio
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Load settings from a YAML file
pub fn load_settings<P: AsRef<Path>>(path: P) -> McpResult<Settings> {
    let mut file = File::open(path)
        .map_err(|e| McpError::Config(format!("Failed to open config file: {}", e)))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| McpError::Config(format!("Failed to read config file: {}", e)))?;

    parse_settings(&contents)
}

/// Parse settings from YAML text
pub fn parse_settings(contents: &str) -> McpResult<Settings> {
    serde_yaml::from_str(contents)
        .map_err(|e| McpError::Config(format!("Failed to parse config file: {}", e)))
}

/// Get settings, optionally from a specific file
pub fn get_settings(config_path: Option<&str>) -> McpResult<Settings> {
    match config_path {
        Some(path) => load_settings(path),
        None => {
            for path in DEFAULT_CONFIG_PATHS {
                if Path::new(path).exists() {
                    return load_settings(path);
                }
            }

            // Return default settings if no config file is found
            Ok(Settings::default())
        }
    }
}
