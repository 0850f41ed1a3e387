#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_html_tags)]
#![deny(rustdoc::bare_urls)]
#![deny(clippy::missing_panics_doc)]

//! MCP-Hub is a multi-transport Model Context Protocol client. It connects an
//! editor-side process to any number of capability servers, negotiates their
//! capabilities and exposes their tools, resources, prompts and sampling through one
//! asynchronous API.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use mcp_hub::mcp::connection::ConnectionManager;
//! use mcp_hub::mcp::server::ServerConfig;
//! use mcp_hub::mcp::transport::{StdioConfig, TransportConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::default();
//!
//!     // Connect to a server
//!     let config = ServerConfig::new(TransportConfig::Stdio(StdioConfig {
//!         command: "my-mcp-server".to_string(),
//!         ..Default::default()
//!     }));
//!     manager.connect("demo", config).await?;
//!
//!     // Tools of every connected server, tagged with their owner
//!     for tool in manager.get_available_tools() {
//!         println!("{} from {}", tool.name, tool.server_id);
//!     }
//!
//!     let result = manager.call_tool("echo", json!({ "text": "hi" })).await?;
//!     println!("Tool result: {}", result);
//!
//!     // Disconnect from server
//!     manager.disconnect("demo").await?;
//!
//!     Ok(())
//! }
//! ```

/// Core MCP client implementation: envelopes, transports, correlation and lifecycle.
pub mod mcp;

/// Utility modules for error handling.
pub mod utils;

/// Configuration management
pub mod config;

/// Structured logging and metrics
pub mod telemetry;

/// Re-exported MCP types for convenience
pub use mcp::{
    capabilities::{CapabilityFlags, CatalogKind},
    connection::{ClientConfig, ClientEvent, ConnectionManager},
    lifecycle::ConnectionState,
    prompts::Prompt,
    resources::Resource,
    server::{ServerConfig, ServerSnapshot},
    server_manager::ServerManager,
    tools::Tool,
    transport::TransportConfig,
};

// Re-export error types
pub use utils::error::{McpError, McpResult};

/// Re-export telemetry types and functions for easier access
pub use telemetry::{add_metric, init_telemetry, span_duration, TelemetryConfig};
