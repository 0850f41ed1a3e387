//! Core MCP client implementation: envelopes, transports, correlation, lifecycle and
//! the operations exposed to the editor layer.
//!
//! # Model Context Protocol (MCP)
//!
//! MCP servers expose tools, resources and prompts over a JSON-RPC 2.0 envelope. This
//! module connects to any number of servers at once and presents their catalogs as one.
//!
//! ## Architecture
//!
//! The implementation is organized leaf-first:
//!
//! - `types`: JSON-RPC envelopes and the method vocabulary
//! - `transport`: stdio, SSE and WebSocket channels plus an in-memory pair
//! - `jsonrpc`: the pending-request table that correlates responses with callers
//! - `lifecycle`: connection states and the initialize/initialized handshake
//! - `capabilities`: capability flags and catalog probing
//! - `tools`, `resources`, `prompts`: descriptor types owned by a server
//! - `catalog`: the shared descriptor maps
//! - `connection`: the connection manager and per-server event loops
//! - `server_manager`: configuration-driven start/stop of servers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mcp_hub::mcp::server_manager::ServerManager;
//! use serde_json::json;
//!
//! async fn example() -> mcp_hub::McpResult<()> {
//!     let servers = ServerManager::from_config(Some("mcp_hub.config.yaml")).await?;
//!     servers.start_all().await;
//!
//!     let connections = servers.connections();
//!     let result = connections
//!         .call_tool("echo", json!({"text": "hello"}))
//!         .await?;
//!     println!("{}", result);
//!
//!     servers.stop_all_servers().await;
//!     Ok(())
//! }
//! ```

/// JSON-RPC envelope types and MCP method names
pub mod types;

/// Transport layer implementations for stdio, SSE and WebSocket
pub mod transport;

/// Request/response correlation for the MCP protocol
pub mod jsonrpc;

/// Connection lifecycle states and the handshake
pub mod lifecycle;

/// Capability flags and probing
pub mod capabilities;

/// Tool descriptors
pub mod tools;

/// Resource descriptors
pub mod resources;

/// Prompt descriptors
pub mod prompts;

/// Shared descriptor catalogs
pub mod catalog;

/// Server registry records and connection configuration
pub mod server;

/// Connection manager owning every server connection
pub mod connection;

/// Configuration-driven server start/stop
pub mod server_manager;

mod notifications;
mod operations;
