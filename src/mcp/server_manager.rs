use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::config::{get_settings, load_settings, McpServerSettings, Settings};
use crate::mcp::connection::{ClientConfig, ConnectionManager};
use crate::mcp::lifecycle::ConnectionState;
use crate::mcp::server::ServerSnapshot;
use crate::utils::error::{McpError, McpResult};

/// Starts and stops configured MCP servers through a [`ConnectionManager`]
#[derive(Debug, Clone)]
pub struct ServerManager {
    /// Server configurations
    server_settings: Arc<Mutex<HashMap<String, McpServerSettings>>>,

    /// Live connections
    connections: ConnectionManager,
}

impl Default for ServerManager {
    fn default() -> Self {
        Self::new(ConnectionManager::default())
    }
}

impl ServerManager {
    /// Create a server manager on top of `connections`
    pub fn new(connections: ConnectionManager) -> Self {
        Self {
            server_settings: Arc::new(Mutex::new(HashMap::new())),
            connections,
        }
    }

    /// Create a ServerManager from settings, with a connection manager configured
    /// from the settings' `client` section
    pub async fn from_settings(settings: Settings) -> McpResult<Self> {
        let manager = Self::new(ConnectionManager::new(ClientConfig::from(&settings.client)));
        manager.register_all(settings.mcp.servers).await?;
        Ok(manager)
    }

    /// Create a ServerManager from a config file, or the default locations when `None`
    pub async fn from_config(config_path: Option<&str>) -> McpResult<Self> {
        Self::from_settings(get_settings(config_path)?).await
    }

    /// The underlying connection manager
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Load server settings from a YAML file, adding to those already registered
    pub async fn load_from_file<P: AsRef<Path>>(&self, path: P) -> McpResult<()> {
        let settings = load_settings(path)?;
        self.register_all(settings.mcp.servers).await
    }

    async fn register_all(&self, servers: HashMap<String, McpServerSettings>) -> McpResult<()> {
        if servers.is_empty() {
            debug!("No server configurations found in config file");
            return Ok(());
        }

        for (name, settings) in servers {
            debug!("Loading server configuration for '{}'", name);
            self.register_server(&name, settings).await?;
        }
        info!(
            "Loaded {} server configurations",
            self.server_settings.lock().await.len()
        );
        Ok(())
    }

    /// Register a new server setting
    pub async fn register_server(&self, name: &str, settings: McpServerSettings) -> McpResult<()> {
        settings.to_server_config(name)?;
        let mut server_settings = self.server_settings.lock().await;

        if server_settings.contains_key(name) {
            return Err(McpError::Config(format!(
                "Server '{}' already registered",
                name
            )));
        }

        server_settings.insert(name.to_string(), settings);
        Ok(())
    }

    /// Connect a configured server
    pub async fn start_server(&self, server_name: &str) -> McpResult<ServerSnapshot> {
        if let Some(snapshot) = self.connections.server(server_name) {
            if snapshot.state == ConnectionState::Connected {
                return Ok(snapshot);
            }
        }

        let config = {
            let server_settings = self.server_settings.lock().await;
            server_settings
                .get(server_name)
                .ok_or_else(|| McpError::NotFound(format!("Server '{}' not found", server_name)))?
                .to_server_config(server_name)?
        };

        info!("Starting server: {}", server_name);
        let snapshot = self.connections.connect(server_name, config).await?;
        info!("Server started successfully: {}", server_name);
        Ok(snapshot)
    }

    /// Connect every configured server, returning the failures by server name
    pub async fn start_all(&self) -> HashMap<String, McpError> {
        let names = self.get_server_names().await;
        let results =
            futures::future::join_all(names.iter().map(|name| self.start_server(name))).await;

        names
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| match result {
                Ok(_) => None,
                Err(e) => {
                    warn!("Failed to start server {}: {}", name, e);
                    Some((name, e))
                }
            })
            .collect()
    }

    /// Disconnect a running server
    pub async fn stop_server(&self, server_name: &str) -> McpResult<()> {
        info!("Stopping server: {}", server_name);
        self.connections.disconnect(server_name).await?;
        info!("Server stopped: {}", server_name);
        Ok(())
    }

    /// Disconnect all servers and clear shared state
    pub async fn stop_all_servers(&self) {
        info!("Stopping all servers");
        self.connections.shutdown().await;
        info!("All servers stopped");
    }

    /// Check if a server is connected
    pub fn is_server_connected(&self, server_name: &str) -> bool {
        self.connections
            .server(server_name)
            .map_or(false, |s| s.is_connected())
    }

    /// Get a sorted list of registered server names
    pub async fn get_server_names(&self) -> Vec<String> {
        let server_settings = self.server_settings.lock().await;
        let mut names: Vec<String> = server_settings.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of connected servers
    pub fn connected_server_count(&self) -> usize {
        self.connections
            .servers()
            .iter()
            .filter(|s| s.is_connected())
            .count()
    }
}
