//! Connection manager for MCP servers
//!
//! The [`ConnectionManager`] owns the server registry, the pending-request table and
//! the shared catalogs. It drives each server through its lifecycle:
//!
//! 1. Open the transport and register the server as `connecting`
//! 2. Run the handshake
//! 3. Probe the tool, resource and prompt catalogs
//! 4. Load every supported catalog
//! 5. Mark the server `connected`
//!
//! Every server gets its own event loop task consuming the transport's event channel.
//! Responses are routed to the correlator, notifications to the notification
//! dispatcher, and server-initiated requests are answered in place.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcp_hub::mcp::connection::ConnectionManager;
//! use mcp_hub::mcp::server::ServerConfig;
//! use mcp_hub::mcp::transport::{StdioConfig, TransportConfig};
//!
//! async fn example() -> mcp_hub::McpResult<()> {
//!     let manager = ConnectionManager::default();
//!     let config = ServerConfig::new(TransportConfig::Stdio(StdioConfig {
//!         command: "my-mcp-server".to_string(),
//!         ..Default::default()
//!     }));
//!
//!     let server = manager.connect("demo", config).await?;
//!     println!("{} supports tools: {}", server.name, server.flags.tools);
//!
//!     for tool in manager.get_available_tools() {
//!         println!("{} ({})", tool.name, tool.server_id);
//!     }
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use futures::future::try_join_all;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::mcp::capabilities::{self, CapabilityFlags, CatalogKind};
use crate::mcp::catalog::Catalog;
use crate::mcp::jsonrpc::{Correlator, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp::lifecycle::{
    self, ClientCapabilities, ClientInfo, ConnectionState, InitializeParams, Root,
};
use crate::mcp::notifications;
use crate::mcp::prompts::parse_prompt_list;
use crate::mcp::resources::parse_resource_list;
use crate::mcp::server::{Server, ServerConfig, ServerSnapshot};
use crate::mcp::tools::parse_tool_list;
use crate::mcp::transport::{Transport, TransportChannel, TransportEvent, TransportKind};
use crate::mcp::types::{methods, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use crate::telemetry;
use crate::utils::error::{McpError, McpResult};

const EVENT_CAPACITY: usize = 64;

/// Client-wide settings shared by every server connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity sent in `initialize`
    pub client_info: ClientInfo,
    /// Capabilities declared in `initialize`
    pub capabilities: ClientCapabilities,
    /// Deadline for every correlated call
    pub request_timeout: Duration,
    /// Reject a server's in-flight requests as soon as it disconnects, closes or faults,
    /// instead of letting them run into their timeout
    pub fail_pending_on_disconnect: bool,
    /// Roots answered to `roots/list`
    pub roots: Vec<Root>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            capabilities: ClientCapabilities::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            fail_pending_on_disconnect: false,
            roots: Vec::new(),
        }
    }
}

/// Something observable happened to a server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A server moved to a new lifecycle state
    StateChanged {
        /// Server id
        server_id: String,
        /// New state
        state: ConnectionState,
    },
    /// A catalog of a server was (re)loaded
    CatalogUpdated {
        /// Server id
        server_id: String,
        /// Which catalog
        kind: CatalogKind,
        /// Number of descriptors now owned by the server in that catalog
        count: usize,
    },
    /// A server sent a log record
    ServerLog {
        /// Server id
        server_id: String,
        /// Log level as sent by the server
        level: String,
        /// Logger name, if any
        logger: Option<String>,
        /// Log payload
        data: Value,
    },
}

struct Inner {
    config: ClientConfig,
    servers: RwLock<HashMap<String, Server>>,
    correlator: Correlator,
    catalog: Catalog,
    events: broadcast::Sender<ClientEvent>,
}

/// Owns every server connection of one client
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("servers", &self.servers_read().len())
            .field("correlator", &self.inner.correlator)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl ConnectionManager {
    /// Create a new connection manager
    #[instrument]
    pub fn new(config: ClientConfig) -> Self {
        debug!("Creating new connection manager");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                correlator: Correlator::new(config.request_timeout),
                config,
                servers: RwLock::new(HashMap::new()),
                catalog: Catalog::new(),
                events,
            }),
        }
    }

    /// Client settings
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Subscribes to state, catalog and log events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn correlator(&self) -> &Correlator {
        &self.inner.correlator
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    fn servers_read(&self) -> RwLockReadGuard<'_, HashMap<String, Server>> {
        self.inner.servers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn servers_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Server>> {
        self.inner.servers.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn emit_state(&self, server_id: &str, state: ConnectionState) {
        self.emit(ClientEvent::StateChanged {
            server_id: server_id.to_string(),
            state,
        });
    }

    /// Applies `f` to the entry if it still belongs to connection attempt `session`
    fn update<F>(&self, server_id: &str, session: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut Server),
    {
        let mut servers = self.servers_write();
        match servers.get_mut(server_id) {
            Some(server) if server.session == session => {
                f(server);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every registered server, sorted by id
    pub fn servers(&self) -> Vec<ServerSnapshot> {
        let mut snapshots: Vec<ServerSnapshot> =
            self.servers_read().values().map(Server::snapshot).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Snapshot of one server
    pub fn server(&self, server_id: &str) -> Option<ServerSnapshot> {
        self.servers_read().get(server_id).map(Server::snapshot)
    }

    /// Transport and flags of a server, provided it is `connected`
    pub(crate) fn connected_server(
        &self,
        server_id: &str,
    ) -> McpResult<(Arc<dyn Transport>, CapabilityFlags)> {
        let servers = self.servers_read();
        let server = servers
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotConnected(server_id.to_string()))?;
        match (&server.transport, server.state) {
            (Some(transport), ConnectionState::Connected) => Ok((transport.clone(), server.flags)),
            _ => Err(McpError::ServerNotConnected(format!(
                "Server '{}' is {}",
                server_id, server.state
            ))),
        }
    }

    /// Whether attempt `session` of `server_id` is current and `connected`
    pub(crate) fn is_current_and_connected(&self, server_id: &str, session: Uuid) -> bool {
        self.servers_read()
            .get(server_id)
            .map(|s| s.session == session && s.state.is_connected())
            .unwrap_or(false)
    }

    /// Connects a server using its configured transport.
    ///
    /// Resolves once the server is `connected`. On failure the registry entry stays in
    /// `error` state with the cause recorded.
    #[instrument(skip(self, config), fields(server = %server_id, transport = %config.transport.kind()))]
    pub async fn connect(&self, server_id: &str, config: ServerConfig) -> McpResult<ServerSnapshot> {
        let _guard = telemetry::span_duration("connect");
        let session = self.reserve(
            server_id,
            config.name.clone(),
            config.description.clone(),
            config.transport.kind(),
        )?;

        let channel = match config.transport.open().await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open transport for '{}': {}", server_id, e);
                self.fail_connect(server_id, session, &e).await;
                return Err(e);
            }
        };
        self.establish(server_id, session, channel).await
    }

    /// Connects a server over an already opened transport, such as an in-memory pair
    #[instrument(skip(self, channel), fields(server = %server_id))]
    pub async fn connect_with_transport(
        &self,
        server_id: &str,
        channel: TransportChannel,
    ) -> McpResult<ServerSnapshot> {
        let _guard = telemetry::span_duration("connect");
        let session = self.reserve(server_id, None, None, channel.transport.kind())?;
        self.establish(server_id, session, channel).await
    }

    fn reserve(
        &self,
        server_id: &str,
        name: Option<String>,
        description: Option<String>,
        kind: TransportKind,
    ) -> McpResult<Uuid> {
        let session = {
            let mut servers = self.servers_write();
            if let Some(existing) = servers.get(server_id) {
                if matches!(
                    existing.state,
                    ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    return Err(McpError::AlreadyConnected(format!(
                        "Server '{}' is {}",
                        server_id, existing.state
                    )));
                }
            }
            let server = Server::new(server_id, name, description, kind);
            let session = server.session;
            servers.insert(server_id.to_string(), server);
            session
        };
        info!("Connecting to server '{}' over {}", server_id, kind);
        self.emit_state(server_id, ConnectionState::Connecting);
        Ok(session)
    }

    async fn establish(
        &self,
        server_id: &str,
        session: Uuid,
        channel: TransportChannel,
    ) -> McpResult<ServerSnapshot> {
        let TransportChannel { transport, events } = channel;
        let transport: Arc<dyn Transport> = Arc::from(transport);

        let attached = {
            let transport = transport.clone();
            self.update(server_id, session, move |server| {
                server.transport = Some(transport)
            })
        };
        if !attached {
            let _ = transport.close().await;
            return Err(McpError::ConnectionClosed(format!(
                "Server '{}' was disconnected while connecting",
                server_id
            )));
        }

        tokio::spawn(run_event_loop(
            Arc::downgrade(&self.inner),
            server_id.to_string(),
            session,
            events,
        ));

        match self.initialize(server_id, session, transport.as_ref()).await {
            Ok(snapshot) => {
                telemetry::add_metric(
                    "active_connections",
                    self.servers().iter().filter(|s| s.is_connected()).count() as f64,
                    &[],
                );
                Ok(snapshot)
            }
            Err(e) => {
                error!("Connecting '{}' failed: {}", server_id, e);
                telemetry::add_metric(
                    "connection_failures",
                    1.0,
                    &[("server", server_id.to_string())],
                );
                self.fail_connect(server_id, session, &e).await;
                if let Err(close_err) = transport.close().await {
                    debug!("Closing failed transport of '{}': {}", server_id, close_err);
                }
                Err(e)
            }
        }
    }

    async fn initialize(
        &self,
        server_id: &str,
        session: Uuid,
        transport: &dyn Transport,
    ) -> McpResult<ServerSnapshot> {
        let config = &self.inner.config;
        let params = InitializeParams::new(config.client_info.clone(), config.capabilities.clone());
        let result =
            lifecycle::handshake(&self.inner.correlator, server_id, transport, &params).await?;

        let declared = CapabilityFlags::from_initialize(&result);
        let flags = capabilities::probe_capabilities(
            &self.inner.correlator,
            server_id,
            transport,
            declared,
        )
        .await;
        debug!("Capabilities of '{}': {:?}", server_id, flags);

        let recorded = self.update(server_id, session, |server| {
            server.protocol_version = Some(result.protocol_version.clone());
            server.server_info = result.server_info.clone();
            server.flags = flags;
        });
        if !recorded {
            return Err(self.superseded(server_id));
        }

        let loads = CatalogKind::ALL
            .into_iter()
            .filter(|kind| flags.supports(*kind))
            .map(|kind| self.load_catalog(server_id, session, transport, kind, false));
        try_join_all(loads).await?;

        let mut snapshot = None;
        let connected = self.update(server_id, session, |server| {
            server.state = ConnectionState::Connected;
            server.last_error = None;
            snapshot = Some(server.snapshot());
        });
        match snapshot {
            Some(snapshot) if connected => {
                info!(
                    "Server '{}' connected (protocol {})",
                    server_id, result.protocol_version
                );
                self.emit_state(server_id, ConnectionState::Connected);
                Ok(snapshot)
            }
            _ => Err(self.superseded(server_id)),
        }
    }

    fn superseded(&self, server_id: &str) -> McpError {
        McpError::ConnectionClosed(format!(
            "Server '{}' was disconnected while connecting",
            server_id
        ))
    }

    /// Moves a `connecting` attempt to `error` and rejects its in-flight requests, so
    /// the pending handshake, probe or load returns at once. Returns false when the
    /// attempt was no longer connecting.
    async fn fail_connect(&self, server_id: &str, session: Uuid, cause: &McpError) -> bool {
        let mut marked = false;
        self.update(server_id, session, |server| {
            if server.state == ConnectionState::Connecting {
                server.state = ConnectionState::Error;
                server.last_error = Some(cause.to_string());
                marked = true;
            }
        });
        if marked {
            self.inner.catalog.remove_server(server_id);
            self.inner
                .correlator
                .fail_server(server_id, &cause.to_string())
                .await;
            self.emit_state(server_id, ConnectionState::Error);
        }
        marked
    }

    /// Lists one catalog of a server and replaces its entries.
    ///
    /// With `require_connected`, the entries are only stored while the server is still
    /// `connected`; otherwise while the attempt is current at all. A listing overtaken by
    /// a newer one of the same kind is dropped.
    pub(crate) async fn load_catalog(
        &self,
        server_id: &str,
        session: Uuid,
        transport: &dyn Transport,
        kind: CatalogKind,
        require_connected: bool,
    ) -> McpResult<usize> {
        let mut epoch = 0;
        if !self.update(server_id, session, |server| epoch = server.issue_listing(kind)) {
            debug!("Skipping {} listing of replaced server '{}'", kind, server_id);
            return Ok(0);
        }
        let listing = self
            .inner
            .correlator
            .call(server_id, transport, kind.list_method(), None)
            .await?;

        let count = {
            // Holding the registry lock keeps a concurrent disconnect from running
            // between the check and the catalog write.
            let servers = self.servers_read();
            let current = servers.get(server_id).map_or(false, |server| {
                server.session == session
                    && server.is_latest_listing(kind, epoch)
                    && (server.state.is_connected()
                        || (!require_connected && server.state == ConnectionState::Connecting))
            });
            if !current {
                debug!("Dropping stale {} listing of '{}'", kind, server_id);
                return Ok(0);
            }
            let catalog = &self.inner.catalog;
            match kind {
                CatalogKind::Tools => catalog.replace_tools(server_id, parse_tool_list(server_id, listing)?),
                CatalogKind::Resources => {
                    catalog.replace_resources(server_id, parse_resource_list(server_id, listing)?)
                }
                CatalogKind::Prompts => {
                    catalog.replace_prompts(server_id, parse_prompt_list(server_id, listing)?)
                }
            }
        };

        debug!("Loaded {} {} from '{}'", count, kind, server_id);
        self.emit(ClientEvent::CatalogUpdated {
            server_id: server_id.to_string(),
            kind,
            count,
        });
        Ok(count)
    }

    /// Reloads one catalog of a connected server
    #[instrument(skip(self), fields(server = %server_id, kind = %kind))]
    pub async fn refresh_catalog(&self, server_id: &str, kind: CatalogKind) -> McpResult<usize> {
        let session = self
            .servers_read()
            .get(server_id)
            .map(|server| server.session)
            .ok_or_else(|| McpError::ServerNotConnected(server_id.to_string()))?;
        let (transport, flags) = self.connected_server(server_id)?;
        if !flags.supports(kind) {
            return Err(McpError::CapabilityUnsupported {
                server: server_id.to_string(),
                capability: kind.to_string(),
            });
        }
        self.load_catalog(server_id, session, transport.as_ref(), kind, true)
            .await
    }

    /// Closes a server's transport, removes its descriptors and drops it from the registry
    #[instrument(skip(self), fields(server = %server_id))]
    pub async fn disconnect(&self, server_id: &str) -> McpResult<()> {
        let _guard = telemetry::span_duration("disconnect");
        let server = self
            .servers_write()
            .remove(server_id)
            .ok_or_else(|| McpError::NotFound(format!("Unknown server '{}'", server_id)))?;

        self.inner.catalog.remove_server(server_id);
        if self.inner.config.fail_pending_on_disconnect {
            let failed = self
                .inner
                .correlator
                .fail_server(server_id, "server disconnected")
                .await;
            debug!("Rejected {} pending requests of '{}'", failed, server_id);
        }
        if let Some(transport) = server.transport {
            if let Err(e) = transport.close().await {
                warn!("Error closing transport of '{}': {}", server_id, e);
            }
        }

        info!("Disconnected from server '{}'", server_id);
        self.emit_state(server_id, ConnectionState::Disconnected);
        Ok(())
    }

    /// Disconnects every server and clears all shared state
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.servers_read().keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.disconnect(&id).await {
                debug!("Server '{}' already gone during shutdown: {}", id, e);
            }
        }
        self.inner.correlator.clear().await;
        self.inner.catalog.clear();
        self.servers_write().clear();
        info!("Connection manager shut down");
    }

    async fn handle_message(&self, server_id: &str, session: Uuid, message: JsonRpcMessage) {
        self.update(server_id, session, Server::touch);
        match message {
            JsonRpcMessage::Response(response) => {
                self.inner.correlator.resolve(server_id, response).await;
            }
            JsonRpcMessage::Notification(notification) => {
                notifications::dispatch(self, server_id, session, notification);
            }
            JsonRpcMessage::Request(request) => {
                self.answer_server_request(server_id, session, request).await;
            }
        }
    }

    async fn answer_server_request(&self, server_id: &str, session: Uuid, request: JsonRpcRequest) {
        let transport = self
            .servers_read()
            .get(server_id)
            .filter(|server| server.session == session)
            .and_then(|server| server.transport.clone());
        let Some(transport) = transport else {
            return;
        };

        let response = match request.method.as_str() {
            methods::PING => JsonRpcResponse::success(json!({}), request.id),
            methods::ROOTS_LIST => JsonRpcResponse::success(
                json!({ "roots": self.inner.config.roots }),
                request.id,
            ),
            other => {
                debug!("Rejecting unsupported request '{}' from '{}'", other, server_id);
                JsonRpcResponse::error(
                    JsonRpcError::method_not_found(&format!("Method not found: {}", other)),
                    request.id,
                )
            }
        };
        if let Err(e) = transport.send(&response.into()).await {
            warn!("Failed to answer request from '{}': {}", server_id, e);
        }
    }

    async fn handle_transport_error(&self, server_id: &str, session: Uuid, error: String) {
        error!("Transport of '{}' failed: {}", server_id, error);
        let cause = McpError::ConnectionFailed(error.clone());
        if self.fail_connect(server_id, session, &cause).await {
            return;
        }
        let marked = self.update(server_id, session, |server| {
            server.state = ConnectionState::Error;
            server.last_error = Some(error.clone());
        });
        if marked {
            self.release_server(server_id, &error).await;
            self.emit_state(server_id, ConnectionState::Error);
        }
    }

    async fn handle_transport_closed(&self, server_id: &str, session: Uuid) {
        let cause = McpError::ConnectionClosed(format!(
            "Server '{}' closed its channel while connecting",
            server_id
        ));
        if self.fail_connect(server_id, session, &cause).await {
            warn!("{}", cause);
        }

        let mut changed = false;
        let current = self.update(server_id, session, |server| {
            server.transport = None;
            if server.state != ConnectionState::Error {
                server.state = ConnectionState::Disconnected;
                changed = true;
            }
        });
        if !current {
            return;
        }
        if changed {
            info!("Server '{}' closed its channel", server_id);
            self.release_server(server_id, "transport closed").await;
            self.emit_state(server_id, ConnectionState::Disconnected);
        }
    }

    async fn release_server(&self, server_id: &str, reason: &str) {
        self.inner.catalog.remove_server(server_id);
        if self.inner.config.fail_pending_on_disconnect {
            self.inner.correlator.fail_server(server_id, reason).await;
        }
    }
}

async fn run_event_loop(
    inner: Weak<Inner>,
    server_id: String,
    session: Uuid,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let manager = ConnectionManager { inner };
        match event {
            TransportEvent::Message(message) => {
                manager.handle_message(&server_id, session, message).await
            }
            TransportEvent::Error(error) => {
                manager
                    .handle_transport_error(&server_id, session, error)
                    .await
            }
            TransportEvent::Closed => {
                manager.handle_transport_closed(&server_id, session).await;
                break;
            }
        }
    }
    debug!("Event loop of '{}' finished", server_id);
}
