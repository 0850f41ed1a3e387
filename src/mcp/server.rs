//! Server registry records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mcp::capabilities::{CapabilityFlags, CatalogKind};
use crate::mcp::lifecycle::{ConnectionState, ServerInfo};
use crate::mcp::transport::{Transport, TransportConfig, TransportKind};

/// Everything needed to connect one server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Display name, defaults to the server id
    pub name: Option<String>,
    /// Human description
    pub description: Option<String>,
    /// Transport variant and its parameters
    pub transport: TransportConfig,
}

impl ServerConfig {
    /// Creates a config with no display metadata
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            name: None,
            description: None,
            transport,
        }
    }

    /// Sets the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<TransportConfig> for ServerConfig {
    fn from(transport: TransportConfig) -> Self {
        Self::new(transport)
    }
}

/// A registry entry, owned by the connection manager
#[derive(Debug)]
pub(crate) struct Server {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub protocol_version: Option<String>,
    pub server_info: Option<ServerInfo>,
    pub flags: CapabilityFlags,
    pub state: ConnectionState,
    pub transport_kind: TransportKind,
    pub last_activity: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Distinguishes this connection attempt from earlier ones under the same id
    pub session: Uuid,
    pub transport: Option<Arc<dyn Transport>>,
    /// Latest listing issued per catalog; older listings are not stored
    pub listing_epochs: HashMap<CatalogKind, u64>,
}

impl Server {
    pub fn new(
        id: &str,
        name: Option<String>,
        description: Option<String>,
        transport_kind: TransportKind,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.unwrap_or_else(|| id.to_string()),
            description,
            protocol_version: None,
            server_info: None,
            flags: CapabilityFlags::default(),
            state: ConnectionState::Connecting,
            transport_kind,
            last_activity: Utc::now(),
            last_error: None,
            session: Uuid::new_v4(),
            transport: None,
            listing_epochs: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Records a new listing request for `kind` and returns its epoch
    pub fn issue_listing(&mut self, kind: CatalogKind) -> u64 {
        let epoch = self.listing_epochs.entry(kind).or_insert(0);
        *epoch += 1;
        *epoch
    }

    /// Whether `epoch` is the latest listing issued for `kind`
    pub fn is_latest_listing(&self, kind: CatalogKind, epoch: u64) -> bool {
        self.listing_epochs.get(&kind).copied() == Some(epoch)
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            protocol_version: self.protocol_version.clone(),
            server_info: self.server_info.clone(),
            flags: self.flags,
            state: self.state,
            transport: self.transport_kind,
            last_activity: self.last_activity,
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time view of a registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    /// Server id
    pub id: String,
    /// Display name
    pub name: String,
    /// Human description
    pub description: Option<String>,
    /// Negotiated protocol version, once the handshake completed
    pub protocol_version: Option<String>,
    /// Identity the server reported
    pub server_info: Option<ServerInfo>,
    /// Capability flags
    pub flags: CapabilityFlags,
    /// Lifecycle state
    pub state: ConnectionState,
    /// Transport variant
    pub transport: TransportKind,
    /// Time of the last message received from the server
    pub last_activity: DateTime<Utc>,
    /// Cause of the last failure, if any
    pub last_error: Option<String>,
}

impl ServerSnapshot {
    /// Whether operations may be sent to this server
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_latest_listing_is_current() {
        let mut server = Server::new("a", None, None, TransportKind::Memory);
        let first = server.issue_listing(CatalogKind::Tools);
        let second = server.issue_listing(CatalogKind::Tools);
        let prompts = server.issue_listing(CatalogKind::Prompts);

        assert!(!server.is_latest_listing(CatalogKind::Tools, first));
        assert!(server.is_latest_listing(CatalogKind::Tools, second));
        assert!(server.is_latest_listing(CatalogKind::Prompts, prompts));
        assert!(!server.is_latest_listing(CatalogKind::Resources, 1));
        assert_eq!(server.snapshot().name, "a");
    }
}
