//! Capability discovery for connected servers.
//!
//! Tools, resources and prompts are probed with trial `*/list` calls: any non-error
//! response, including an empty list, marks the capability supported. Sampling,
//! logging and root listing are taken at face value from the `initialize` result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::mcp::jsonrpc::Correlator;
use crate::mcp::lifecycle::InitializeResult;
use crate::mcp::transport::Transport;
use crate::mcp::types::methods;
use crate::utils::error::McpResult;

/// Independent capability flags of one server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFlags {
    /// Tool catalog
    pub tools: bool,
    /// Resource catalog
    pub resources: bool,
    /// Prompt catalog
    pub prompts: bool,
    /// Sampling requests
    pub sampling: bool,
    /// Server log records
    pub logging: bool,
    /// Root listing
    pub roots: bool,
}

/// The probeable catalogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    /// `tools/list`
    Tools,
    /// `resources/list`
    Resources,
    /// `prompts/list`
    Prompts,
}

impl CatalogKind {
    /// All catalog kinds, in load order
    pub const ALL: [CatalogKind; 3] = [CatalogKind::Tools, CatalogKind::Resources, CatalogKind::Prompts];

    /// The listing method for this catalog
    pub fn list_method(self) -> &'static str {
        match self {
            CatalogKind::Tools => methods::TOOLS_LIST,
            CatalogKind::Resources => methods::RESOURCES_LIST,
            CatalogKind::Prompts => methods::PROMPTS_LIST,
        }
    }

    /// The invalidation notification for this catalog
    pub fn from_notification(method: &str) -> Option<Self> {
        match method {
            methods::TOOLS_UPDATED => Some(CatalogKind::Tools),
            methods::RESOURCES_UPDATED => Some(CatalogKind::Resources),
            methods::PROMPTS_UPDATED => Some(CatalogKind::Prompts),
            _ => None,
        }
    }
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CatalogKind::Tools => "tools",
            CatalogKind::Resources => "resources",
            CatalogKind::Prompts => "prompts",
        };
        f.write_str(name)
    }
}

impl CapabilityFlags {
    /// Flags declared in the handshake; catalog flags stay false until probed
    pub fn from_initialize(result: &InitializeResult) -> Self {
        Self {
            sampling: result.declares("sampling"),
            logging: result.declares("logging"),
            roots: result.declares("roots"),
            ..Self::default()
        }
    }

    /// Whether the given catalog is supported
    pub fn supports(&self, kind: CatalogKind) -> bool {
        match kind {
            CatalogKind::Tools => self.tools,
            CatalogKind::Resources => self.resources,
            CatalogKind::Prompts => self.prompts,
        }
    }

    fn set(&mut self, kind: CatalogKind, supported: bool) {
        match kind {
            CatalogKind::Tools => self.tools = supported,
            CatalogKind::Resources => self.resources = supported,
            CatalogKind::Prompts => self.prompts = supported,
        }
    }
}

/// Probes the three catalogs concurrently, starting from the handshake flags.
///
/// Each probe is independent: an error on one only clears that flag. Transport-level
/// failures are treated the same as remote errors, since the server did not answer.
pub async fn probe_capabilities(
    correlator: &Correlator,
    server_id: &str,
    transport: &dyn Transport,
    declared: CapabilityFlags,
) -> CapabilityFlags {
    let (tools, resources, prompts) = futures::join!(
        probe(correlator, server_id, transport, CatalogKind::Tools),
        probe(correlator, server_id, transport, CatalogKind::Resources),
        probe(correlator, server_id, transport, CatalogKind::Prompts),
    );

    let mut flags = declared;
    for (kind, result) in [
        (CatalogKind::Tools, tools),
        (CatalogKind::Resources, resources),
        (CatalogKind::Prompts, prompts),
    ] {
        match result {
            Ok(_) => flags.set(kind, true),
            Err(e) => {
                debug!("Server '{}' does not support {}: {}", server_id, kind, e);
                flags.set(kind, false);
            }
        }
    }
    flags
}

async fn probe(
    correlator: &Correlator,
    server_id: &str,
    transport: &dyn Transport,
    kind: CatalogKind,
) -> McpResult<Value> {
    correlator
        .call(server_id, transport, kind.list_method(), None)
        .await
}
