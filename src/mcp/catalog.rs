//! Shared descriptor catalogs.
//!
//! One [`Catalog`] per connection manager holds the tool, resource and prompt maps for
//! every connected server. Identities are global primary keys: a tool name, resource
//! URI or prompt name maps to exactly one descriptor, and loading a colliding
//! descriptor moves ownership to the newer server.
//!
//! All three maps sit behind a single lock, so a refresh replaces a server's entries
//! in one step and readers never observe a half-applied refresh.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::mcp::prompts::Prompt;
use crate::mcp::resources::Resource;
use crate::mcp::tools::Tool;

/// A descriptor keyed by a global identity and owned by one server
pub trait Descriptor: Clone {
    /// Global identity (tool name, resource URI, prompt name)
    fn identity(&self) -> &str;
    /// Owning server id
    fn server_id(&self) -> &str;
}

impl Descriptor for Tool {
    fn identity(&self) -> &str {
        &self.name
    }
    fn server_id(&self) -> &str {
        &self.server_id
    }
}

impl Descriptor for Resource {
    fn identity(&self) -> &str {
        &self.uri
    }
    fn server_id(&self) -> &str {
        &self.server_id
    }
}

impl Descriptor for Prompt {
    fn identity(&self) -> &str {
        &self.name
    }
    fn server_id(&self) -> &str {
        &self.server_id
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    tools: HashMap<String, Tool>,
    resources: HashMap<String, Resource>,
    prompts: HashMap<String, Prompt>,
}

/// Tool, resource and prompt maps shared by all servers of one manager
#[derive(Debug, Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

fn replace_entries<D: Descriptor>(
    map: &mut HashMap<String, D>,
    server_id: &str,
    entries: Vec<D>,
) -> usize {
    map.retain(|_, d| d.server_id() != server_id);
    let count = entries.len();
    for entry in entries {
        if let Some(previous) = map.insert(entry.identity().to_string(), entry) {
            if previous.server_id() != server_id {
                warn!(
                    "'{}' from server '{}' replaces the entry owned by '{}'",
                    previous.identity(),
                    server_id,
                    previous.server_id()
                );
            }
        }
    }
    count
}

fn sorted<D: Descriptor>(map: &HashMap<String, D>) -> Vec<D> {
    let mut entries: Vec<D> = map.values().cloned().collect();
    entries.sort_by(|a, b| a.identity().cmp(b.identity()));
    entries
}

impl Catalog {
    /// Creates an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces every tool owned by `server_id` with `tools`
    pub fn replace_tools(&self, server_id: &str, tools: Vec<Tool>) -> usize {
        replace_entries(&mut self.write().tools, server_id, tools)
    }

    /// Replaces every resource owned by `server_id` with `resources`
    pub fn replace_resources(&self, server_id: &str, resources: Vec<Resource>) -> usize {
        replace_entries(&mut self.write().resources, server_id, resources)
    }

    /// Replaces every prompt owned by `server_id` with `prompts`
    pub fn replace_prompts(&self, server_id: &str, prompts: Vec<Prompt>) -> usize {
        replace_entries(&mut self.write().prompts, server_id, prompts)
    }

    /// Removes every descriptor owned by `server_id` from all three catalogs
    pub fn remove_server(&self, server_id: &str) {
        let mut state = self.write();
        state.tools.retain(|_, d| d.server_id != server_id);
        state.resources.retain(|_, d| d.server_id != server_id);
        state.prompts.retain(|_, d| d.server_id != server_id);
        debug!("Removed catalog entries of server '{}'", server_id);
    }

    /// Looks up a tool by name
    pub fn tool(&self, name: &str) -> Option<Tool> {
        self.read().tools.get(name).cloned()
    }

    /// Looks up a resource by URI
    pub fn resource(&self, uri: &str) -> Option<Resource> {
        self.read().resources.get(uri).cloned()
    }

    /// Looks up a prompt by name
    pub fn prompt(&self, name: &str) -> Option<Prompt> {
        self.read().prompts.get(name).cloned()
    }

    /// All tools, sorted by name
    pub fn tools(&self) -> Vec<Tool> {
        sorted(&self.read().tools)
    }

    /// All resources, sorted by URI
    pub fn resources(&self) -> Vec<Resource> {
        sorted(&self.read().resources)
    }

    /// All prompts, sorted by name
    pub fn prompts(&self) -> Vec<Prompt> {
        sorted(&self.read().prompts)
    }

    /// Empties all three catalogs
    pub fn clear(&self) {
        *self.write() = CatalogState::default();
    }
}
