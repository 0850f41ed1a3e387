//! Public operations on connected servers.
//!
//! Every operation resolves its target in a fixed order and fails before anything is
//! sent:
//!
//! 1. The descriptor (tool name, resource URI, prompt name) must be in the catalog,
//!    otherwise `NotFound`
//! 2. The owning server must be `connected`, otherwise `ServerNotConnected`
//! 3. Sampling additionally requires the server's sampling flag, otherwise
//!    `CapabilityUnsupported`
//!
//! The correlated `result` payload is returned verbatim; a remote error surfaces as
//! `RemoteOperationFailed`.

use serde_json::Value;
use tracing::instrument;

use crate::mcp::connection::ConnectionManager;
use crate::mcp::prompts::Prompt;
use crate::mcp::resources::Resource;
use crate::mcp::tools::Tool;
use crate::mcp::types::{methods, params_object};
use crate::telemetry;
use crate::utils::error::{McpError, McpResult};

impl ConnectionManager {
    /// Invokes a tool by name on the server that owns it
    #[instrument(skip(self, arguments))]
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
        let _guard = telemetry::span_duration("call_tool");
        let tool = self
            .catalog()
            .tool(name)
            .ok_or_else(|| McpError::NotFound(format!("Tool not found: {}", name)))?;
        let (transport, _) = self.connected_server(&tool.server_id)?;

        let params = params_object(vec![
            ("name", Some(Value::String(tool.name.clone()))),
            ("arguments", Some(arguments)),
        ]);
        self.correlator()
            .call(&tool.server_id, transport.as_ref(), methods::TOOLS_CALL, Some(params))
            .await
    }

    /// Reads a resource by URI from the server that owns it
    #[instrument(skip(self))]
    pub async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        let _guard = telemetry::span_duration("read_resource");
        let resource = self
            .catalog()
            .resource(uri)
            .ok_or_else(|| McpError::NotFound(format!("Resource not found: {}", uri)))?;
        let (transport, _) = self.connected_server(&resource.server_id)?;

        let params = params_object(vec![("uri", Some(Value::String(resource.uri.clone())))]);
        self.correlator()
            .call(
                &resource.server_id,
                transport.as_ref(),
                methods::RESOURCES_READ,
                Some(params),
            )
            .await
    }

    /// Alias of [`ConnectionManager::read_resource`]
    pub async fn get_resource(&self, uri: &str) -> McpResult<Value> {
        self.read_resource(uri).await
    }

    /// Retrieves a prompt by name, filled with `arguments`
    #[instrument(skip(self, arguments))]
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        let _guard = telemetry::span_duration("get_prompt");
        let prompt = self
            .catalog()
            .prompt(name)
            .ok_or_else(|| McpError::NotFound(format!("Prompt not found: {}", name)))?;
        let (transport, _) = self.connected_server(&prompt.server_id)?;

        let params = params_object(vec![
            ("name", Some(Value::String(prompt.name.clone()))),
            ("arguments", arguments),
        ]);
        self.correlator()
            .call(&prompt.server_id, transport.as_ref(), methods::PROMPTS_GET, Some(params))
            .await
    }

    /// Sends a `sampling/createMessage` request to a server that declared sampling
    #[instrument(skip(self, params))]
    pub async fn request_sampling(&self, server_id: &str, params: Value) -> McpResult<Value> {
        let _guard = telemetry::span_duration("request_sampling");
        if self.server(server_id).is_none() {
            return Err(McpError::NotFound(format!("Unknown server '{}'", server_id)));
        }
        let (transport, flags) = self.connected_server(server_id)?;
        if !flags.sampling {
            return Err(McpError::CapabilityUnsupported {
                server: server_id.to_string(),
                capability: "sampling".to_string(),
            });
        }
        self.correlator()
            .call(
                server_id,
                transport.as_ref(),
                methods::SAMPLING_CREATE_MESSAGE,
                Some(params),
            )
            .await
    }

    /// Every known tool across all servers, sorted by name
    pub fn get_available_tools(&self) -> Vec<Tool> {
        self.catalog().tools()
    }

    /// Every known resource across all servers, sorted by URI
    pub fn get_available_resources(&self) -> Vec<Resource> {
        self.catalog().resources()
    }

    /// Every known prompt across all servers, sorted by name
    pub fn get_available_prompts(&self) -> Vec<Prompt> {
        self.catalog().prompts()
    }
}
