use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{McpError, McpResult};

/// A tool a connected server exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique identifier for the tool across all servers
    pub name: String,

    /// Human-readable description of functionality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema defining expected parameters
    #[serde(default = "empty_schema")]
    pub input_schema: Value,

    /// Id of the server that owns this tool
    #[serde(skip_deserializing)]
    pub server_id: String,
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object"})
}

impl Tool {
    /// Creates a tool owned by `server_id`
    pub fn new(name: &str, description: &str, input_schema: Value, server_id: &str) -> Self {
        Self {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema,
            server_id: server_id.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<Tool>,
}

/// Decodes a `tools/list` result and tags every tool with its owning server
pub fn parse_tool_list(server_id: &str, result: Value) -> McpResult<Vec<Tool>> {
    let list: ListToolsResult = serde_json::from_value(result).map_err(|e| {
        McpError::Deserialization(format!("Invalid tools/list result from '{}': {}", server_id, e))
    })?;
    Ok(list
        .tools
        .into_iter()
        .map(|tool| Tool {
            server_id: server_id.to_string(),
            ..tool
        })
        .collect())
}
