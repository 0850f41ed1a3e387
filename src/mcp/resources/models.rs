use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{McpError, McpResult};

/// A resource definition representing a piece of context data a server can serve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Unique identifier for the resource using URI format
    pub uri: String,
    /// Human-readable name for the resource
    #[serde(default)]
    pub name: String,
    /// Optional description of the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the resource content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Id of the server that owns this resource
    #[serde(skip_deserializing)]
    pub server_id: String,
}

impl Resource {
    /// Creates a resource owned by `server_id`
    pub fn new(uri: impl Into<String>, name: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
            server_id: server_id.into(),
        }
    }

    /// Sets the MIME type for the resource
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct ListResourcesResult {
    #[serde(default)]
    resources: Vec<Resource>,
}

/// Decodes a `resources/list` result and tags every resource with its owning server
pub fn parse_resource_list(server_id: &str, result: Value) -> McpResult<Vec<Resource>> {
    let list: ListResourcesResult = serde_json::from_value(result).map_err(|e| {
        McpError::Deserialization(format!(
            "Invalid resources/list result from '{}': {}",
            server_id, e
        ))
    })?;
    Ok(list
        .resources
        .into_iter()
        .map(|resource| Resource {
            server_id: server_id.to_string(),
            ..resource
        })
        .collect())
}
