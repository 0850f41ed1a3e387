//! Types for the Prompts module

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{McpError, McpResult};

/// An argument a prompt accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name
    pub name: String,
    /// Argument description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument is required
    #[serde(default)]
    pub required: bool,
}

/// A prompt template a connected server exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Prompt name, unique across all servers
    pub name: String,
    /// Prompt description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Accepted arguments
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
    /// Id of the server that owns this prompt
    #[serde(skip_deserializing)]
    pub server_id: String,
}

impl Prompt {
    /// The names of all required arguments
    pub fn required_arguments(&self) -> impl Iterator<Item = &str> {
        self.arguments
            .iter()
            .filter(|arg| arg.required)
            .map(|arg| arg.name.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ListPromptsResult {
    #[serde(default)]
    prompts: Vec<Prompt>,
}

/// Decodes a `prompts/list` result and tags every prompt with its owning server
pub fn parse_prompt_list(server_id: &str, result: Value) -> McpResult<Vec<Prompt>> {
    let list: ListPromptsResult = serde_json::from_value(result).map_err(|e| {
        McpError::Deserialization(format!(
            "Invalid prompts/list result from '{}': {}",
            server_id, e
        ))
    })?;
    Ok(list
        .prompts
        .into_iter()
        .map(|prompt| Prompt {
            server_id: server_id.to_string(),
            ..prompt
        })
        .collect())
}
