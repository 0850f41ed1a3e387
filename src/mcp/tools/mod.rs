//! # MCP Tools
//!
//! Tool descriptors as listed by `tools/list`. Each descriptor carries the id of the
//! server that owns it; tool names are unique across all connected servers.
//!
//! ```rust
//! use mcp_hub::mcp::tools::parse_tool_list;
//! use serde_json::json;
//!
//! let tools = parse_tool_list(
//!     "demo",
//!     json!({"tools": [{"name": "echo", "inputSchema": {"type": "object"}}]}),
//! )
//! .unwrap();
//! assert_eq!(tools[0].name, "echo");
//! assert_eq!(tools[0].server_id, "demo");
//! ```

mod models;

pub use models::{parse_tool_list, Tool};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ignores_server_supplied_owner() {
        let tools = parse_tool_list(
            "a",
            json!({"tools": [{"name": "echo", "description": "Echo", "serverId": "b"}]}),
        )
        .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].server_id, "a");
        assert_eq!(tools[0].description.as_deref(), Some("Echo"));
        assert_eq!(tools[0].input_schema, json!({"type": "object"}));
    }

    #[test]
    fn test_parse_missing_list_is_empty() {
        assert!(parse_tool_list("a", json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_nameless_tool() {
        assert!(parse_tool_list("a", json!({"tools": [{"description": "x"}]})).is_err());
    }
}
