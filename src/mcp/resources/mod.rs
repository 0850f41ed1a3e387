//! # MCP Resources
//!
//! Resource descriptors as listed by `resources/list`, keyed by URI across all
//! connected servers.

mod models;

pub use models::{parse_resource_list, Resource};
