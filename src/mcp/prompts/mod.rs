//! # MCP Prompts
//!
//! Prompt descriptors as listed by `prompts/list`.

mod types;

pub use types::{parse_prompt_list, Prompt, PromptArgument};
