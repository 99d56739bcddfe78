//! Tool system for extending the agent with callable functionality.
//!
//! Tools come from two places: built-ins registered at startup and tools
//! discovered from external MCP servers. The registry keeps them in separate
//! stores so that a built-in always shadows an external tool of the same
//! name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core_types::ToolResult;
use crate::errors::AgentError;
use crate::llm::ToolMetadata;

pub mod file_ops;
pub mod mcp;
pub mod search;
pub mod shell;
pub mod subagent_tools;

pub use file_ops::{ReadFileTool, WriteFileTool};
pub use mcp::{McpManager, McpServerConfig};
pub use search::SearchTool;
pub use shell::ShellTool;

/// A named callable the model can invoke.
///
/// `execute` never fails out of band: argument validation problems and
/// execution failures alike come back as `ToolResult { ok: false, .. }` so
/// the model can see the diagnostic and recover.
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> ToolMetadata;
    async fn execute(&self, arguments: Value) -> ToolResult;
}

/// Two-tier keyed store: built-in tools shadow external tools of the same
/// name. Populated during startup, read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    builtin: HashMap<String, Arc<dyn Tool>>,
    external: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.metadata().name;
        if self.builtin.contains_key(&name) {
            return Err(AgentError::Config(format!(
                "Duplicate built-in tool: {}",
                name
            )));
        }
        self.builtin.insert(name, tool);
        Ok(())
    }

    pub fn register_external(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.metadata().name;
        if self.external.contains_key(&name) {
            return Err(AgentError::Config(format!(
                "Duplicate external tool: {}",
                name
            )));
        }
        self.external.insert(name, tool);
        Ok(())
    }

    /// Built-in first, then external.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.builtin
            .get(name)
            .or_else(|| self.external.get(name))
            .cloned()
    }

    /// Union of both stores, built-in entries overriding external ones.
    pub fn list(&self) -> Vec<ToolMetadata> {
        let mut by_name: HashMap<String, ToolMetadata> = self
            .external
            .values()
            .map(|t| {
                let meta = t.metadata();
                (meta.name.clone(), meta)
            })
            .collect();
        for tool in self.builtin.values() {
            let meta = tool.metadata();
            by_name.insert(meta.name.clone(), meta);
        }
        by_name.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty() && self.external.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A canned tool for registry and loop tests.
    pub struct StaticTool {
        pub name: String,
        pub description: String,
        pub result: ToolResult,
    }

    impl StaticTool {
        pub fn new(name: &str, description: &str, result: ToolResult) -> Self {
            Self {
                name: name.to_string(),
                description: description.to_string(),
                result,
            }
        }
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn metadata(&self) -> ToolMetadata {
            ToolMetadata {
                name: self.name.clone(),
                description: self.description.clone(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _arguments: Value) -> ToolResult {
            self.result.clone()
        }
    }
}
