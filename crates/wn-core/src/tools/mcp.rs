//! External tool client: MCP servers over child-process stdio.
//!
//! Each configured server is spawned as a subprocess and spoken to through
//! the MCP handshake. Discovered tools are wrapped as registry entries named
//! `<server>__<tool>`; the prefix keeps names globally unique across servers
//! while the wrapped call uses the server's own tool name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{DynService, RunningService, ServiceExt},
    transport::TokioChildProcess,
    RoleClient,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::core_types::ToolResult;
use crate::errors::AgentError;
use crate::llm::ToolMetadata;
use crate::tools::Tool;

/// One tool-server entry from the root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Client view of one connected tool server.
#[async_trait]
pub trait McpClient: Send + Sync {
    fn server_name(&self) -> &str;
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, AgentError>;
    /// Invoke a tool by its un-prefixed name.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, AgentError>;
}

type McpService = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// A live connection to one MCP server subprocess.
pub struct McpConnection {
    name: String,
    service: RwLock<Option<McpService>>,
}

impl McpConnection {
    pub async fn connect(config: &McpServerConfig) -> Result<Self, AgentError> {
        log::info!(
            "Starting tool server '{}': {} {:?}",
            config.name,
            config.command,
            config.args
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        if let Some(env) = &config.env {
            for (key, value) in env {
                cmd.env(key, value);
            }
        }

        let transport = TokioChildProcess::new(&mut cmd)
            .map_err(|e| AgentError::Mcp(format!("Failed to spawn '{}': {}", config.name, e)))?;

        let handler: Box<dyn DynService<RoleClient>> = Box::new(());
        let service = handler.serve(transport).await.map_err(|e| {
            AgentError::Mcp(format!(
                "Handshake with '{}' failed: {}",
                config.name, e
            ))
        })?;

        log::info!("Connected to tool server '{}'", config.name);
        Ok(Self {
            name: config.name.clone(),
            service: RwLock::new(Some(service)),
        })
    }

    pub async fn close(&self) {
        if let Some(service) = self.service.write().await.take() {
            // Errors during close are suppressed; the process is tearing down.
            if let Err(e) = service.cancel().await {
                log::warn!("Failed to close tool server '{}': {}", self.name, e);
            }
        }
    }
}

/// Flatten a server result to the first text content block; empty on absence.
fn flatten_content(content: &[rmcp::model::Content]) -> String {
    content
        .iter()
        .find_map(|c| match &c.raw {
            RawContent::Text(text_content) => Some(text_content.text.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[async_trait]
impl McpClient for McpConnection {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, AgentError> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| AgentError::Mcp(format!("Server '{}' is closed", self.name)))?;

        let response = service
            .list_tools(Default::default())
            .await
            .map_err(|e| AgentError::Mcp(format!("Failed to list tools: {}", e)))?;

        Ok(response
            .tools
            .iter()
            .map(|tool| McpToolInfo {
                name: tool.name.to_string(),
                description: tool.description.to_string(),
                input_schema: Value::Object(tool.input_schema.as_ref().clone()),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, AgentError> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| AgentError::Mcp(format!("Server '{}' is closed", self.name)))?;

        let arguments = if arguments.is_null() {
            None
        } else {
            arguments.as_object().cloned()
        };

        let result = service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| AgentError::Mcp(format!("Failed to call tool '{}': {}", name, e)))?;

        let output = flatten_content(&result.content);
        if result.is_error.unwrap_or(false) {
            Ok(ToolResult {
                ok: false,
                output: String::new(),
                error: Some(output),
            })
        } else {
            Ok(ToolResult::success(output))
        }
    }
}

/// One discovered server tool wrapped as a registry entry.
pub struct McpTool {
    client: Arc<dyn McpClient>,
    info: McpToolInfo,
    prefixed_name: String,
}

impl McpTool {
    pub fn new(client: Arc<dyn McpClient>, info: McpToolInfo) -> Self {
        let prefixed_name = format!("{}__{}", client.server_name(), info.name);
        Self {
            client,
            info,
            prefixed_name,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.prefixed_name.clone(),
            description: self.info.description.clone(),
            input_schema: self.info.input_schema.clone(),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        match self.client.call_tool(&self.info.name, arguments).await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }
}

/// Owns every live connection; single point for shutdown.
#[derive(Default)]
pub struct McpManager {
    connections: Vec<Arc<McpConnection>>,
}

/// Everything a successful startup produced.
pub struct McpStartup {
    pub manager: McpManager,
    pub tools: Vec<Arc<dyn Tool>>,
    pub warnings: Vec<String>,
}

impl McpManager {
    /// Connect every configured server in parallel.
    ///
    /// Individual failures accumulate as warnings; only when every server
    /// failed does the whole call fail, with the joined diagnostic.
    pub async fn connect_all(configs: &[McpServerConfig]) -> Result<McpStartup, AgentError> {
        let attempts = futures::future::join_all(
            configs.iter().map(|config| async move {
                let connection = McpConnection::connect(config).await?;
                let infos = connection.list_tools().await?;
                Ok::<_, AgentError>((Arc::new(connection), infos))
            }),
        )
        .await;

        let mut connections = Vec::new();
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        let mut warnings = Vec::new();

        for (config, attempt) in configs.iter().zip(attempts) {
            match attempt {
                Ok((connection, infos)) => {
                    for info in infos {
                        let client: Arc<dyn McpClient> = connection.clone();
                        tools.push(Arc::new(McpTool::new(client, info)));
                    }
                    connections.push(connection);
                }
                Err(e) => {
                    let warning = format!("{}: {}", config.name, e);
                    log::warn!("Tool server failed: {}", warning);
                    warnings.push(warning);
                }
            }
        }

        if connections.is_empty() && !configs.is_empty() {
            return Err(AgentError::Mcp(format!(
                "All tool servers failed: {}",
                warnings.join("; ")
            )));
        }

        Ok(McpStartup {
            manager: McpManager { connections },
            tools,
            warnings,
        })
    }

    pub async fn close_all(&self) {
        for connection in &self.connections {
            connection.close().await;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::MockMcpClient;
    use super::*;
    use serde_json::json;

    fn scan_info() -> McpToolInfo {
        McpToolInfo {
            name: "run_scan".to_string(),
            description: "Run a scan".to_string(),
            input_schema: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn test_external_tool_name_is_prefixed() {
        let client = Arc::new(MockMcpClient::new("nmap", vec![scan_info()]));
        let tool = McpTool::new(client.clone(), scan_info());
        assert_eq!(tool.metadata().name, "nmap__run_scan");
    }

    #[tokio::test]
    async fn test_execute_uses_unprefixed_name() {
        let client = Arc::new(MockMcpClient::new("nmap", vec![scan_info()]));
        let tool = McpTool::new(client.clone(), scan_info());

        let result = tool.execute(json!({"target": "localhost"})).await;
        assert!(result.ok);

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "run_scan");
        assert_eq!(calls[0].1, json!({"target": "localhost"}));
    }

    #[tokio::test]
    async fn test_missing_description_becomes_empty_string() {
        let info = McpToolInfo {
            name: "t".into(),
            description: String::new(),
            input_schema: json!({}),
        };
        let client = Arc::new(MockMcpClient::new("srv", vec![]));
        let tool = McpTool::new(client, info);
        assert_eq!(tool.metadata().description, "");
    }

    #[tokio::test]
    async fn test_connect_all_with_no_servers_is_ok() {
        let startup = McpManager::connect_all(&[]).await.unwrap();
        assert!(startup.tools.is_empty());
        assert!(startup.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_connect_all_all_failed_is_error() {
        let configs = vec![
            McpServerConfig {
                name: "ghost-a".into(),
                command: "/nonexistent/wn-test-binary".into(),
                args: vec![],
                env: None,
            },
            McpServerConfig {
                name: "ghost-b".into(),
                command: "/nonexistent/wn-test-binary".into(),
                args: vec![],
                env: None,
            },
        ];
        let err = match McpManager::connect_all(&configs).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        let msg = err.to_string();
        assert!(msg.contains("ghost-a"));
        assert!(msg.contains("ghost-b"));
    }
}
