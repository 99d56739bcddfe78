//! Built-in tools exposing the sub-agent runner to the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core_types::ToolResult;
use crate::llm::ToolMetadata;
use crate::subagent::{SubAgentRunner, SubAgentSpec};
use crate::tools::Tool;

pub struct AgentSpawnTool {
    runner: Arc<SubAgentRunner>,
}

impl AgentSpawnTool {
    pub fn new(runner: Arc<SubAgentRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for AgentSpawnTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "agent_spawn".to_string(),
            description: "Spawn an isolated sub-agent to work on a task; returns its handle id"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task": {
                        "type": "string",
                        "description": "The task for the sub-agent"
                    },
                    "persona": {
                        "type": "string",
                        "description": "Persona name (default persona when omitted)"
                    },
                    "skills": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Skill names appended to the persona"
                    },
                    "provider": {
                        "type": "string",
                        "description": "Provider name from the providers table"
                    },
                    "model": {
                        "type": "string",
                        "description": "Model override"
                    },
                    "agent": {
                        "type": "string",
                        "description": "Named agent definition supplying defaults for the other fields"
                    }
                },
                "required": ["task"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let Some(task) = arguments.get("task").and_then(Value::as_str) else {
            return ToolResult::failure("Missing or invalid 'task' parameter");
        };
        let skills = match arguments.get("skills") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let mut skills = Vec::new();
                for item in items {
                    match item.as_str() {
                        Some(s) => skills.push(s.to_string()),
                        None => return ToolResult::failure("'skills' must be an array of strings"),
                    }
                }
                skills
            }
            Some(_) => return ToolResult::failure("'skills' must be an array of strings"),
        };

        let mut spec = SubAgentSpec {
            persona: string_arg(&arguments, "persona"),
            skills,
            provider: string_arg(&arguments, "provider"),
            model: string_arg(&arguments, "model"),
            task: task.to_string(),
        };

        if let Some(agent_name) = string_arg(&arguments, "agent") {
            if let Err(message) = self.runner.apply_agent_defaults(&mut spec, &agent_name) {
                return ToolResult::failure(message);
            }
        }

        let handle = self.runner.spawn(spec).await;
        ToolResult::success(serde_json::to_string(&handle).unwrap_or_default())
    }
}

pub struct AgentStatusTool {
    runner: Arc<SubAgentRunner>,
}

impl AgentStatusTool {
    pub fn new(runner: Arc<SubAgentRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for AgentStatusTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "agent_status".to_string(),
            description: "Get a spawned sub-agent's status and result".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "Handle id from agent_spawn"}
                },
                "required": ["id"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let Some(id) = arguments.get("id").and_then(Value::as_str) else {
            return ToolResult::failure("Missing or invalid 'id' parameter");
        };
        match self.runner.get(id) {
            Some(handle) => {
                ToolResult::success(serde_json::to_string(&handle).unwrap_or_default())
            }
            None => ToolResult::failure(format!("No sub-agent with id {}", id)),
        }
    }
}

pub struct AgentListTool {
    runner: Arc<SubAgentRunner>,
}

impl AgentListTool {
    pub fn new(runner: Arc<SubAgentRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for AgentListTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "agent_list".to_string(),
            description: "List all spawned sub-agents and their statuses".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _arguments: Value) -> ToolResult {
        ToolResult::success(serde_json::to_string(&self.runner.list()).unwrap_or_default())
    }
}

pub struct AgentStopTool {
    runner: Arc<SubAgentRunner>,
}

impl AgentStopTool {
    pub fn new(runner: Arc<SubAgentRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for AgentStopTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "agent_stop".to_string(),
            description: "Terminate a running sub-agent".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "Handle id from agent_spawn"}
                },
                "required": ["id"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let Some(id) = arguments.get("id").and_then(Value::as_str) else {
            return ToolResult::failure("Missing or invalid 'id' parameter");
        };
        self.runner.stop(id);
        ToolResult::success(format!("Stopped {}", id))
    }
}

fn string_arg(arguments: &Value, key: &str) -> Option<String> {
    arguments.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Register the full sub-agent tool family.
pub fn register_subagent_tools(
    registry: &mut crate::tools::ToolRegistry,
    runner: Arc<SubAgentRunner>,
) -> Result<(), crate::errors::AgentError> {
    registry.register(Arc::new(AgentSpawnTool::new(runner.clone())))?;
    registry.register(Arc::new(AgentStatusTool::new(runner.clone())))?;
    registry.register(Arc::new(AgentListTool::new(runner.clone())))?;
    registry.register(Arc::new(AgentStopTool::new(runner)))?;
    Ok(())
}
