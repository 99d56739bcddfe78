//! Sub-agent worker entry point.
//!
//! Runs inside the spawned process: read the payload line from stdin, build
//! the provider and tools, drive one agent turn, and print exactly one
//! terminal NDJSON message to stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentLoop, AgentLoopConfig, NoopHandler};
use crate::errors::AgentError;
use crate::llm::create_provider;
use crate::subagent::{WorkerMessage, WorkerPayload};
use crate::tools::{
    McpManager, ReadFileTool, SearchTool, ShellTool, ToolRegistry, WriteFileTool,
};

/// Register the standard built-in tools.
///
/// Workers deliberately get no sub-agent tools; they do not recurse.
pub fn standard_tools(registry: &mut ToolRegistry) -> Result<(), AgentError> {
    registry.register(Arc::new(ReadFileTool))?;
    registry.register(Arc::new(WriteFileTool))?;
    registry.register(Arc::new(ShellTool))?;
    registry.register(Arc::new(SearchTool))?;
    Ok(())
}

/// The whole worker lifecycle. Always emits one terminal message; the exit
/// code stays zero so the message remains authoritative.
pub async fn worker_main() {
    let payload = match read_payload().await {
        Ok(payload) => payload,
        Err(e) => {
            emit(&WorkerMessage::Error {
                error: format!("Invalid worker payload: {}", e),
            });
            return;
        }
    };

    match run_task(&payload).await {
        Ok(result) => emit(&WorkerMessage::Result { data: result }),
        Err(e) => emit(&WorkerMessage::Error {
            error: e.to_string(),
        }),
    }
}

async fn read_payload() -> Result<WorkerPayload, AgentError> {
    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    reader.read_line(&mut line).await?;
    Ok(serde_json::from_str(line.trim())?)
}

async fn run_task(payload: &WorkerPayload) -> Result<String, AgentError> {
    let provider = create_provider(
        &payload.provider_name,
        &payload.provider_config,
        &payload.model,
    )?;

    let mut registry = ToolRegistry::new();
    standard_tools(&mut registry)?;

    // Tool servers are best-effort inside a worker; the task still runs with
    // built-ins when none come up.
    let manager = match McpManager::connect_all(&payload.tool_servers).await {
        Ok(startup) => {
            for tool in startup.tools {
                if let Err(e) = registry.register_external(tool) {
                    log::warn!("{}", e);
                }
            }
            Some(startup.manager)
        }
        Err(e) => {
            log::warn!("{}", e);
            None
        }
    };

    let mut agent = AgentLoop::new(
        provider,
        Arc::new(registry),
        Arc::new(NoopHandler),
        AgentLoopConfig::default(),
        CancellationToken::new(),
    )
    .with_system_message(payload.system_message.clone());

    let result = agent.step(payload.task.clone()).await;

    if let Some(manager) = manager {
        manager.close_all().await;
    }

    result
}

fn emit(message: &WorkerMessage) {
    if let Ok(line) = serde_json::to_string(message) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_tools_register_cleanly() {
        let mut registry = ToolRegistry::new();
        standard_tools(&mut registry).unwrap();
        for name in ["read_file", "write_file", "shell", "search"] {
            assert!(registry.get(name).is_some(), "missing {}", name);
        }
        assert!(registry.get("agent_spawn").is_none());
    }

    #[test]
    fn test_worker_messages_serialize_as_protocol_shapes() {
        let line = serde_json::to_string(&WorkerMessage::Result {
            data: "D".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["data"], "D");

        let line = serde_json::to_string(&WorkerMessage::Error {
            error: "E".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "E");
    }
}
