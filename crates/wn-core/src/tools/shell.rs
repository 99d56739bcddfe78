//! Shell tool: run a command line and return its merged output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::core_types::ToolResult;
use crate::llm::ToolMetadata;
use crate::tools::Tool;

pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "shell".to_string(),
            description: "Run a shell command and return its stdout, stderr and exit status"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The command line to run via sh -c"
                    },
                    "timeout_secs": {
                        "type": "number",
                        "description": "Kill the command after this many seconds"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let Some(command) = arguments.get("command").and_then(Value::as_str) else {
            return ToolResult::failure("Missing or invalid 'command' parameter");
        };

        let timeout = match arguments.get("timeout_secs") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => Some(Duration::from_secs(n)),
                _ => return ToolResult::failure("'timeout_secs' must be a positive number"),
            },
        };

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return ToolResult::failure(format!("Failed to spawn shell: {}", e)),
        };

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return ToolResult::failure(format!(
                        "Command timed out after {}s",
                        limit.as_secs()
                    ))
                }
            },
            None => child.wait_with_output().await,
        };

        match output {
            Ok(output) => {
                let mut text = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.is_empty() {
                    text.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("stderr: ");
                    text.push_str(&stderr);
                }
                if output.status.success() {
                    ToolResult::success(text)
                } else {
                    ToolResult {
                        ok: false,
                        output: text,
                        error: Some(format!(
                            "Command exited with status {}",
                            output.status.code().unwrap_or(-1)
                        )),
                    }
                }
            }
            Err(e) => ToolResult::failure(format!("Command failed: {}", e)),
        }
    }
}
