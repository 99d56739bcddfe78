//! Filesystem tools: read and write files on behalf of the model.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core_types::ToolResult;
use crate::llm::ToolMetadata;
use crate::tools::Tool;

const DEFAULT_MAX_BYTES: u64 = 262_144;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "read_file".to_string(),
            description: "Read a UTF-8 text file and return its contents".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of the file to read"
                    },
                    "max_bytes": {
                        "type": "number",
                        "description": "Truncate the file after this many bytes (default 262144)"
                    }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let Some(path) = arguments.get("path").and_then(Value::as_str) else {
            return ToolResult::failure("Missing or invalid 'path' parameter");
        };

        let max_bytes = match arguments.get("max_bytes") {
            None | Some(Value::Null) => DEFAULT_MAX_BYTES,
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => n,
                _ => return ToolResult::failure("'max_bytes' must be a positive number"),
            },
        };

        match tokio::fs::read(path).await {
            Ok(mut bytes) => {
                let truncated = bytes.len() as u64 > max_bytes;
                bytes.truncate(max_bytes as usize);
                let mut text = String::from_utf8_lossy(&bytes).into_owned();
                if truncated {
                    text.push_str("\n[truncated]");
                }
                ToolResult::success(text)
            }
            Err(e) => ToolResult::failure(format!("Failed to read {}: {}", path, e)),
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "write_file".to_string(),
            description: "Write text content to a file, creating parent directories as needed"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of the file to write"
                    },
                    "content": {
                        "type": "string",
                        "description": "The content to write"
                    }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let Some(path) = arguments.get("path").and_then(Value::as_str) else {
            return ToolResult::failure("Missing or invalid 'path' parameter");
        };
        let Some(content) = arguments.get("content").and_then(Value::as_str) else {
            return ToolResult::failure("Missing or invalid 'content' parameter");
        };

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolResult::failure(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ));
                }
            }
        }

        match tokio::fs::write(path, content).await {
            Ok(()) => ToolResult::success(format!("Wrote {} bytes to {}", content.len(), path)),
            Err(e) => ToolResult::failure(format!("Failed to write {}: {}", path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_file_round_trip() {
        let dir = std::env::temp_dir().join("wn-file-ops-test");
        let path = dir.join("note.txt");
        let path_str = path.to_string_lossy().to_string();

        let write = WriteFileTool
            .execute(json!({"path": path_str, "content": "hello"}))
            .await;
        assert!(write.ok, "{:?}", write.error);

        let read = ReadFileTool.execute(json!({"path": path_str})).await;
        assert!(read.ok);
        assert_eq!(read.output, "hello");

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_read_missing_path_argument() {
        let result = ReadFileTool.execute(json!({})).await;
        assert!(!result.ok);
        assert!(result.output.is_empty());
        assert!(result.error.unwrap().contains("path"));
    }

    #[tokio::test]
    async fn test_read_nonexistent_file_is_in_band_error() {
        let result = ReadFileTool
            .execute(json!({"path": "/definitely/not/here"}))
            .await;
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn test_max_bytes_lower_bound() {
        let result = ReadFileTool
            .execute(json!({"path": "x", "max_bytes": 0}))
            .await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("max_bytes"));
    }
}
