//! Regex search tool over a directory tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::core_types::ToolResult;
use crate::llm::ToolMetadata;
use crate::tools::Tool;

const DEFAULT_MAX_RESULTS: usize = 100;
const MAX_FILE_BYTES: u64 = 1_048_576;

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "search".to_string(),
            description:
                "Search files under a directory for a regular expression, returning path:line matches"
                    .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "The regular expression to search for"
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory to search (default: current directory)"
                    },
                    "max_results": {
                        "type": "number",
                        "description": "Stop after this many matches (default 100)"
                    }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolResult {
        let Some(pattern) = arguments.get("pattern").and_then(Value::as_str) else {
            return ToolResult::failure("Missing or invalid 'pattern' parameter");
        };
        let root = arguments
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        let max_results = match arguments.get("max_results") {
            None | Some(Value::Null) => DEFAULT_MAX_RESULTS,
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => n as usize,
                _ => return ToolResult::failure("'max_results' must be a positive number"),
            },
        };

        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => return ToolResult::failure(format!("Invalid pattern: {}", e)),
        };

        // The walk is synchronous; hand it to the blocking pool.
        let matches = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            walk(Path::new(&root), &regex, max_results, &mut matches);
            matches
        })
        .await;

        match matches {
            Ok(matches) if matches.is_empty() => ToolResult::success("No matches found"),
            Ok(matches) => ToolResult::success(matches.join("\n")),
            Err(e) => ToolResult::failure(format!("Search failed: {}", e)),
        }
    }
}

fn walk(dir: &Path, regex: &Regex, max_results: usize, matches: &mut Vec<String>) {
    if matches.len() >= max_results {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if matches.len() >= max_results {
            return;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            walk(&path, regex, max_results, matches);
        } else if path.is_file() {
            scan_file(&path, regex, max_results, matches);
        }
    }
}

fn scan_file(path: &Path, regex: &Regex, max_results: usize, matches: &mut Vec<String>) {
    if let Ok(meta) = path.metadata() {
        if meta.len() > MAX_FILE_BYTES {
            return;
        }
    }
    let Ok(bytes) = std::fs::read(path) else {
        return;
    };
    // Skip binary-looking files.
    if bytes.contains(&0) {
        return;
    }
    let text = String::from_utf8_lossy(&bytes);
    for (line_number, line) in text.lines().enumerate() {
        if matches.len() >= max_results {
            return;
        }
        if regex.is_match(line) {
            matches.push(format!("{}:{}: {}", path.display(), line_number + 1, line));
        }
    }
}
