//! Error types for failure handling across the runtime
//!
//! A single error enum crosses every component boundary. The design keeps
//! error payloads as plain strings so they can travel through the JSON-RPC
//! surface and the sub-agent worker protocol without further mapping.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Tool execution failed for '{tool_name}': {message}")]
    Tool { tool_name: String, message: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Parsing error: {0}")]
    Parsing(String),
    #[error("MCP client error: {0}")]
    Mcp(String),
    /// Malformed request params; the RPC dispatcher maps this to -32602.
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Aborted")]
    Aborted,
    #[error("Max tool rounds reached ({0})")]
    MaxToolRounds(usize),
    /// Marker consumed by the RPC dispatcher; never escapes the server.
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Provider(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Parsing(err.to_string())
    }
}
