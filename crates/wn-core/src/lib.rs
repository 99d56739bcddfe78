//! wn-core: the engines of the wn agent runtime.
//!
//! Four tightly coupled pieces: a provider abstraction over four LLM
//! back-ends, the agent loop state machine, the tool registry with its
//! external MCP client, and the stdio JSON-RPC server plus sub-agent runner.
//! The `wn` binary in `wn-cli` wires them to stdin/stdout.

pub mod agent;
pub mod config;
pub mod core_types;
pub mod errors;
pub mod llm;
pub mod resources;
pub mod rpc;
pub mod subagent;
pub mod tools;

pub use agent::{AgentHandler, AgentLoop, AgentLoopConfig, AgentState, NoopHandler};
pub use config::RootConfig;
pub use core_types::{
    CompletionResponse, Message, Role, StreamChunk, TokenUsage, ToolCall, ToolResult,
};
pub use errors::AgentError;
pub use llm::{create_provider, ChunkStream, Provider, ProviderConfig, ToolMetadata};
pub use resources::ResourceSet;
pub use rpc::{RpcHandler, RpcServer};
pub use subagent::{SubAgentRunner, SubAgentSpec, SubAgentStatus};
pub use tools::{McpManager, McpServerConfig, Tool, ToolRegistry};
