//! Core type definitions for the agent-LLM protocol
//!
//! These types are the lingua franca between the agent loop, the provider
//! adapters, and the tool system. Each provider translates them into its
//! vendor's wire format; nothing outside the adapters ever sees vendor JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single conversation turn.
///
/// Tool results are carried on `user` messages with `tool_call_id` set; the
/// provider adapters re-tag them to the vendor's tool-result role. A message
/// with `tool_call_id` always carries the textual tool output in `content`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Tool output fed back to the model under the originating call id.
    pub fn tool_result(call_id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: output.into(),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

/// The model's request to invoke a tool.
///
/// `id` is unique within an assistant turn. Adapters for vendors that do not
/// return ids synthesize a fresh UUID.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Outcome of a tool call, threaded back into the conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolResult {
    pub ok: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        ToolResult {
            ok: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            ok: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// The text the model sees for this result.
    pub fn model_text(&self) -> &str {
        if self.ok {
            &self.output
        } else {
            self.error.as_deref().unwrap_or(&self.output)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One full provider round-trip.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Incremental unit of a streamed provider response.
///
/// Every stream yields exactly one `Done`, and it is the last chunk.
/// `ToolCall` chunks carry fully reassembled arguments; vendor-specific
/// fragment accumulation is the adapter's job.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Delta { content: String },
    ToolCall { tool_call: ToolCall },
    Done { usage: Option<TokenUsage> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization_omits_empty_options() {
        let msg = Message::user("hi");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_tool_result_message_shape() {
        let msg = Message::tool_result("call_1", "read_file", "contents");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("read_file"));
        assert_eq!(msg.content, "contents");
    }

    #[test]
    fn test_stream_chunk_tagging() {
        let chunk = StreamChunk::Delta {
            content: "abc".into(),
        };
        let v = serde_json::to_value(&chunk).unwrap();
        assert_eq!(v["type"], "delta");

        let done = StreamChunk::Done { usage: None };
        let v = serde_json::to_value(&done).unwrap();
        assert_eq!(v["type"], "done");
    }

    #[test]
    fn test_tool_result_model_text() {
        assert_eq!(ToolResult::success("out").model_text(), "out");
        assert_eq!(ToolResult::failure("bad args").model_text(), "bad args");
    }
}
