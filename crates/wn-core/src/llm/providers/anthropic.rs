//! Anthropic Claude provider.
//!
//! Implements the Messages API with tool calling and SSE streaming. System
//! messages are carried in the separate `system` request field; tool calls
//! and tool results travel as content blocks.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core_types::{CompletionResponse, Message, Role, StreamChunk, TokenUsage, ToolCall};
use crate::errors::AgentError;
use crate::llm::stream::{response_lines, sse_data};
use crate::llm::{resolve_api_key, ChunkStream, Provider, ProviderConfig, ToolMetadata};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum AnthropicContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicResponseContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, api_base: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: api_base.unwrap_or_else(|| ANTHROPIC_API_BASE.to_string()),
            model,
        }
    }

    /// Split the canonical history into the `system` parameter and the
    /// vendor message list. Consecutive blocks of the same role are merged;
    /// tool results ride inside `user` messages.
    fn convert_messages(&self, messages: Vec<Message>) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut anthropic_messages: Vec<AnthropicMessage> = Vec::new();
        let mut current_user_content: Vec<AnthropicContent> = Vec::new();
        let mut current_assistant_content: Vec<AnthropicContent> = Vec::new();

        for message in messages {
            match message.role {
                Role::System => {
                    system_parts.push(message.content);
                }
                Role::User => {
                    if !current_assistant_content.is_empty() {
                        anthropic_messages.push(AnthropicMessage {
                            role: "assistant".to_string(),
                            content: current_assistant_content.drain(..).collect(),
                        });
                    }
                    if let Some(tool_use_id) = message.tool_call_id {
                        current_user_content.push(AnthropicContent::ToolResult {
                            tool_use_id,
                            content: message.content,
                        });
                    } else {
                        current_user_content.push(AnthropicContent::Text {
                            text: message.content,
                        });
                    }
                }
                Role::Assistant => {
                    if !current_user_content.is_empty() {
                        anthropic_messages.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: current_user_content.drain(..).collect(),
                        });
                    }
                    if !message.content.is_empty() {
                        current_assistant_content.push(AnthropicContent::Text {
                            text: message.content,
                        });
                    }
                    if let Some(tool_calls) = message.tool_calls {
                        for tool_call in tool_calls {
                            current_assistant_content.push(AnthropicContent::ToolUse {
                                id: tool_call.id,
                                name: tool_call.name,
                                input: tool_call.arguments,
                            });
                        }
                    }
                }
            }
        }

        if !current_user_content.is_empty() {
            anthropic_messages.push(AnthropicMessage {
                role: "user".to_string(),
                content: current_user_content,
            });
        }
        if !current_assistant_content.is_empty() {
            anthropic_messages.push(AnthropicMessage {
                role: "assistant".to_string(),
                content: current_assistant_content,
            });
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        };

        (system, anthropic_messages)
    }

    fn convert_tools(&self, tools: Option<Vec<ToolMetadata>>) -> Vec<AnthropicTool> {
        tools
            .unwrap_or_default()
            .into_iter()
            .map(|tool| AnthropicTool {
                name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
        stream: bool,
    ) -> AnthropicRequest {
        let (system, anthropic_messages) = self.convert_messages(messages);
        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: DEFAULT_MAX_TOKENS,
            messages: anthropic_messages,
            system,
            tools: self.convert_tools(tools),
            stream,
        }
    }

    async fn send(&self, request: &AnthropicRequest) -> Result<reqwest::Response, AgentError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Provider(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::Provider(format!(
                "Anthropic API error ({}): {}",
                status, error_text
            )));
        }

        Ok(response)
    }

    fn convert_response(&self, response: AnthropicResponse) -> CompletionResponse {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                AnthropicResponseContent::Text { text } => content.push_str(&text),
                AnthropicResponseContent::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input,
                    });
                }
                AnthropicResponseContent::Other => {}
            }
        }

        CompletionResponse {
            content,
            tool_calls,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        }
    }
}

/// Reassembly state for one streamed response.
///
/// Tool-call blocks arrive as a `content_block_start` carrying the name and
/// id, then `input_json_delta` fragments keyed by block index, then a
/// `content_block_stop` at which point the accumulated JSON is parsed.
#[derive(Default)]
struct StreamAssembler {
    blocks: std::collections::HashMap<u64, PendingBlock>,
    input_tokens: u32,
    output_tokens: u32,
    saw_usage: bool,
}

struct PendingBlock {
    id: String,
    name: String,
    partial_json: String,
}

impl StreamAssembler {
    /// Digest one SSE event, producing any canonical chunks it completes.
    fn handle_event(&mut self, event: &Value) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        match event["type"].as_str() {
            Some("message_start") => {
                if let Some(usage) = event["message"]["usage"].as_object() {
                    self.input_tokens = usage
                        .get("input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32;
                    self.saw_usage = true;
                }
            }
            Some("content_block_start") => {
                let index = event["index"].as_u64().unwrap_or(0);
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.blocks.insert(
                        index,
                        PendingBlock {
                            id: block["id"]
                                .as_str()
                                .map(str::to_string)
                                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            partial_json: String::new(),
                        },
                    );
                }
            }
            Some("content_block_delta") => {
                let index = event["index"].as_u64().unwrap_or(0);
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str() {
                            out.push(StreamChunk::Delta {
                                content: text.to_string(),
                            });
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(block) = self.blocks.get_mut(&index) {
                            block
                                .partial_json
                                .push_str(delta["partial_json"].as_str().unwrap_or_default());
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                let index = event["index"].as_u64().unwrap_or(0);
                if let Some(block) = self.blocks.remove(&index) {
                    let arguments = serde_json::from_str(&block.partial_json)
                        .unwrap_or_else(|_| Value::Object(Default::default()));
                    out.push(StreamChunk::ToolCall {
                        tool_call: ToolCall {
                            id: block.id,
                            name: block.name,
                            arguments,
                        },
                    });
                }
            }
            Some("message_delta") => {
                if let Some(tokens) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = tokens as u32;
                    self.saw_usage = true;
                }
            }
            _ => {}
        }
        out
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.saw_usage.then_some(TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<CompletionResponse, AgentError> {
        let request = self.build_request(messages, tools, false);
        let response = self.send(&request).await?;
        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Failed to parse response: {}", e)))?;
        Ok(self.convert_response(anthropic_response))
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolMetadata>>,
    ) -> Result<ChunkStream, AgentError> {
        let request = self.build_request(messages, tools, true);
        let response = self.send(&request).await?;

        let lines = response_lines(response);
        let chunks = futures::stream::unfold(
            (Box::pin(lines), StreamAssembler::default(), Vec::new(), false),
            |(mut lines, mut assembler, mut pending, mut finished)| async move {
                loop {
                    if let Some(chunk) = pending.pop() {
                        return Some((Ok(chunk), (lines, assembler, pending, finished)));
                    }
                    if finished {
                        return None;
                    }
                    match lines.next().await {
                        Some(Ok(line)) => {
                            let Some(data) = sse_data(&line) else {
                                continue;
                            };
                            let Ok(event) = serde_json::from_str::<Value>(data) else {
                                continue;
                            };
                            if event["type"].as_str() == Some("message_stop") {
                                finished = true;
                                return Some((
                                    Ok(StreamChunk::Done {
                                        usage: assembler.usage(),
                                    }),
                                    (lines, assembler, pending, finished),
                                ));
                            }
                            let mut produced = assembler.handle_event(&event);
                            produced.reverse();
                            pending = produced;
                        }
                        Some(Err(e)) => {
                            finished = true;
                            return Some((Err(e), (lines, assembler, pending, finished)));
                        }
                        None => {
                            // Vendor ended without message_stop; still honor
                            // the one-done invariant.
                            finished = true;
                            return Some((
                                Ok(StreamChunk::Done {
                                    usage: assembler.usage(),
                                }),
                                (lines, assembler, pending, finished),
                            ));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}

/// Create an Anthropic provider from the configuration record.
pub fn create(config: &ProviderConfig, model: String) -> Result<Arc<dyn Provider>, AgentError> {
    let api_key = resolve_api_key(config, "ANTHROPIC_API_KEY", "Anthropic")?;
    Ok(Arc::new(AnthropicProvider::new(
        api_key,
        model,
        config.base_url.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_provider() -> AnthropicProvider {
        AnthropicProvider::new("test-key".into(), "claude-sonnet-4-20250514".into(), None)
    }

    #[test]
    fn test_system_messages_are_separated_and_joined() {
        let provider = test_provider();
        let messages = vec![
            Message::system("A"),
            Message::system("B"),
            Message::user("hi"),
        ];

        let (system, converted) = provider.convert_messages(messages);
        assert_eq!(system.as_deref(), Some("A\nB"));
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
        match &converted[0].content[0] {
            AnthropicContent::Text { text } => assert_eq!(text, "hi"),
            other => panic!("expected text content, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_call_round_trip_shapes() {
        let provider = test_provider();
        let mut assistant = Message::assistant("thinking");
        assistant.tool_calls = Some(vec![ToolCall {
            id: "X".into(),
            name: "f".into(),
            arguments: json!({"k": 1}),
        }]);
        let messages = vec![
            Message::user("go"),
            assistant,
            Message::tool_result("X", "f", "OK"),
        ];

        let (_, converted) = provider.convert_messages(messages);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1].role, "assistant");
        assert_eq!(converted[1].content.len(), 2);
        match &converted[1].content[1] {
            AnthropicContent::ToolUse { id, name, input } => {
                assert_eq!(id, "X");
                assert_eq!(name, "f");
                assert_eq!(input, &json!({"k": 1}));
            }
            other => panic!("expected tool_use, got {:?}", other),
        }
        assert_eq!(converted[2].role, "user");
        match &converted[2].content[0] {
            AnthropicContent::ToolResult {
                tool_use_id,
                content,
            } => {
                assert_eq!(tool_use_id, "X");
                assert_eq!(content, "OK");
            }
            other => panic!("expected tool_result, got {:?}", other),
        }
    }

    #[test]
    fn test_assistant_without_text_emits_no_empty_block() {
        let provider = test_provider();
        let mut assistant = Message::assistant("");
        assistant.tool_calls = Some(vec![ToolCall {
            id: "1".into(),
            name: "f".into(),
            arguments: json!({}),
        }]);

        let (_, converted) = provider.convert_messages(vec![Message::user("go"), assistant]);
        assert_eq!(converted[1].content.len(), 1);
        assert!(matches!(
            converted[1].content[0],
            AnthropicContent::ToolUse { .. }
        ));
    }

    #[test]
    fn test_response_conversion_collects_blocks() {
        let provider = test_provider();
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "I'll check."},
                {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "p"}}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 25}
        }))
        .unwrap();

        let converted = provider.convert_response(response);
        assert_eq!(converted.content, "I'll check.");
        assert_eq!(converted.tool_calls.len(), 1);
        assert_eq!(converted.tool_calls[0].id, "toolu_1");
        let usage = converted.usage.unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 25);
    }

    #[test]
    fn test_stream_reassembly_fragmented_arguments() {
        let mut assembler = StreamAssembler::default();
        assert!(assembler
            .handle_event(&json!({
                "type": "message_start",
                "message": {"usage": {"input_tokens": 7}}
            }))
            .is_empty());
        assembler.handle_event(&json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "tool_use", "id": "t1", "name": "weather"}
        }));
        assembler.handle_event(&json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": "{\"city\":"}
        }));
        assembler.handle_event(&json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": "\"Tokyo\"}"}
        }));
        let chunks = assembler.handle_event(&json!({"type": "content_block_stop", "index": 0}));
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            StreamChunk::ToolCall { tool_call } => {
                assert_eq!(tool_call.name, "weather");
                assert_eq!(tool_call.arguments, json!({"city": "Tokyo"}));
            }
            other => panic!("expected tool_call chunk, got {:?}", other),
        }

        assembler.handle_event(&json!({
            "type": "message_delta",
            "usage": {"output_tokens": 12}
        }));
        let usage = assembler.usage().unwrap();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 12);
    }

    #[test]
    fn test_stream_reassembly_invalid_json_falls_back_to_empty_object() {
        let mut assembler = StreamAssembler::default();
        assembler.handle_event(&json!({
            "type": "content_block_start",
            "index": 2,
            "content_block": {"type": "tool_use", "id": "t2", "name": "f"}
        }));
        assembler.handle_event(&json!({
            "type": "content_block_delta",
            "index": 2,
            "delta": {"type": "input_json_delta", "partial_json": "{not json"}
        }));
        let chunks = assembler.handle_event(&json!({"type": "content_block_stop", "index": 2}));
        match &chunks[0] {
            StreamChunk::ToolCall { tool_call } => {
                assert_eq!(tool_call.arguments, json!({}));
            }
            other => panic!("expected tool_call chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_text_deltas_map_one_to_one() {
        let mut assembler = StreamAssembler::default();
        let chunks = assembler.handle_event(&json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "hel"}
        }));
        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], StreamChunk::Delta { content } if content == "hel"));
    }

    #[test]
    fn test_create_requires_api_key() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        let err = match create(&ProviderConfig::default(), "m".into()) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("Anthropic"));
    }
}
